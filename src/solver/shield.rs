use std::collections::HashMap;
use tracing::{error, trace};

use super::{priority_order, TieBreak};
use crate::common::{Action, Position};
use crate::map::GridMap;
use crate::oracle::ActionPreference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collision {
    pub first: usize,
    pub second: usize,
    pub cell: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointMove {
    pub actions: Vec<Action>,
    pub next: Vec<Position>,
    pub predicted_collision_avoided: bool,
    /// Set only if the post-resolution check finds a conflict. Never expected.
    pub realized_collision: Option<Collision>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShieldOutcome {
    Resolved(JointMove),
    Infeasible { agent: usize, action: Action },
}

impl ShieldOutcome {
    pub fn into_move(self) -> Option<JointMove> {
        match self {
            ShieldOutcome::Resolved(joint_move) => Some(joint_move),
            ShieldOutcome::Infeasible { .. } => None,
        }
    }
}

enum Blocked {
    Map,
    Agent(usize),
}

#[derive(Debug, Clone)]
pub struct CollisionShield<'a> {
    map: &'a GridMap,
    tie_break: TieBreak,
    allow_swaps: bool,
}

struct Resolution<'p> {
    positions: &'p [Position],
    forced: Vec<Option<Action>>,
    next: Vec<Option<Position>>,
    claimed: HashMap<Position, usize>,
    occupant: HashMap<Position, usize>,
}

impl<'a> CollisionShield<'a> {
    pub fn new(map: &'a GridMap, tie_break: TieBreak, allow_swaps: bool) -> Self {
        CollisionShield {
            map,
            tie_break,
            allow_swaps,
        }
    }

    pub fn resolve(
        &self,
        positions: &[Position],
        priorities: &[usize],
        preferences: &[ActionPreference],
        constraint: &[(usize, Action)],
    ) -> ShieldOutcome {
        let n = positions.len();
        let mut resolution = Resolution {
            positions,
            forced: vec![None; n],
            next: vec![None; n],
            claimed: HashMap::with_capacity(n),
            occupant: positions
                .iter()
                .enumerate()
                .map(|(agent, &position)| (position, agent))
                .collect(),
        };
        for &(agent, action) in constraint {
            resolution.forced[agent] = Some(action);
        }

        let mut actions = vec![Action::Stay; n];
        let mut predicted_collision_avoided = false;

        for agent in priority_order(priorities, self.tie_break) {
            let from = positions[agent];

            let (action, to) = if let Some(action) = resolution.forced[agent] {
                match self.check(&resolution, agent, action) {
                    Ok(to) => (action, to),
                    Err(_) => {
                        trace!("agent {agent} cannot take forced {action:?} from {from:?}");
                        return ShieldOutcome::Infeasible { agent, action };
                    }
                }
            } else {
                let mut chosen = None;
                for (rank, action) in preferences[agent].ranked().into_iter().enumerate() {
                    match self.check(&resolution, agent, action) {
                        Ok(to) => {
                            chosen = Some((action, to));
                            break;
                        }
                        Err(Blocked::Agent(other)) => {
                            if rank == 0 {
                                trace!("agent {agent} yields {action:?} to agent {other}");
                                predicted_collision_avoided = true;
                            }
                        }
                        Err(Blocked::Map) => {}
                    }
                }
                chosen.unwrap_or((Action::Stay, from))
            };

            actions[agent] = action;
            resolution.next[agent] = Some(to);
            resolution.claimed.insert(to, agent);
        }

        let next: Vec<Position> = resolution
            .next
            .iter()
            .zip(positions)
            .map(|(next, &from)| next.unwrap_or(from))
            .collect();

        let realized_collision = detect_collision(positions, &next, self.allow_swaps);
        if let Some(collision) = realized_collision {
            error!("shield produced a collision: {collision:?}");
        }

        ShieldOutcome::Resolved(JointMove {
            actions,
            next,
            predicted_collision_avoided,
            realized_collision,
        })
    }

    fn check(&self, resolution: &Resolution, agent: usize, action: Action) -> Result<Position, Blocked> {
        let from = resolution.positions[agent];
        let to = self.map.step(from, action).ok_or(Blocked::Map)?;

        if let Some(&other) = resolution.claimed.get(&to) {
            return Err(Blocked::Agent(other));
        }

        if to == from {
            return Ok(to);
        }

        let Some(&other) = resolution.occupant.get(&to) else {
            return Ok(to);
        };

        // Where the current occupant of `to` is headed, if already known.
        let leaving_to = match resolution.next[other] {
            Some(next) => Some(next),
            None => resolution.forced[other]
                .and_then(|forced| self.map.step(resolution.positions[other], forced)),
        };

        match leaving_to {
            Some(next) if next == from && !self.allow_swaps => Err(Blocked::Agent(other)),
            Some(next) if next != to => Ok(to),
            _ => Err(Blocked::Agent(other)),
        }
    }
}

pub fn detect_collision(
    current: &[Position],
    next: &[Position],
    allow_swaps: bool,
) -> Option<Collision> {
    let mut destination: HashMap<Position, usize> = HashMap::with_capacity(next.len());
    for (agent, &cell) in next.iter().enumerate() {
        if let Some(&first) = destination.get(&cell) {
            return Some(Collision {
                first,
                second: agent,
                cell,
            });
        }
        destination.insert(cell, agent);
    }

    if !allow_swaps {
        let occupant: HashMap<Position, usize> = current
            .iter()
            .enumerate()
            .map(|(agent, &cell)| (cell, agent))
            .collect();
        for (agent, (&from, &to)) in current.iter().zip(next).enumerate() {
            if from == to {
                continue;
            }
            if let Some(&other) = occupant.get(&to) {
                if other != agent && next[other] == from {
                    return Some(Collision {
                        first: agent.min(other),
                        second: agent.max(other),
                        cell: to,
                    });
                }
            }
        }
    }

    None
}
