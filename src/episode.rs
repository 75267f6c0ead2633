use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::common::{Action, JointState, Position};
use crate::error::{EpisodeError, InstanceError};
use crate::map::GridMap;
use crate::scenario::Instance;
use crate::solver::{detect_collision, initial_priorities, update_priorities};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentState {
    pub position: Position,
    pub goal: Position,
    pub priority: usize,
    pub first_move: Option<usize>,
    /// Step the agent last arrived on its goal; cleared if it leaves again.
    pub goal_step: Option<usize>,
}

impl AgentState {
    pub fn at_goal(&self) -> bool {
        self.position == self.goal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    pub steps: usize,
    pub makespan: usize,
    pub flowtime: usize,
    pub agents_at_goal: usize,
}

#[derive(Debug, Clone)]
pub struct Episode {
    map: GridMap,
    agents: Vec<AgentState>,
    step: usize,
    step_budget: usize,
    allow_swaps: bool,
    trajectory: Vec<JointState>,
}

impl Episode {
    pub fn new(instance: &Instance, step_budget: usize, allow_swaps: bool) -> Result<Self, InstanceError> {
        instance.map.validate_agents(&instance.agents)?;

        let starts = instance.starts();
        let goals = instance.goals();
        let priorities = initial_priorities(&starts, &goals);
        let agents = starts
            .iter()
            .zip(&goals)
            .zip(priorities)
            .map(|((&position, &goal), priority)| AgentState {
                position,
                goal,
                priority,
                first_move: None,
                goal_step: (position == goal).then_some(0),
            })
            .collect();

        Ok(Episode {
            map: instance.map.clone(),
            agents,
            step: 0,
            step_budget,
            allow_swaps,
            trajectory: vec![starts],
        })
    }

    pub fn map(&self) -> &GridMap {
        &self.map
    }

    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn positions(&self) -> JointState {
        self.agents.iter().map(|agent| agent.position).collect()
    }

    pub fn goals(&self) -> Vec<Position> {
        self.agents.iter().map(|agent| agent.goal).collect()
    }

    pub fn priorities(&self) -> Vec<usize> {
        self.agents.iter().map(|agent| agent.priority).collect()
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn step_budget(&self) -> usize {
        self.step_budget
    }

    pub fn all_at_goal(&self) -> bool {
        self.agents.iter().all(AgentState::at_goal)
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step >= self.step_budget
    }

    pub fn trajectory(&self) -> &[JointState] {
        &self.trajectory
    }

    pub fn commit(&mut self, next: &[Position]) -> Result<(), EpisodeError> {
        if next.len() != self.agents.len() {
            return Err(EpisodeError::AgentCountMismatch {
                expected: self.agents.len(),
                got: next.len(),
            });
        }

        let step = self.step + 1;
        for (agent, (state, &to)) in self.agents.iter().zip(next).enumerate() {
            if !self.map.is_free(to) || Action::between(state.position, to).is_none() {
                return Err(EpisodeError::InvalidMove {
                    step,
                    agent,
                    from: state.position,
                    to,
                });
            }
        }

        let current = self.positions();
        if let Some(collision) = detect_collision(&current, next, self.allow_swaps) {
            return Err(EpisodeError::RealizedCollision {
                step,
                first: collision.first,
                second: collision.second,
                cell: collision.cell,
            });
        }

        self.step = step;
        for (state, &to) in self.agents.iter_mut().zip(next) {
            if to != state.position && state.first_move.is_none() {
                state.first_move = Some(step);
            }
            state.position = to;
            state.goal_step = match state.goal_step {
                _ if !state.at_goal() => None,
                Some(reached) => Some(reached),
                None => Some(step),
            };
        }

        let mut priorities = self.priorities();
        update_priorities(&mut priorities, next, &self.goals());
        for (state, priority) in self.agents.iter_mut().zip(priorities) {
            state.priority = priority;
        }

        trace!("step {step}: {next:?}");
        self.trajectory.push(next.to_vec());
        Ok(())
    }

    pub fn metrics(&self) -> EpisodeMetrics {
        let end = |state: &AgentState| state.goal_step.unwrap_or(self.step);

        let moved: Vec<&AgentState> = self
            .agents
            .iter()
            .filter(|state| state.first_move.is_some())
            .collect();

        let flowtime = moved
            .iter()
            .map(|state| {
                let first = state.first_move.unwrap_or(0);
                (end(state) + 1).saturating_sub(first)
            })
            .sum();

        let makespan = match moved.iter().filter_map(|state| state.first_move).min() {
            Some(first) => {
                let last = self.agents.iter().map(end).max().unwrap_or(first);
                (last + 1).saturating_sub(first)
            }
            None => 0,
        };

        EpisodeMetrics {
            steps: self.step,
            makespan,
            flowtime,
            agents_at_goal: self.agents.iter().filter(|state| state.at_goal()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Agent;

    fn corridor(width: usize, agents: &[(Position, Position)]) -> Instance {
        let agents = agents
            .iter()
            .enumerate()
            .map(|(id, &(start, goal))| Agent { id, start, goal })
            .collect();
        Instance::new("corridor", GridMap::open(1, width), agents).unwrap()
    }

    #[test]
    fn test_commit_updates_bookkeeping() {
        let instance = corridor(4, &[((0, 0), (0, 2)), ((0, 3), (0, 3))]);
        let mut episode = Episode::new(&instance, 10, false).unwrap();
        assert_eq!(episode.priorities(), vec![2, 0]);
        assert_eq!(episode.agents()[1].goal_step, Some(0));

        episode.commit(&[(0, 1), (0, 3)]).unwrap();
        assert_eq!(episode.agents()[0].first_move, Some(1));
        assert_eq!(episode.agents()[1].first_move, None);
        assert_eq!(episode.priorities(), vec![2, 0]);

        episode.commit(&[(0, 2), (0, 3)]).unwrap();
        assert!(episode.all_at_goal());
        assert_eq!(episode.agents()[0].goal_step, Some(2));
        assert_eq!(episode.priorities(), vec![0, 0]);
        assert_eq!(episode.trajectory().len(), 3);

        let metrics = episode.metrics();
        assert_eq!(metrics.steps, 2);
        assert_eq!(metrics.makespan, 2);
        assert_eq!(metrics.flowtime, 2);
        assert_eq!(metrics.agents_at_goal, 2);
    }

    #[test]
    fn test_leaving_goal_clears_goal_step() {
        let instance = corridor(3, &[((0, 1), (0, 1))]);
        let mut episode = Episode::new(&instance, 10, false).unwrap();
        episode.commit(&[(0, 2)]).unwrap();
        assert_eq!(episode.agents()[0].goal_step, None);
        assert_eq!(episode.priorities(), vec![1]);
        episode.commit(&[(0, 1)]).unwrap();
        assert_eq!(episode.agents()[0].goal_step, Some(2));
        assert_eq!(episode.priorities(), vec![0]);
    }

    #[test]
    fn test_commit_rejects_collisions_and_jumps() {
        let instance = corridor(3, &[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let mut episode = Episode::new(&instance, 10, false).unwrap();

        assert!(matches!(
            episode.commit(&[(0, 1), (0, 1)]),
            Err(EpisodeError::RealizedCollision {
                step: 1,
                first: 0,
                second: 1,
                cell: (0, 1)
            })
        ));
        assert!(matches!(
            episode.commit(&[(0, 2), (0, 2)]),
            Err(EpisodeError::InvalidMove { agent: 0, .. })
        ));
        assert!(matches!(
            episode.commit(&[(0, 1)]),
            Err(EpisodeError::AgentCountMismatch { expected: 2, got: 1 })
        ));
        // Rejected moves leave the episode untouched.
        assert_eq!(episode.step(), 0);
        assert_eq!(episode.positions(), vec![(0, 0), (0, 2)]);
    }

    #[test]
    fn test_metrics_for_unfinished_episode() {
        let instance = corridor(5, &[((0, 0), (0, 4)), ((0, 1), (0, 1))]);
        let mut episode = Episode::new(&instance, 3, false).unwrap();
        episode.commit(&[(0, 0), (0, 1)]).unwrap();
        episode.commit(&[(0, 0), (0, 2)]).unwrap();
        episode.commit(&[(0, 0), (0, 1)]).unwrap();
        assert!(episode.budget_exhausted());

        let metrics = episode.metrics();
        // Agent 1 moved at step 2, back on goal at step 3; agent 0 never moved.
        assert_eq!(metrics.makespan, 2);
        assert_eq!(metrics.flowtime, 2);
        assert_eq!(metrics.agents_at_goal, 1);
    }
}
