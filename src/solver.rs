mod highlevel;
mod lacam;
mod shield;

pub use highlevel::{HighLevelNode, NodeArena, NodeId};
pub use lacam::{JointSearch, SearchOutcome};
pub use shield::{detect_collision, Collision, CollisionShield, JointMove, ShieldOutcome};

use serde::{Deserialize, Serialize};

use crate::common::{manhattan, Action, Position};

pub type Constraint = Vec<(usize, Action)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ShieldMode {
    #[default]
    Greedy,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    #[default]
    LowestIndex,
    HighestIndex,
}

pub fn priority_order(priorities: &[usize], tie_break: TieBreak) -> Vec<usize> {
    let mut order: Vec<usize> = (0..priorities.len()).collect();
    order.sort_by(|&a, &b| {
        priorities[b].cmp(&priorities[a]).then_with(|| match tie_break {
            TieBreak::LowestIndex => a.cmp(&b),
            TieBreak::HighestIndex => b.cmp(&a),
        })
    });
    order
}

pub fn initial_priorities(positions: &[Position], goals: &[Position]) -> Vec<usize> {
    positions
        .iter()
        .zip(goals)
        .map(|(&position, &goal)| manhattan(position, goal))
        .collect()
}

/// Raises each priority to the current distance to goal, and resets agents
/// standing on their goal to zero.
pub fn update_priorities(priorities: &mut [usize], positions: &[Position], goals: &[Position]) {
    for ((priority, &position), &goal) in priorities.iter_mut().zip(positions).zip(goals) {
        let distance = manhattan(position, goal);
        *priority = if distance == 0 {
            0
        } else {
            (*priority).max(distance)
        };
    }
}
