use thiserror::Error;

use crate::common::Position;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    #[error("instance has no agents")]
    NoAgents,

    #[error("agent {agent} {role} {position:?} is outside the {height}x{width} grid")]
    OutOfBounds {
        agent: usize,
        role: &'static str,
        position: Position,
        height: usize,
        width: usize,
    },

    #[error("agent {agent} {role} {position:?} lies on an obstacle")]
    OnObstacle {
        agent: usize,
        role: &'static str,
        position: Position,
    },

    #[error("agents {first} and {second} share the {role} {position:?}")]
    Duplicate {
        first: usize,
        second: usize,
        role: &'static str,
        position: Position,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EpisodeError {
    /// Two agents ended on one cell, or swapped, after resolution. Signals a
    /// resolver defect rather than a planning failure.
    #[error("realized collision at step {step}: agents {first} and {second} at {cell:?}")]
    RealizedCollision {
        step: usize,
        first: usize,
        second: usize,
        cell: Position,
    },

    #[error("agent {agent} cannot move from {from:?} to {to:?} at step {step}")]
    InvalidMove {
        step: usize,
        agent: usize,
        from: Position,
        to: Position,
    },

    #[error("joint move covers {got} agents, episode has {expected}")]
    AgentCountMismatch { expected: usize, got: usize },
}
