use std::collections::{HashMap, VecDeque};
use std::ops::{Index, IndexMut};

use super::{initial_priorities, priority_order, update_priorities, Constraint, TieBreak};
use crate::common::{JointState, Position};
use crate::oracle::ActionPreference;

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct HighLevelNode {
    pub positions: JointState,
    pub parent: Option<NodeId>,
    pub depth: usize,
    pub priorities: Vec<usize>,
    /// Depth at which each agent last arrived on its goal, if it is there.
    pub goal_steps: Vec<Option<usize>>,
    pub preferences: Vec<ActionPreference>,
    pub order: Vec<usize>,
    branches: VecDeque<Constraint>,
}

impl HighLevelNode {
    pub fn root(
        positions: JointState,
        goals: &[Position],
        preferences: Vec<ActionPreference>,
        tie_break: TieBreak,
    ) -> Self {
        let priorities = initial_priorities(&positions, goals);
        let goal_steps = positions
            .iter()
            .zip(goals)
            .map(|(position, goal)| (position == goal).then_some(0))
            .collect();
        Self::with_branches(positions, None, 0, priorities, goal_steps, preferences, tie_break)
    }

    pub fn child(
        &self,
        parent: NodeId,
        positions: JointState,
        goals: &[Position],
        preferences: Vec<ActionPreference>,
        tie_break: TieBreak,
    ) -> Self {
        let depth = self.depth + 1;
        let mut priorities = self.priorities.clone();
        update_priorities(&mut priorities, &positions, goals);

        let goal_steps = positions
            .iter()
            .zip(goals)
            .zip(&self.goal_steps)
            .map(|((position, goal), &reached)| match reached {
                _ if position != goal => None,
                Some(step) => Some(step),
                None => Some(depth),
            })
            .collect();

        Self::with_branches(
            positions,
            Some(parent),
            depth,
            priorities,
            goal_steps,
            preferences,
            tie_break,
        )
    }

    fn with_branches(
        positions: JointState,
        parent: Option<NodeId>,
        depth: usize,
        priorities: Vec<usize>,
        goal_steps: Vec<Option<usize>>,
        preferences: Vec<ActionPreference>,
        tie_break: TieBreak,
    ) -> Self {
        let order = priority_order(&priorities, tie_break);
        HighLevelNode {
            positions,
            parent,
            depth,
            priorities,
            goal_steps,
            preferences,
            order,
            branches: VecDeque::from([Constraint::new()]),
        }
    }

    pub fn has_branches(&self) -> bool {
        !self.branches.is_empty()
    }

    pub fn pending_branches(&self) -> usize {
        self.branches.len()
    }

    pub fn next_branch(&mut self) -> Option<Constraint> {
        let constraint = self.branches.pop_front()?;
        if let Some(&agent) = self.order.get(constraint.len()) {
            for action in self.preferences[agent].ranked() {
                let mut extended = constraint.clone();
                extended.push((agent, action));
                self.branches.push_back(extended);
            }
        }
        Some(constraint)
    }

    pub fn is_goal(&self, goals: &[Position]) -> bool {
        self.positions == goals
    }
}

#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<HighLevelNode>,
    index: HashMap<JointState, NodeId>,
}

impl NodeArena {
    pub fn insert(&mut self, node: HighLevelNode) -> NodeId {
        let id = self.nodes.len();
        self.index.insert(node.positions.clone(), id);
        self.nodes.push(node);
        id
    }

    pub fn lookup(&self, positions: &[Position]) -> Option<NodeId> {
        self.index.get(positions).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn path_to(&self, id: NodeId) -> Vec<JointState> {
        let mut path = Vec::with_capacity(self.nodes[id].depth + 1);
        let mut current = Some(id);
        while let Some(node) = current {
            path.push(self.nodes[node].positions.clone());
            current = self.nodes[node].parent;
        }
        path.reverse();
        path
    }
}

impl Index<NodeId> for NodeArena {
    type Output = HighLevelNode;

    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id]
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Self::Output {
        &mut self.nodes[id]
    }
}
