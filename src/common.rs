use serde::{Deserialize, Serialize};

pub type Position = (usize, usize);

pub type JointState = Vec<Position>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: Position,
    pub goal: Position,
}

/// The five unit moves. The discriminant is the index into an
/// action-preference vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
    Stay = 4,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Stay,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Self::ALL.get(index).copied()
    }

    pub fn delta(self) -> (isize, isize) {
        match self {
            Action::Up => (-1, 0),
            Action::Down => (1, 0),
            Action::Left => (0, -1),
            Action::Right => (0, 1),
            Action::Stay => (0, 0),
        }
    }

    pub fn apply(self, from: Position) -> Option<Position> {
        let (dr, dc) = self.delta();
        let row = from.0.checked_add_signed(dr)?;
        let col = from.1.checked_add_signed(dc)?;
        Some((row, col))
    }

    pub fn between(from: Position, to: Position) -> Option<Action> {
        Self::ALL
            .into_iter()
            .find(|action| action.apply(from) == Some(to))
    }
}

pub fn manhattan(a: Position, b: Position) -> usize {
    a.0.abs_diff(b.0) + a.1.abs_diff(b.1)
}

pub fn agents_off_goal(positions: &[Position], goals: &[Position]) -> usize {
    positions
        .iter()
        .zip(goals)
        .filter(|(position, goal)| position != goal)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_apply() {
        assert_eq!(Action::Up.apply((1, 1)), Some((0, 1)));
        assert_eq!(Action::Down.apply((1, 1)), Some((2, 1)));
        assert_eq!(Action::Left.apply((1, 1)), Some((1, 0)));
        assert_eq!(Action::Right.apply((1, 1)), Some((1, 2)));
        assert_eq!(Action::Stay.apply((1, 1)), Some((1, 1)));
        assert_eq!(Action::Up.apply((0, 3)), None);
        assert_eq!(Action::Left.apply((3, 0)), None);
    }

    #[test]
    fn test_action_between() {
        assert_eq!(Action::between((2, 2), (2, 3)), Some(Action::Right));
        assert_eq!(Action::between((2, 2), (2, 2)), Some(Action::Stay));
        assert_eq!(Action::between((2, 2), (3, 3)), None);
    }

    #[test]
    fn test_action_index_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_index(action.index()), Some(action));
        }
        assert_eq!(Action::from_index(5), None);
    }
}
