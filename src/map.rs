use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{anyhow, Context};

use crate::common::{Action, Agent, Position};
use crate::error::InstanceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridMap {
    pub height: usize,
    pub width: usize,
    passable: Vec<Vec<bool>>,
}

impl GridMap {
    pub fn open(height: usize, width: usize) -> Self {
        GridMap {
            height,
            width,
            passable: vec![vec![true; width]; height],
        }
    }

    pub fn with_obstacles(
        height: usize,
        width: usize,
        obstacles: impl IntoIterator<Item = Position>,
    ) -> Self {
        let mut map = Self::open(height, width);
        for (row, col) in obstacles {
            if row < height && col < width {
                map.passable[row][col] = false;
            }
        }
        map
    }

    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Self {
        let passable: Vec<Vec<bool>> = rows
            .iter()
            .map(|row| row.as_ref().chars().map(|ch| ch == '.' || ch == 'G').collect())
            .collect();
        let height = passable.len();
        let width = passable.first().map_or(0, |row| row.len());
        GridMap {
            height,
            width,
            passable,
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("cannot open map file {path}"))?;
        let mut lines = BufReader::new(file).lines();

        let _type = lines.next().transpose()?;
        let height = header_value(lines.next().transpose()?, "height", path)?;
        let width = header_value(lines.next().transpose()?, "width", path)?;
        let _map = lines.next().transpose()?;

        let rows = lines.take(height).collect::<Result<Vec<_>, _>>()?;
        if rows.len() != height || rows.iter().any(|row| row.chars().count() != width) {
            return Err(anyhow!(
                "map file {path} does not match its {height}x{width} header"
            ));
        }

        Ok(Self::from_rows(&rows))
    }

    pub fn is_free(&self, position: Position) -> bool {
        position.0 < self.height && position.1 < self.width && self.passable[position.0][position.1]
    }

    pub fn step(&self, from: Position, action: Action) -> Option<Position> {
        action.apply(from).filter(|next| self.is_free(*next))
    }

    pub fn get_neighbors(&self, position: Position) -> Vec<Position> {
        Action::ALL
            .into_iter()
            .filter_map(|action| self.step(position, action))
            .collect()
    }

    pub fn obstacles(&self) -> Vec<Position> {
        (0..self.height)
            .flat_map(|row| (0..self.width).map(move |col| (row, col)))
            .filter(|&cell| !self.passable[cell.0][cell.1])
            .collect()
    }

    /// Shortest-path distance from every cell to `goal`; `usize::MAX` where
    /// the goal is unreachable.
    pub fn distance_map(&self, goal: Position) -> Vec<Vec<usize>> {
        let mut distance = vec![vec![usize::MAX; self.width]; self.height];
        if !self.is_free(goal) {
            return distance;
        }
        let mut heap = BinaryHeap::new();

        distance[goal.0][goal.1] = 0;
        heap.push((Reverse(0), goal));

        while let Some((Reverse(cost), (row, col))) = heap.pop() {
            if cost > distance[row][col] {
                continue;
            }

            for (next_row, next_col) in self.get_neighbors((row, col)) {
                let next_cost = cost + 1;
                if next_cost < distance[next_row][next_col] {
                    heap.push((Reverse(next_cost), (next_row, next_col)));
                    distance[next_row][next_col] = next_cost;
                }
            }
        }

        distance
    }

    pub fn validate_agents(&self, agents: &[Agent]) -> Result<(), InstanceError> {
        if agents.is_empty() {
            return Err(InstanceError::NoAgents);
        }

        for agent in agents {
            for (role, position) in [("start", agent.start), ("goal", agent.goal)] {
                if position.0 >= self.height || position.1 >= self.width {
                    return Err(InstanceError::OutOfBounds {
                        agent: agent.id,
                        role,
                        position,
                        height: self.height,
                        width: self.width,
                    });
                }
                if !self.is_free(position) {
                    return Err(InstanceError::OnObstacle {
                        agent: agent.id,
                        role,
                        position,
                    });
                }
            }
        }

        for (i, first) in agents.iter().enumerate() {
            for second in &agents[i + 1..] {
                if first.start == second.start {
                    return Err(InstanceError::Duplicate {
                        first: first.id,
                        second: second.id,
                        role: "start",
                        position: first.start,
                    });
                }
                if first.goal == second.goal {
                    return Err(InstanceError::Duplicate {
                        first: first.id,
                        second: second.id,
                        role: "goal",
                        position: first.goal,
                    });
                }
            }
        }

        Ok(())
    }
}

fn header_value(line: Option<String>, key: &str, path: &str) -> anyhow::Result<usize> {
    let line = line.ok_or_else(|| anyhow!("map file {path} ended before '{key}'"))?;
    line.split_whitespace()
        .last()
        .ok_or_else(|| anyhow!("missing value for '{key}' in {path}"))?
        .parse::<usize>()
        .with_context(|| format!("invalid '{key}' in {path}"))
}
