use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{manhattan, Position};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CommRadius {
    #[default]
    Unbounded,
    Finite(f64),
}

impl Serialize for CommRadius {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CommRadius::Unbounded => serializer.serialize_str("unbounded"),
            CommRadius::Finite(radius) => serializer.serialize_f64(*radius),
        }
    }
}

impl<'de> Deserialize<'de> for CommRadius {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(radius) => Ok(CommRadius::Finite(radius)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl std::str::FromStr for CommRadius {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "unbounded" | "inf" | "infinity" => Ok(CommRadius::Unbounded),
            other => other
                .parse::<f64>()
                .map(CommRadius::Finite)
                .map_err(|_| format!("invalid communication radius '{other}'")),
        }
    }
}

impl fmt::Display for CommRadius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommRadius::Unbounded => write!(f, "unbounded"),
            CommRadius::Finite(radius) => write!(f, "{radius}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Manhattan,
    #[default]
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(self, a: Position, b: Position) -> f64 {
        match self {
            DistanceMetric::Manhattan => manhattan(a, b) as f64,
            DistanceMetric::Euclidean => {
                let dr = a.0.abs_diff(b.0) as f64;
                let dc = a.1.abs_diff(b.1) as f64;
                dr.hypot(dc)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommGraph {
    adjacency: Vec<Vec<bool>>,
}

impl CommGraph {
    pub fn build(positions: &[Position], radius: CommRadius, metric: DistanceMetric) -> Self {
        let n = positions.len();
        let mut adjacency = vec![vec![false; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let linked = match radius {
                    CommRadius::Unbounded => true,
                    CommRadius::Finite(radius) => {
                        metric.distance(positions[i], positions[j]) <= radius
                    }
                };
                adjacency[i][j] = linked;
                adjacency[j][i] = linked;
            }
        }
        CommGraph { adjacency }
    }

    pub fn num_agents(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_linked(&self, i: usize, j: usize) -> bool {
        self.adjacency[i][j]
    }

    pub fn neighbors(&self, agent: usize) -> Vec<usize> {
        self.adjacency[agent]
            .iter()
            .enumerate()
            .filter_map(|(other, &linked)| linked.then_some(other))
            .collect()
    }

    pub fn degree(&self, agent: usize) -> usize {
        self.adjacency[agent].iter().filter(|&&linked| linked).count()
    }

    pub fn num_links(&self) -> usize {
        (0..self.num_agents()).map(|agent| self.degree(agent)).sum::<usize>() / 2
    }

    /// `D^-1/2 A D^-1/2`, the graph shift operator fed to graph-filter
    /// policies. Isolated agents get an all-zero row.
    pub fn normalized(&self) -> Vec<Vec<f64>> {
        let scale: Vec<f64> = (0..self.num_agents())
            .map(|agent| match self.degree(agent) {
                0 => 0.0,
                degree => 1.0 / (degree as f64).sqrt(),
            })
            .collect();

        self.adjacency
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(|(j, &linked)| if linked { scale[i] * scale[j] } else { 0.0 })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_radius_fully_connected() {
        let graph = CommGraph::build(
            &[(0, 0), (9, 9), (4, 2)],
            CommRadius::Unbounded,
            DistanceMetric::Euclidean,
        );
        assert_eq!(graph.num_links(), 3);
        assert!(!graph.is_linked(0, 0));
        assert_eq!(graph.neighbors(1), vec![0, 2]);
    }

    #[test]
    fn test_zero_radius_has_no_links() {
        let graph = CommGraph::build(
            &[(0, 0), (0, 1), (1, 0)],
            CommRadius::Finite(0.0),
            DistanceMetric::Manhattan,
        );
        assert_eq!(graph.num_links(), 0);
        assert!(graph.normalized().iter().flatten().all(|&w| w == 0.0));
    }

    #[test]
    fn test_metric_changes_links() {
        let positions = [(0, 0), (1, 1)];
        let euclidean = CommGraph::build(
            &positions,
            CommRadius::Finite(1.5),
            DistanceMetric::Euclidean,
        );
        let manhattan = CommGraph::build(
            &positions,
            CommRadius::Finite(1.5),
            DistanceMetric::Manhattan,
        );
        assert!(euclidean.is_linked(0, 1));
        assert!(!manhattan.is_linked(0, 1));
    }

    #[test]
    fn test_build_is_idempotent_and_symmetric() {
        let positions = [(0, 0), (0, 3), (2, 2), (5, 1)];
        let first = CommGraph::build(&positions, CommRadius::Finite(3.0), DistanceMetric::Euclidean);
        let second = CommGraph::build(&positions, CommRadius::Finite(3.0), DistanceMetric::Euclidean);
        assert_eq!(first, second);
        for i in 0..positions.len() {
            for j in 0..positions.len() {
                assert_eq!(first.is_linked(i, j), first.is_linked(j, i));
            }
        }
    }

    #[test]
    fn test_radius_parsing() {
        assert_eq!("unbounded".parse::<CommRadius>(), Ok(CommRadius::Unbounded));
        assert_eq!("7".parse::<CommRadius>(), Ok(CommRadius::Finite(7.0)));
        assert!("far".parse::<CommRadius>().is_err());

        let radius: CommRadius = serde_yaml::from_str("unbounded").unwrap();
        assert_eq!(radius, CommRadius::Unbounded);
        let radius: CommRadius = serde_yaml::from_str("2.5").unwrap();
        assert_eq!(radius, CommRadius::Finite(2.5));
    }
}
