use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::comm::CommGraph;
use crate::common::{Action, Position};
use crate::map::GridMap;

/// Per-agent scores over the five actions, indexed by [`Action::index`].
/// Scores need not be normalized; only their order matters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionPreference(pub [f32; 5]);

impl ActionPreference {
    pub fn score(&self, action: Action) -> f32 {
        let score = self.0[action.index()];
        if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            score
        }
    }

    pub fn ranked(&self) -> [Action; 5] {
        let mut actions = Action::ALL;
        actions.sort_by(|a, b| {
            self.score(*b)
                .total_cmp(&self.score(*a))
                .then_with(|| a.index().cmp(&b.index()))
        });
        actions
    }

    pub fn best(&self) -> Action {
        self.ranked()[0]
    }

    pub fn favoring(action: Action) -> Self {
        let mut scores = [0.0; 5];
        scores[action.index()] = 1.0;
        ActionPreference(scores)
    }

    pub fn from_order(order: &[Action]) -> Self {
        let mut scores = [f32::NEG_INFINITY; 5];
        for (rank, action) in order.iter().enumerate() {
            scores[action.index()] = (order.len() - rank) as f32;
        }
        ActionPreference(scores)
    }
}

pub trait ActionOracle {
    fn predict(
        &mut self,
        positions: &[Position],
        goals: &[Position],
        graph: &CommGraph,
    ) -> anyhow::Result<Vec<ActionPreference>>;
}

impl<O: ActionOracle + ?Sized> ActionOracle for Box<O> {
    fn predict(
        &mut self,
        positions: &[Position],
        goals: &[Position],
        graph: &CommGraph,
    ) -> anyhow::Result<Vec<ActionPreference>> {
        (**self).predict(positions, goals, graph)
    }
}

#[derive(Debug, Clone)]
pub struct DistanceOracle {
    map: GridMap,
    distance_maps: Vec<Vec<Vec<usize>>>,
}

impl DistanceOracle {
    pub fn new(map: &GridMap, goals: &[Position]) -> Self {
        DistanceOracle {
            map: map.clone(),
            distance_maps: goals.iter().map(|goal| map.distance_map(*goal)).collect(),
        }
    }

    fn preference(&self, agent: usize, position: Position) -> ActionPreference {
        let mut scores = [f32::NEG_INFINITY; 5];
        for action in Action::ALL {
            if let Some((row, col)) = self.map.step(position, action) {
                let distance = self.distance_maps[agent][row][col];
                if distance != usize::MAX {
                    scores[action.index()] = -(distance as f32);
                }
            }
        }
        // Waiting ties with a useless move; prefer to keep still.
        scores[Action::Stay.index()] += 0.5;
        ActionPreference(scores)
    }
}

impl ActionOracle for DistanceOracle {
    fn predict(
        &mut self,
        positions: &[Position],
        _goals: &[Position],
        _graph: &CommGraph,
    ) -> anyhow::Result<Vec<ActionPreference>> {
        if positions.len() != self.distance_maps.len() {
            anyhow::bail!(
                "oracle built for {} agents, asked about {}",
                self.distance_maps.len(),
                positions.len()
            );
        }
        Ok(positions
            .iter()
            .enumerate()
            .map(|(agent, &position)| self.preference(agent, position))
            .collect())
    }
}

#[derive(Debug)]
pub struct NoisyOracle<O> {
    inner: O,
    noise: f32,
    rng: StdRng,
}

/// Noise must be finite and small enough that `-noise..=noise` has a finite width.
pub fn check_noise(noise: f32) -> anyhow::Result<()> {
    if noise.is_nan() || noise < 0.0 || !(noise * 2.0).is_finite() {
        anyhow::bail!("oracle noise must be a finite non-negative number, got {noise}");
    }
    Ok(())
}

impl<O: ActionOracle> NoisyOracle<O> {
    pub fn new(inner: O, noise: f32, seed: u64) -> anyhow::Result<Self> {
        check_noise(noise)?;
        Ok(NoisyOracle {
            inner,
            noise,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl<O: ActionOracle> ActionOracle for NoisyOracle<O> {
    fn predict(
        &mut self,
        positions: &[Position],
        goals: &[Position],
        graph: &CommGraph,
    ) -> anyhow::Result<Vec<ActionPreference>> {
        let mut preferences = self.inner.predict(positions, goals, graph)?;
        if self.noise > 0.0 {
            for preference in &mut preferences {
                for score in &mut preference.0 {
                    *score += self.rng.gen_range(-self.noise..=self.noise);
                }
            }
        }
        Ok(preferences)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OracleKind {
    #[default]
    Distance,
    Noisy {
        noise: f32,
        seed: u64,
    },
}

pub fn build(kind: OracleKind, map: &GridMap, goals: &[Position]) -> anyhow::Result<Box<dyn ActionOracle + Send>> {
    let distance = DistanceOracle::new(map, goals);
    Ok(match kind {
        OracleKind::Distance => Box::new(distance),
        OracleKind::Noisy { noise, seed } => Box::new(NoisyOracle::new(distance, noise, seed)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{CommRadius, DistanceMetric};

    #[test]
    fn test_ranked_orders_by_score_then_index() {
        let preference = ActionPreference([0.1, 0.7, 0.7, f32::NAN, 0.2]);
        assert_eq!(
            preference.ranked(),
            [
                Action::Down,
                Action::Left,
                Action::Stay,
                Action::Up,
                Action::Right
            ]
        );
    }

    #[test]
    fn test_from_order() {
        let order = [Action::Stay, Action::Left];
        let preference = ActionPreference::from_order(&order);
        assert_eq!(&preference.ranked()[..2], &order);
    }

    #[test]
    fn test_distance_oracle_points_at_goal() {
        let map = GridMap::from_rows(&["...", ".@.", "..."]);
        let goals = [(2, 2), (0, 0)];
        let positions = [(0, 2), (2, 2)];
        let graph = CommGraph::build(&positions, CommRadius::Unbounded, DistanceMetric::Euclidean);
        let mut oracle = DistanceOracle::new(&map, &goals);

        let preferences = oracle.predict(&positions, &goals, &graph).unwrap();
        assert_eq!(preferences[0].best(), Action::Down);
        // (2, 2) -> (0, 0): up and left are both on a shortest path.
        assert_eq!(preferences[1].best(), Action::Up);
        assert_eq!(preferences[1].ranked()[1], Action::Left);
    }

    #[test]
    fn test_distance_oracle_stays_at_goal() {
        let map = GridMap::open(3, 3);
        let goals = [(1, 1)];
        let graph = CommGraph::build(&goals, CommRadius::Unbounded, DistanceMetric::Euclidean);
        let mut oracle = DistanceOracle::new(&map, &goals);
        let preferences = oracle.predict(&goals, &goals, &graph).unwrap();
        assert_eq!(preferences[0].best(), Action::Stay);
    }

    #[test]
    fn test_noisy_oracle_is_seeded() {
        let map = GridMap::open(4, 4);
        let goals = [(3, 3), (0, 0)];
        let positions = [(0, 0), (3, 3)];
        let graph = CommGraph::build(&positions, CommRadius::Unbounded, DistanceMetric::Euclidean);

        let mut first = NoisyOracle::new(DistanceOracle::new(&map, &goals), 0.8, 7).unwrap();
        let mut second = NoisyOracle::new(DistanceOracle::new(&map, &goals), 0.8, 7).unwrap();
        assert_eq!(
            first.predict(&positions, &goals, &graph).unwrap(),
            second.predict(&positions, &goals, &graph).unwrap()
        );
    }

    #[test]
    fn test_noisy_oracle_rejects_unbounded_noise() {
        let map = GridMap::open(2, 2);
        let goals = [(1, 1)];
        for noise in [f32::INFINITY, f32::NAN, -0.1, f32::MAX] {
            assert!(NoisyOracle::new(DistanceOracle::new(&map, &goals), noise, 1).is_err());
            assert!(build(OracleKind::Noisy { noise, seed: 1 }, &map, &goals).is_err());
        }

        let mut oracle = build(OracleKind::Noisy { noise: 1e30, seed: 1 }, &map, &goals).unwrap();
        let graph = CommGraph::build(&[(0, 0)], CommRadius::Unbounded, DistanceMetric::Euclidean);
        assert_eq!(oracle.predict(&[(0, 0)], &goals, &graph).unwrap().len(), 1);
    }
}
