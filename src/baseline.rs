use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::scenario::Instance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub makespan: usize,
    pub flowtime: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deterioration {
    pub makespan: f64,
    pub flowtime: f64,
}

impl Reference {
    pub fn deterioration(&self, makespan: usize, flowtime: usize) -> Deterioration {
        let ratio = |achieved: usize, reference: usize| {
            if reference == 0 {
                0.0
            } else {
                (achieved as f64 - reference as f64) / reference as f64
            }
        };
        Deterioration {
            makespan: ratio(makespan, self.makespan),
            flowtime: ratio(flowtime, self.flowtime),
        }
    }

    pub fn is_matched_by(&self, makespan: usize, flowtime: usize) -> bool {
        makespan <= self.makespan && flowtime <= self.flowtime
    }
}

/// Source of reference values. Only used for reporting, never for planning.
pub trait OptimalityBaseline: Send + Sync {
    fn reference(&self, instance: &Instance) -> anyhow::Result<Option<Reference>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndividualShortestPaths;

impl OptimalityBaseline for IndividualShortestPaths {
    fn reference(&self, instance: &Instance) -> anyhow::Result<Option<Reference>> {
        let mut makespan = 0;
        let mut flowtime = 0;
        for agent in &instance.agents {
            let distance = instance.map.distance_map(agent.goal)[agent.start.0][agent.start.1];
            if distance == usize::MAX {
                return Ok(None);
            }
            makespan = makespan.max(distance);
            flowtime += distance;
        }
        Ok(Some(Reference { makespan, flowtime }))
    }
}

#[derive(Debug, Deserialize)]
struct ExpertFile {
    statistics: ExpertStatistics,
}

#[derive(Debug, Deserialize)]
struct ExpertStatistics {
    cost: usize,
    makespan: usize,
}

/// Reads `<dir>/<prefix><instance name>.yaml` written by an offline expert
/// solver. Missing files yield no reference.
#[derive(Debug, Clone)]
pub struct ExpertSolution {
    dir: PathBuf,
    prefix: String,
}

impl ExpertSolution {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        ExpertSolution {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Reference> {
        let file = File::open(path).with_context(|| format!("cannot open expert file {path:?}"))?;
        let expert: ExpertFile = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("cannot parse expert file {path:?}"))?;
        Ok(Reference {
            makespan: expert.statistics.makespan,
            flowtime: expert.statistics.cost,
        })
    }
}

impl OptimalityBaseline for ExpertSolution {
    fn reference(&self, instance: &Instance) -> anyhow::Result<Option<Reference>> {
        let path = self.dir.join(format!("{}{}.yaml", self.prefix, instance.name));
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Agent;
    use crate::map::GridMap;

    #[test]
    fn test_individual_shortest_paths() {
        let map = GridMap::from_rows(&["...", ".@.", "..."]);
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (2, 2),
            },
            Agent {
                id: 1,
                start: (0, 1),
                goal: (0, 2),
            },
        ];
        let instance = Instance::new("small", map, agents).unwrap();
        let reference = IndividualShortestPaths.reference(&instance).unwrap();
        assert_eq!(
            reference,
            Some(Reference {
                makespan: 4,
                flowtime: 5
            })
        );
    }

    #[test]
    fn test_expert_solution_file() {
        let instance = Instance::load_from_yaml("map_file/test/test.yaml").unwrap();

        let reference = ExpertSolution::new("map_file/test", "expert_")
            .reference(&instance)
            .unwrap();
        assert_eq!(
            reference,
            Some(Reference {
                makespan: 4,
                flowtime: 8
            })
        );

        let missing = ExpertSolution::new("map_file/test", "missing_")
            .reference(&instance)
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_deterioration() {
        let reference = Reference {
            makespan: 4,
            flowtime: 10,
        };
        let deterioration = reference.deterioration(5, 10);
        assert!((deterioration.makespan - 0.25).abs() < 1e-9);
        assert_eq!(deterioration.flowtime, 0.0);
        assert!(!reference.is_matched_by(5, 10));
        assert!(reference.is_matched_by(4, 9));
    }
}
