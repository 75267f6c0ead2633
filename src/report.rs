use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::baseline::{Deterioration, Reference};
use crate::common::JointState;
use crate::solver::ShieldMode;
use crate::stat::SearchStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub id: usize,
    pub name: String,
    pub mode: ShieldMode,
    pub num_agents: usize,
    pub success: bool,
    /// Budget ran out after the shield overrode a move, with no realized collision.
    pub failed_by_shielding: bool,
    pub realized_collision: bool,
    /// The shield overrode at least one top preference to avoid a conflict.
    pub collision_predicted: bool,
    pub steps: usize,
    pub step_budget: usize,
    pub makespan: usize,
    pub flowtime: usize,
    pub agents_at_goal: usize,
    pub reference: Option<Reference>,
    pub deterioration: Option<Deterioration>,
    pub found_optimal: bool,
    pub oracle_times_us: Vec<usize>,
    pub resolve_times_us: Vec<usize>,
    pub search: Option<SearchStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Vec<JointState>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleStatistics {
    cost: usize,
    makespan: usize,
    succeed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub x: usize,
    pub y: usize,
    pub t: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleFile {
    statistics: ScheduleStatistics,
    schedule: BTreeMap<String, Vec<ScheduleEntry>>,
}

pub fn marker_path(dir: &Path, id: usize) -> PathBuf {
    dir.join(format!("case_{id:05}.json"))
}

pub fn schedule_path(dir: &Path, id: usize) -> PathBuf {
    dir.join(format!("case_{id:05}.yaml"))
}

impl EpisodeResult {
    pub fn apply_reference(&mut self, reference: Option<Reference>) {
        self.reference = reference;
        self.deterioration = reference
            .filter(|_| self.success)
            .map(|reference| reference.deterioration(self.makespan, self.flowtime));
        self.found_optimal = self.success
            && reference.is_some_and(|reference| reference.is_matched_by(self.makespan, self.flowtime));
    }

    pub fn schedule(&self) -> BTreeMap<String, Vec<ScheduleEntry>> {
        let mut schedule = BTreeMap::new();
        let Some(trajectory) = &self.trajectory else {
            return schedule;
        };
        for agent in 0..self.num_agents {
            let waypoints = trajectory
                .iter()
                .enumerate()
                .map(|(t, state)| ScheduleEntry {
                    x: state[agent].1,
                    y: state[agent].0,
                    t,
                })
                .collect();
            schedule.insert(format!("agent{agent}"), waypoints);
        }
        schedule
    }

    pub fn write_schedule(&self, path: &Path) -> anyhow::Result<()> {
        let file = ScheduleFile {
            statistics: ScheduleStatistics {
                cost: self.flowtime,
                makespan: self.makespan,
                succeed: self.success,
            },
            schedule: self.schedule(),
        };
        let writer = BufWriter::new(
            File::create(path).with_context(|| format!("cannot create schedule file {path:?}"))?,
        );
        serde_yaml::to_writer(writer, &file)
            .with_context(|| format!("cannot write schedule file {path:?}"))
    }

    pub fn write_marker(&self, path: &Path) -> anyhow::Result<()> {
        let writer = BufWriter::new(
            File::create(path).with_context(|| format!("cannot create result marker {path:?}"))?,
        );
        serde_json::to_writer_pretty(writer, self)
            .with_context(|| format!("cannot write result marker {path:?}"))
    }

    pub fn load_marker(path: &Path) -> anyhow::Result<Self> {
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("cannot open result marker {path:?}"))?,
        );
        serde_json::from_reader(reader).with_context(|| format!("cannot parse result marker {path:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::ExpertSolution;
    use tempfile::tempdir;

    fn finished() -> EpisodeResult {
        EpisodeResult {
            id: 1,
            name: "test".to_string(),
            mode: ShieldMode::Greedy,
            num_agents: 2,
            success: true,
            failed_by_shielding: false,
            realized_collision: false,
            collision_predicted: false,
            steps: 2,
            step_budget: 10,
            makespan: 2,
            flowtime: 3,
            agents_at_goal: 2,
            reference: None,
            deterioration: None,
            found_optimal: false,
            oracle_times_us: vec![10, 12],
            resolve_times_us: vec![1, 1],
            search: None,
            trajectory: Some(vec![
                vec![(0, 0), (2, 2)],
                vec![(0, 1), (2, 1)],
                vec![(0, 2), (2, 1)],
            ]),
        }
    }

    #[test]
    fn test_apply_reference() {
        let mut result = finished();
        result.apply_reference(Some(Reference {
            makespan: 2,
            flowtime: 3,
        }));
        assert!(result.found_optimal);
        assert_eq!(result.deterioration.map(|d| d.makespan), Some(0.0));

        result.success = false;
        result.apply_reference(Some(Reference {
            makespan: 2,
            flowtime: 3,
        }));
        assert!(!result.found_optimal);
        assert!(result.deterioration.is_none());
    }

    #[test]
    fn test_schedule_uses_xy_coordinates() {
        let schedule = finished().schedule();
        assert_eq!(schedule.len(), 2);
        assert_eq!(
            schedule["agent1"][1],
            ScheduleEntry { x: 1, y: 2, t: 1 }
        );
        assert_eq!(schedule["agent0"].len(), 3);
    }

    #[test]
    fn test_marker_and_schedule_files() {
        let dir = tempdir().unwrap();
        let result = finished();

        let marker = marker_path(dir.path(), result.id);
        assert!(marker.ends_with("case_00001.json"));
        result.write_marker(&marker).unwrap();
        assert_eq!(EpisodeResult::load_marker(&marker).unwrap(), result);

        // The schedule file is readable as an expert solution.
        let schedule = schedule_path(dir.path(), result.id);
        result.write_schedule(&schedule).unwrap();
        assert_eq!(
            ExpertSolution::load(&schedule).unwrap(),
            Reference {
                makespan: 2,
                flowtime: 3
            }
        );
    }
}
