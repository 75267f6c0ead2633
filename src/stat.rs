use serde::{Deserialize, Serialize};
use tracing::info;

use crate::report::EpisodeResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    pub expansions: usize,
    pub nodes_created: usize,
    pub memo_hits: usize,
    pub infeasible_branches: usize,
    pub backtracks: usize,
    pub oracle_calls: usize,
    pub time_us: usize,
}

impl SearchStats {
    pub(crate) fn print(&self) {
        info!(
            "LaCAM expansions {:?} nodes {:?} memo hits {:?} infeasible {:?} backtracks {:?} Time(microseconds) {:?}",
            self.expansions,
            self.nodes_created,
            self.memo_hits,
            self.infeasible_branches,
            self.backtracks,
            self.time_us
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub episodes: usize,
    pub failed_tasks: usize,
    pub rate_reach_goal: f64,
    pub rate_failed_by_shielding: f64,
    pub rate_collision_predicted: f64,
    pub rate_realized_collision: f64,
    pub rate_optimal: f64,
    /// Mean of `makespan / reference - 1` over episodes with a reference.
    pub avg_deterioration_makespan: f64,
    pub avg_deterioration_flowtime: f64,
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

impl BatchSummary {
    pub fn from_results(results: &[EpisodeResult], failed_tasks: usize) -> Self {
        let episodes = results.len();
        let count = |predicate: fn(&EpisodeResult) -> bool| results.iter().filter(|r| predicate(r)).count();

        BatchSummary {
            episodes,
            failed_tasks,
            rate_reach_goal: rate(count(|r| r.success), episodes),
            rate_failed_by_shielding: rate(count(|r| r.failed_by_shielding), episodes),
            rate_collision_predicted: rate(count(|r| r.collision_predicted), episodes),
            rate_realized_collision: rate(count(|r| r.realized_collision), episodes),
            rate_optimal: rate(count(|r| r.found_optimal), episodes),
            avg_deterioration_makespan: mean(
                results
                    .iter()
                    .filter_map(|r| r.deterioration.as_ref().map(|d| d.makespan)),
            ),
            avg_deterioration_flowtime: mean(
                results
                    .iter()
                    .filter_map(|r| r.deterioration.as_ref().map(|d| d.flowtime)),
            ),
        }
    }

    pub fn print(&self) {
        info!(
            "Episodes {} (failed tasks {}) ReachGoal {:.4} DeteriorationRate(MakeSpan) {:.4} DeteriorationRate(FlowTime) {:.4} CollisionPredicted {:.4} FailedByShielding {:.4} RealizedCollision {:.4}",
            self.episodes,
            self.failed_tasks,
            self.rate_reach_goal,
            self.avg_deterioration_makespan,
            self.avg_deterioration_flowtime,
            self.rate_collision_predicted,
            self.rate_failed_by_shielding,
            self.rate_realized_collision
        );
    }
}
