use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::baseline::{IndividualShortestPaths, OptimalityBaseline};
use crate::comm::{CommGraph, CommRadius, DistanceMetric};
use crate::common::Position;
use crate::error::EpisodeError;
use crate::episode::Episode;
use crate::oracle::ActionOracle;
use crate::report::EpisodeResult;
use crate::scenario::Instance;
use crate::solver::{CollisionShield, JointSearch, SearchOutcome, ShieldMode, TieBreak};
use crate::stat::SearchStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverOptions {
    pub mode: ShieldMode,
    pub comm_radius: CommRadius,
    pub metric: DistanceMetric,
    pub tie_break: TieBreak,
    pub allow_swaps: bool,
    pub node_budget: usize,
    pub record_trajectory: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions {
            mode: ShieldMode::Greedy,
            comm_radius: CommRadius::Unbounded,
            metric: DistanceMetric::Euclidean,
            tie_break: TieBreak::LowestIndex,
            allow_swaps: false,
            node_budget: 500,
            record_trajectory: false,
        }
    }
}

/// Step budget for an instance: the explicit value if given, otherwise
/// `factor` times the lower-bound makespan (at least one step).
pub fn derive_step_budget(instance: &Instance, explicit: Option<usize>, factor: f64) -> anyhow::Result<usize> {
    if let Some(budget) = explicit {
        return Ok(budget);
    }
    let reference = IndividualShortestPaths
        .reference(instance)?
        .ok_or_else(|| anyhow!("instance {} has an agent that cannot reach its goal", instance.name))?;
    Ok(((reference.makespan as f64 * factor).ceil() as usize).max(1))
}

#[derive(Debug, Default)]
struct StepLog {
    collision_predicted: bool,
    realized_collision: bool,
    out_of_budget: bool,
    oracle_times_us: Vec<usize>,
    resolve_times_us: Vec<usize>,
    search: Option<SearchStats>,
}

pub struct EpisodeDriver<O> {
    oracle: O,
    options: DriverOptions,
}

impl<O: ActionOracle> EpisodeDriver<O> {
    pub fn new(oracle: O, options: DriverOptions) -> Self {
        EpisodeDriver { oracle, options }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    #[instrument(skip_all, name = "episode", fields(instance = %instance.name, agents = instance.agents.len(), mode = ?self.options.mode), level = "debug")]
    pub fn run(&mut self, id: usize, instance: &Instance, step_budget: usize) -> anyhow::Result<EpisodeResult> {
        let mut episode = Episode::new(instance, step_budget, self.options.allow_swaps)
            .with_context(|| format!("invalid instance {}", instance.name))?;

        let log = match self.options.mode {
            ShieldMode::Greedy => self.run_greedy(instance, &mut episode)?,
            ShieldMode::Search => self.run_search(instance, &mut episode)?,
        };

        let metrics = episode.metrics();
        let success = episode.all_at_goal() && !log.realized_collision;
        // Ran out of steps (or search expansions) with the shield having
        // overridden at least one move.
        let failed_by_shielding = !success
            && !log.realized_collision
            && log.collision_predicted
            && (log.out_of_budget || episode.budget_exhausted());
        info!(
            "episode {} {}: success {} steps {} makespan {} flowtime {} at goal {}/{}",
            id,
            instance.name,
            success,
            metrics.steps,
            metrics.makespan,
            metrics.flowtime,
            metrics.agents_at_goal,
            episode.num_agents()
        );

        Ok(EpisodeResult {
            id,
            name: instance.name.clone(),
            mode: self.options.mode,
            num_agents: episode.num_agents(),
            success,
            failed_by_shielding,
            realized_collision: log.realized_collision,
            collision_predicted: log.collision_predicted,
            steps: metrics.steps,
            step_budget,
            makespan: metrics.makespan,
            flowtime: metrics.flowtime,
            agents_at_goal: metrics.agents_at_goal,
            reference: None,
            deterioration: None,
            found_optimal: false,
            oracle_times_us: log.oracle_times_us,
            resolve_times_us: log.resolve_times_us,
            search: log.search,
            trajectory: self
                .options
                .record_trajectory
                .then(|| episode.trajectory().to_vec()),
        })
    }

    fn run_greedy(&mut self, instance: &Instance, episode: &mut Episode) -> anyhow::Result<StepLog> {
        let shield = CollisionShield::new(&instance.map, self.options.tie_break, self.options.allow_swaps);
        let goals = episode.goals();
        let mut log = StepLog::default();

        while !episode.all_at_goal() && !episode.budget_exhausted() {
            let positions = episode.positions();
            let graph = CommGraph::build(&positions, self.options.comm_radius, self.options.metric);

            let oracle_start_time = Instant::now();
            let preferences = self.oracle.predict(&positions, &goals, &graph)?;
            log.oracle_times_us
                .push(oracle_start_time.elapsed().as_micros() as usize);
            if preferences.len() != positions.len() {
                return Err(anyhow!(
                    "oracle returned {} preferences for {} agents",
                    preferences.len(),
                    positions.len()
                ));
            }

            let resolve_start_time = Instant::now();
            let joint_move = shield
                .resolve(&positions, &episode.priorities(), &preferences, &[])
                .into_move()
                .ok_or_else(|| anyhow!("unconstrained resolution reported infeasible"))?;
            log.resolve_times_us
                .push(resolve_start_time.elapsed().as_micros() as usize);

            log.collision_predicted |= joint_move.predicted_collision_avoided;
            if joint_move.realized_collision.is_some() {
                log.realized_collision = true;
                break;
            }
            if !commit(episode, &joint_move.next, &mut log)? {
                break;
            }
        }

        Ok(log)
    }

    fn run_search(&mut self, instance: &Instance, episode: &mut Episode) -> anyhow::Result<StepLog> {
        let mut search = JointSearch::new(&instance.map, episode.goals(), self.options.node_budget)
            .with_tie_break(self.options.tie_break)
            .with_swaps(self.options.allow_swaps)
            .with_communication(self.options.comm_radius, self.options.metric);
        let mut log = StepLog::default();

        let outcome = match search.solve(&episode.positions(), &mut self.oracle) {
            Ok(outcome) => outcome,
            Err(err) if matches!(err.downcast_ref::<EpisodeError>(), Some(EpisodeError::RealizedCollision { .. })) => {
                error!("{err}");
                log.realized_collision = true;
                log.oracle_times_us = search.oracle_times_us;
                log.resolve_times_us = search.resolve_times_us;
                log.search = Some(search.stats);
                return Ok(log);
            }
            Err(err) => return Err(err),
        };
        debug!("joint search solved {} with path length {}", outcome.is_solved(), outcome.path().len());

        // No per-step override flag in search mode; dead branches stand in for it.
        log.collision_predicted = search.stats.infeasible_branches > 0 || search.stats.backtracks > 0;
        log.out_of_budget = matches!(outcome, SearchOutcome::NotSolved { budget_exceeded: true, .. });
        log.oracle_times_us = std::mem::take(&mut search.oracle_times_us);
        log.resolve_times_us = std::mem::take(&mut search.resolve_times_us);
        log.search = Some(search.stats.clone());

        for next in outcome.path().iter().skip(1) {
            if episode.budget_exhausted() || !commit(episode, next, &mut log)? {
                break;
            }
        }

        Ok(log)
    }
}

fn commit(episode: &mut Episode, next: &[Position], log: &mut StepLog) -> anyhow::Result<bool> {
    match episode.commit(next) {
        Ok(()) => Ok(true),
        Err(err @ EpisodeError::RealizedCollision { .. }) => {
            error!("{err}");
            log.realized_collision = true;
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}
