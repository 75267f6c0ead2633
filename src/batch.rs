use anyhow::Context;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, instrument, warn};

use crate::baseline::OptimalityBaseline;
use crate::config::Config;
use crate::driver::{derive_step_budget, EpisodeDriver};
use crate::oracle::{self, OracleKind};
use crate::report::{marker_path, schedule_path, EpisodeResult};
use crate::scenario::Instance;
use crate::stat::BatchSummary;

#[derive(Debug, Clone)]
pub struct Task {
    pub id: usize,
    pub instance: Instance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub id: usize,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Sorted by task id.
    pub results: Vec<EpisodeResult>,
    pub failures: Vec<TaskFailure>,
    pub summary: BatchSummary,
}

fn clear_markers(dir: &Path) -> anyhow::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("cannot read output dir {dir:?}"))? {
        let path = entry?.path();
        let is_marker = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("case_") && name.ends_with(".json"));
        if is_marker {
            fs::remove_file(&path).with_context(|| format!("cannot remove marker {path:?}"))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn run_task(task: &Task, config: &Config, baseline: &dyn OptimalityBaseline) -> anyhow::Result<EpisodeResult> {
    let output_dir = Path::new(&config.output_dir);
    let marker = marker_path(output_dir, task.id);
    if marker.exists() {
        info!("case {} already done, reusing {marker:?}", task.id);
        return EpisodeResult::load_marker(&marker);
    }

    let instance = &task.instance;
    let step_budget = derive_step_budget(instance, config.step_budget, config.budget_factor)?;
    let kind = match config.oracle {
        OracleKind::Noisy { noise, seed } => OracleKind::Noisy {
            noise,
            seed: seed.wrapping_add(task.id as u64),
        },
        kind => kind,
    };
    let oracle = oracle::build(kind, &instance.map, &instance.goals())?;

    let mut driver = EpisodeDriver::new(oracle, config.driver_options());
    let mut result = driver.run(task.id, instance, step_budget)?;
    result.apply_reference(baseline.reference(instance)?);

    if config.record_trajectory {
        result.write_schedule(&schedule_path(output_dir, task.id))?;
    }
    result.write_marker(&marker)?;
    Ok(result)
}

#[instrument(skip_all, name = "batch", fields(tasks = tasks.len(), workers = config.workers))]
pub async fn run_batch(
    tasks: Vec<Task>,
    config: Arc<Config>,
    baseline: Arc<dyn OptimalityBaseline>,
) -> anyhow::Result<BatchReport> {
    let output_dir = Path::new(&config.output_dir);
    fs::create_dir_all(output_dir).with_context(|| format!("cannot create output dir {output_dir:?}"))?;
    if config.restart {
        let removed = clear_markers(output_dir)?;
        info!("restart: removed {removed} result markers");
    }

    let (task_tx, task_rx) = mpsc::channel::<Task>(tasks.len().max(1));
    for task in tasks {
        task_tx.send(task).await?;
    }
    drop(task_tx);
    let task_rx = Arc::new(Mutex::new(task_rx));

    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Result<EpisodeResult, TaskFailure>>();

    let mut workers = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let task_rx = Arc::clone(&task_rx);
        let result_tx = result_tx.clone();
        let config = Arc::clone(&config);
        let baseline = Arc::clone(&baseline);

        workers.push(tokio::spawn(async move {
            loop {
                let Some(task) = task_rx.lock().await.recv().await else {
                    break;
                };
                let (id, name) = (task.id, task.instance.name.clone());
                let config = Arc::clone(&config);
                let baseline = Arc::clone(&baseline);

                let outcome = tokio::task::spawn_blocking(move || run_task(&task, &config, baseline.as_ref())).await;
                let slot = match outcome {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(err)) => {
                        error!("worker {worker}: case {id} ({name}) failed: {err:#}");
                        Err(TaskFailure {
                            id,
                            name,
                            error: format!("{err:#}"),
                        })
                    }
                    Err(join_error) => {
                        error!("worker {worker}: case {id} ({name}) panicked: {join_error}");
                        Err(TaskFailure {
                            id,
                            name,
                            error: join_error.to_string(),
                        })
                    }
                };
                if result_tx.send(slot).is_err() {
                    warn!("worker {worker}: result channel closed");
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    for worker in workers {
        worker.await?;
    }

    let mut results = Vec::new();
    let mut failures = Vec::new();
    while let Some(slot) = result_rx.recv().await {
        match slot {
            Ok(result) => results.push(result),
            Err(failure) => failures.push(failure),
        }
    }
    results.sort_by_key(|result| result.id);
    failures.sort_by_key(|failure| failure.id);

    let summary = BatchSummary::from_results(&results, failures.len());
    Ok(BatchReport {
        results,
        failures,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::IndividualShortestPaths;
    use crate::common::Agent;
    use crate::map::GridMap;
    use tempfile::tempdir;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    }

    fn tasks() -> Vec<Task> {
        let instance = Instance::load_from_yaml("map_file/test/test.yaml").unwrap();
        let walled = Instance::new(
            "walled",
            GridMap::from_rows(&[".@."]),
            vec![Agent {
                id: 0,
                start: (0, 0),
                goal: (0, 2),
            }],
        )
        .unwrap();
        vec![
            Task {
                id: 1,
                instance: instance.clone(),
            },
            Task { id: 2, instance: walled },
            Task { id: 3, instance },
        ]
    }

    #[tokio::test]
    async fn test_batch_isolates_failures_and_reuses_markers() {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = Config {
            output_dir: dir.path().to_string_lossy().into_owned(),
            workers: 2,
            record_trajectory: true,
            ..Config::default()
        };
        let baseline: Arc<dyn OptimalityBaseline> = Arc::new(IndividualShortestPaths);

        let report = run_batch(tasks(), Arc::new(config.clone()), Arc::clone(&baseline))
            .await
            .unwrap();
        assert_eq!(report.results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, 2);
        assert_eq!(report.summary.episodes, 2);
        assert_eq!(report.summary.failed_tasks, 1);
        for result in &report.results {
            assert!(!result.realized_collision);
            assert!(result.reference.is_some());
            assert!(schedule_path(dir.path(), result.id).exists());
        }
        assert!(!marker_path(dir.path(), 2).exists());

        // A finished case is not run again.
        let marker = marker_path(dir.path(), 1);
        let mut edited = EpisodeResult::load_marker(&marker).unwrap();
        edited.steps = 999;
        edited.write_marker(&marker).unwrap();
        let report = run_batch(tasks(), Arc::new(config.clone()), Arc::clone(&baseline))
            .await
            .unwrap();
        assert_eq!(report.results[0].steps, 999);

        let restarted = Config {
            restart: true,
            ..config
        };
        let report = run_batch(tasks(), Arc::new(restarted), baseline).await.unwrap();
        assert_ne!(report.results[0].steps, 999);
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = tempdir().unwrap();
        let config = Config {
            output_dir: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        let report = run_batch(Vec::new(), Arc::new(config), Arc::new(IndividualShortestPaths))
            .await
            .unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.summary, BatchSummary::default());
    }
}
