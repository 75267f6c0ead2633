use mapf_shield::baseline::{ExpertSolution, IndividualShortestPaths, OptimalityBaseline};
use mapf_shield::batch::{run_batch, Task};
use mapf_shield::config::{Cli, Config};
use mapf_shield::map::GridMap;
use mapf_shield::scenario::{Instance, Scenario};

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_tasks(config: &Config) -> anyhow::Result<Vec<Task>> {
    if !config.instances.is_empty() {
        return config
            .instances
            .iter()
            .enumerate()
            .map(|(index, path)| -> anyhow::Result<Task> {
                Ok(Task {
                    id: index + 1,
                    instance: Instance::load_from_yaml(path)?,
                })
            })
            .collect();
    }

    let (Some(map_path), Some(scen_path)) = (&config.map_path, &config.scen_path) else {
        anyhow::bail!("no instance source configured");
    };
    let map = GridMap::from_file(map_path)?;
    let scenario = Scenario::load_from_scen(scen_path)?;
    let map_name = Path::new(map_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("map");

    // `agents_dist[b]` agents come from bucket `b`.
    let buckets: Vec<usize> = config
        .agents_dist
        .iter()
        .enumerate()
        .flat_map(|(bucket, &count)| std::iter::repeat(bucket).take(count))
        .collect();

    (0..config.num_cases)
        .map(|case| -> anyhow::Result<Task> {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(case as u64));
            let agents = if buckets.is_empty() {
                scenario.generate_agents_randomly(config.num_agents, &mut rng)?
            } else {
                scenario.generate_agents_by_buckets(&buckets, &mut rng)?
            };
            let name = format!("{map_name}-{}-{case}", agents.len());
            Ok(Task {
                id: case + 1,
                instance: Instance::new(name, map.clone(), agents)?,
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let config = if let Some(config_file) = cli.config.as_ref() {
        let config_str = std::fs::read_to_string(config_file)?;
        Config::from_yaml_str(&config_str).with_context(|| format!("error with config file: {config_file}"))?
    } else {
        info!("No config file specified, using default config");
        Config::default()
    }
    .override_from_command_line(&cli)?;

    let tasks = load_tasks(&config)?;
    info!("Loaded {} instances", tasks.len());

    let baseline: Arc<dyn OptimalityBaseline> = match &config.expert_dir {
        Some(dir) => Arc::new(ExpertSolution::new(dir, config.expert_prefix.clone())),
        None => Arc::new(IndividualShortestPaths),
    };

    let output_dir = config.output_dir.clone();
    let report = run_batch(tasks, Arc::new(config), baseline).await?;
    for failure in &report.failures {
        warn!("case {} ({}) failed: {}", failure.id, failure.name, failure.error);
    }
    report.summary.print();

    let summary_path = Path::new(&output_dir).join("summary.json");
    let writer = BufWriter::new(
        File::create(&summary_path).with_context(|| format!("cannot create {summary_path:?}"))?,
    );
    serde_json::to_writer_pretty(writer, &report.summary)?;

    Ok(())
}
