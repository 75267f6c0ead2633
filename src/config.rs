use anyhow::anyhow;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::comm::{CommRadius, DistanceMetric};
use crate::driver::DriverOptions;
use crate::oracle::{check_noise, OracleKind};
use crate::solver::{ShieldMode, TieBreak};

#[derive(Parser, Debug)]
#[command(
    name = "mapf-shield",
    about = "Collision shielding and LaCAM-style joint search for multi-agent path finding.",
    version = "0.1"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file")]
    pub config: Option<String>,

    #[arg(long, help = "YAML instance files to run", num_args = 1..)]
    pub instances: Vec<String>,

    #[arg(long, help = "Path to a MovingAI map file")]
    pub map_path: Option<String>,

    #[arg(long, help = "Path to a MovingAI scenario file")]
    pub scen_path: Option<String>,

    #[arg(long, help = "Number of agents sampled per scenario case")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Agents drawn per scenario bucket", use_value_delimiter = true)]
    pub agents_dist: Vec<usize>,

    #[arg(long, help = "Number of cases sampled from the scenario file")]
    pub num_cases: Option<usize>,

    #[arg(long, help = "Directory for result files")]
    pub output_dir: Option<String>,

    #[arg(long, help = "Directory of expert solutions used as the optimality reference")]
    pub expert_dir: Option<String>,

    #[arg(long, help = "Communication radius, a number or 'unbounded'")]
    pub comm_radius: Option<CommRadius>,

    #[arg(long, value_enum, help = "Distance metric for the communication radius")]
    pub metric: Option<DistanceMetric>,

    #[arg(long, value_enum, help = "Shielding mode")]
    pub shield_mode: Option<ShieldMode>,

    #[arg(long, value_enum, help = "Order of equal-priority agents")]
    pub tie_break: Option<TieBreak>,

    #[arg(long, help = "Maximum steps per episode")]
    pub step_budget: Option<usize>,

    #[arg(long, help = "Step budget as a multiple of the lower-bound makespan")]
    pub budget_factor: Option<f64>,

    #[arg(long, help = "Maximum branch expansions of the joint search")]
    pub node_budget: Option<usize>,

    #[arg(long, help = "Allow two agents to trade cells in one step")]
    pub allow_swaps: bool,

    #[arg(long, help = "Number of worker tasks")]
    pub workers: Option<usize>,

    #[arg(long, help = "Ignore existing result markers")]
    pub restart: bool,

    #[arg(long, help = "Keep the joint trajectory and write schedule files")]
    pub record_trajectory: bool,

    #[arg(long, help = "Uniform noise added to the distance oracle's scores")]
    pub noise: Option<f32>,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instances: Vec<String>,
    pub map_path: Option<String>,
    pub scen_path: Option<String>,
    pub num_agents: usize,
    pub agents_dist: Vec<usize>,
    pub num_cases: usize,
    pub output_dir: String,
    pub expert_dir: Option<String>,
    pub expert_prefix: String,
    pub comm_radius: CommRadius,
    pub metric: DistanceMetric,
    pub shield_mode: ShieldMode,
    pub tie_break: TieBreak,
    pub step_budget: Option<usize>,
    pub budget_factor: f64,
    pub node_budget: usize,
    pub allow_swaps: bool,
    pub workers: usize,
    pub restart: bool,
    pub record_trajectory: bool,
    pub oracle: OracleKind,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            instances: Vec::new(),
            map_path: None,
            scen_path: None,
            num_agents: 10,
            agents_dist: Vec::new(),
            num_cases: 1,
            output_dir: "result".to_string(),
            expert_dir: None,
            expert_prefix: "solution_".to_string(),
            comm_radius: CommRadius::Unbounded,
            metric: DistanceMetric::Euclidean,
            shield_mode: ShieldMode::Greedy,
            tie_break: TieBreak::LowestIndex,
            step_budget: None,
            budget_factor: 3.0,
            node_budget: 500,
            allow_swaps: false,
            workers: 4,
            restart: false,
            record_trajectory: false,
            oracle: OracleKind::Distance,
            seed: 0,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Command-line values take precedence over the file.
    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if !cli.instances.is_empty() {
            self.instances = cli.instances.clone();
        }
        if cli.map_path.is_some() {
            self.map_path = cli.map_path.clone();
        }
        if cli.scen_path.is_some() {
            self.scen_path = cli.scen_path.clone();
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = num_agents;
        }
        if !cli.agents_dist.is_empty() {
            self.agents_dist = cli.agents_dist.clone();
        }
        if let Some(num_cases) = cli.num_cases {
            self.num_cases = num_cases;
        }
        if let Some(output_dir) = &cli.output_dir {
            self.output_dir = output_dir.clone();
        }
        if cli.expert_dir.is_some() {
            self.expert_dir = cli.expert_dir.clone();
        }
        if let Some(comm_radius) = cli.comm_radius {
            self.comm_radius = comm_radius;
        }
        if let Some(metric) = cli.metric {
            self.metric = metric;
        }
        if let Some(shield_mode) = cli.shield_mode {
            self.shield_mode = shield_mode;
        }
        if let Some(tie_break) = cli.tie_break {
            self.tie_break = tie_break;
        }
        if cli.step_budget.is_some() {
            self.step_budget = cli.step_budget;
        }
        if let Some(budget_factor) = cli.budget_factor {
            self.budget_factor = budget_factor;
        }
        if let Some(node_budget) = cli.node_budget {
            self.node_budget = node_budget;
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
            if let OracleKind::Noisy { noise, .. } = self.oracle {
                self.oracle = OracleKind::Noisy { noise, seed };
            }
        }
        if let Some(noise) = cli.noise {
            self.oracle = OracleKind::Noisy {
                noise,
                seed: self.seed,
            };
        }
        self.allow_swaps |= cli.allow_swaps;
        self.restart |= cli.restart;
        self.record_trajectory |= cli.record_trajectory;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instances.is_empty() && (self.map_path.is_none() || self.scen_path.is_none()) {
            return Err(anyhow!(
                "no instances given: pass YAML instance files or both a map and a scenario file"
            ));
        }
        if let CommRadius::Finite(radius) = self.comm_radius {
            if radius.is_nan() || radius < 0.0 {
                return Err(anyhow!("Communication radius must be non-negative, got {radius}"));
            }
        }
        if self.step_budget == Some(0) {
            return Err(anyhow!("Step budget must be positive"));
        }
        if self.budget_factor.is_nan() || self.budget_factor <= 0.0 {
            return Err(anyhow!("Budget factor must be positive, got {}", self.budget_factor));
        }
        if self.node_budget == 0 {
            return Err(anyhow!("Node budget must be positive"));
        }
        if self.workers == 0 {
            return Err(anyhow!("At least one worker is required"));
        }
        if self.num_cases == 0 {
            return Err(anyhow!("At least one case is required"));
        }
        if let OracleKind::Noisy { noise, .. } = self.oracle {
            check_noise(noise)?;
        }
        Ok(())
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            mode: self.shield_mode,
            comm_radius: self.comm_radius,
            metric: self.metric,
            tie_break: self.tie_break,
            allow_swaps: self.allow_swaps,
            node_budget: self.node_budget,
            record_trajectory: self.record_trajectory,
        }
    }
}
