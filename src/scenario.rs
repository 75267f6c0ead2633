use anyhow::{anyhow, Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;
use tracing::info;

use crate::common::{Agent, Position};
use crate::error::InstanceError;
use crate::map::GridMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub map: GridMap,
    pub agents: Vec<Agent>,
}

impl Instance {
    pub fn new(name: impl Into<String>, map: GridMap, agents: Vec<Agent>) -> Result<Self, InstanceError> {
        map.validate_agents(&agents)?;
        Ok(Instance {
            name: name.into(),
            map,
            agents,
        })
    }

    pub fn starts(&self) -> Vec<Position> {
        self.agents.iter().map(|agent| agent.start).collect()
    }

    pub fn goals(&self) -> Vec<Position> {
        self.agents.iter().map(|agent| agent.goal).collect()
    }

    pub fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("cannot open instance {path:?}"))?;
        let yaml: InstanceYaml = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("cannot parse instance {path:?}"))?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(yaml.into_instance(name)?)
    }

    pub fn from_yaml_str(name: &str, yaml: &str) -> Result<Self> {
        let yaml: InstanceYaml = serde_yaml::from_str(yaml)?;
        Ok(yaml.into_instance(name.to_string())?)
    }

    pub fn write_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_yaml::to_writer(BufWriter::new(file), &InstanceYaml::from(self))?;
        Ok(())
    }
}

/// On-disk layout: `[x, y]` pairs where x is the column and y the row.
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceYaml {
    pub map: MapYaml,
    pub agents: Vec<AgentYaml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MapYaml {
    pub dimensions: [usize; 2],
    #[serde(default)]
    pub obstacles: Vec<[usize; 2]>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentYaml {
    #[serde(default)]
    pub name: String,
    pub start: [usize; 2],
    pub goal: [usize; 2],
}

fn from_xy(xy: [usize; 2]) -> Position {
    (xy[1], xy[0])
}

fn to_xy(position: Position) -> [usize; 2] {
    [position.1, position.0]
}

impl InstanceYaml {
    pub fn into_instance(self, name: String) -> Result<Instance, InstanceError> {
        let [width, height] = self.map.dimensions;
        let map = GridMap::with_obstacles(
            height,
            width,
            self.map.obstacles.into_iter().map(from_xy),
        );
        let agents = self
            .agents
            .into_iter()
            .enumerate()
            .map(|(id, agent)| Agent {
                id,
                start: from_xy(agent.start),
                goal: from_xy(agent.goal),
            })
            .collect();
        Instance::new(name, map, agents)
    }
}

impl From<&Instance> for InstanceYaml {
    fn from(instance: &Instance) -> Self {
        InstanceYaml {
            map: MapYaml {
                dimensions: [instance.map.width, instance.map.height],
                obstacles: instance.map.obstacles().into_iter().map(to_xy).collect(),
            },
            agents: instance
                .agents
                .iter()
                .map(|agent| AgentYaml {
                    name: format!("agent{}", agent.id),
                    start: to_xy(agent.start),
                    goal: to_xy(agent.goal),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub start: Position,
    pub goal: Position,
}

type Bucket = Vec<Route>;

#[derive(Debug)]
pub struct Scenario {
    pub map: String,
    pub map_width: usize,
    pub map_height: usize,
    pub buckets: BTreeMap<usize, Bucket>,
}

impl Scenario {
    pub fn load_from_scen(path: &str) -> Result<Scenario> {
        let file = File::open(path).with_context(|| format!("cannot open scenario {path}"))?;
        let mut lines = BufReader::new(file).lines();

        // First line is "version x.x" which we can skip
        let _version = lines.next().transpose()?;

        let mut scenario = Scenario {
            map: String::new(),
            map_width: 0,
            map_height: 0,
            buckets: BTreeMap::new(),
        };

        for line in lines {
            let line = line?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }
            if parts.len() < 8 {
                return Err(anyhow!("malformed scenario line in {path}: {line}"));
            }
            let field = |index: usize| -> Result<usize> {
                parts[index]
                    .parse()
                    .with_context(|| format!("invalid field {index} in {path}: {line}"))
            };

            let bucket_index = field(0)?;
            // Columns 4..8 are x/y pairs; positions are stored as (row, col).
            let route = Route {
                start: (field(5)?, field(4)?),
                goal: (field(7)?, field(6)?),
            };

            if scenario.map.is_empty() {
                scenario.map = parts[1].to_string();
                scenario.map_width = field(2)?;
                scenario.map_height = field(3)?;
            }

            scenario.buckets.entry(bucket_index).or_default().push(route);
        }

        Ok(scenario)
    }

    pub fn generate_agents_by_buckets<R: Rng + ?Sized>(
        &self,
        agent_buckets: &[usize],
        rng: &mut R,
    ) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = Vec::new();
        let mut used_routes: BTreeMap<usize, HashSet<usize>> = BTreeMap::new();

        for (agent_id, &bucket_index) in agent_buckets.iter().enumerate() {
            let bucket = self
                .buckets
                .get(&bucket_index)
                .ok_or_else(|| anyhow!("bucket {bucket_index} not found"))?;

            let available_routes: Vec<usize> = (0..bucket.len())
                .filter(|idx| {
                    used_routes
                        .get(&bucket_index)
                        .is_none_or(|used| !used.contains(idx))
                })
                .collect();

            let route_index = available_routes
                .choose(rng)
                .ok_or_else(|| anyhow!("no available routes left in bucket {bucket_index}"))?;

            let route = &bucket[*route_index];
            agents.push(Agent {
                id: agent_id,
                start: route.start,
                goal: route.goal,
            });

            used_routes
                .entry(bucket_index)
                .or_default()
                .insert(*route_index);
        }

        info!("Generate scen: {agents:?}");
        Ok(agents)
    }

    pub fn generate_agents_randomly<R: Rng + ?Sized>(
        &self,
        num_agents: usize,
        rng: &mut R,
    ) -> Result<Vec<Agent>> {
        let mut available_routes: Vec<Route> = self.buckets.values().flatten().cloned().collect();
        available_routes.sort();
        available_routes.dedup();

        if available_routes.len() < num_agents {
            return Err(anyhow!(
                "not enough unique routes ({}) for {num_agents} agents",
                available_routes.len()
            ));
        }

        available_routes.shuffle(rng);

        let mut agents: Vec<Agent> = Vec::new();
        let mut used_starts = HashSet::new();
        let mut used_goals = HashSet::new();
        for route in available_routes {
            if agents.len() == num_agents {
                break;
            }
            let Route { start, goal } = route;
            // Routes from different buckets may share endpoints.
            if used_starts.contains(&start) || used_goals.contains(&goal) {
                continue;
            }
            used_starts.insert(start);
            used_goals.insert(goal);
            agents.push(Agent {
                id: agents.len(),
                start,
                goal,
            });
        }

        if agents.len() < num_agents {
            return Err(anyhow!(
                "only {} routes with distinct endpoints for {num_agents} agents",
                agents.len()
            ));
        }

        info!("Generate scen: {agents:?}");
        Ok(agents)
    }
}
