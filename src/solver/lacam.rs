use std::time::Instant;
use tracing::{debug, info, instrument, trace};

use super::highlevel::{HighLevelNode, NodeArena, NodeId};
use super::shield::{CollisionShield, ShieldOutcome};
use super::TieBreak;
use crate::comm::{CommGraph, CommRadius, DistanceMetric};
use crate::common::{agents_off_goal, JointState, Position};
use crate::error::EpisodeError;
use crate::map::GridMap;
use crate::oracle::{ActionOracle, ActionPreference};
use crate::stat::SearchStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Solved { path: Vec<JointState> },
    /// Best partial path: towards the deepest node on the stack when the
    /// budget ran out, or the deepest node overall if the tree was exhausted.
    NotSolved {
        path: Vec<JointState>,
        budget_exceeded: bool,
    },
}

impl SearchOutcome {
    pub fn is_solved(&self) -> bool {
        matches!(self, SearchOutcome::Solved { .. })
    }

    pub fn path(&self) -> &[JointState] {
        match self {
            SearchOutcome::Solved { path } | SearchOutcome::NotSolved { path, .. } => path,
        }
    }
}

pub struct JointSearch<'a> {
    map: &'a GridMap,
    goals: Vec<Position>,
    tie_break: TieBreak,
    allow_swaps: bool,
    comm_radius: CommRadius,
    metric: DistanceMetric,
    node_budget: usize,
    pub stats: SearchStats,
    pub oracle_times_us: Vec<usize>,
    pub resolve_times_us: Vec<usize>,
}

impl<'a> JointSearch<'a> {
    pub fn new(map: &'a GridMap, goals: Vec<Position>, node_budget: usize) -> Self {
        JointSearch {
            map,
            goals,
            tie_break: TieBreak::default(),
            allow_swaps: false,
            comm_radius: CommRadius::default(),
            metric: DistanceMetric::default(),
            node_budget,
            stats: SearchStats::default(),
            oracle_times_us: Vec::new(),
            resolve_times_us: Vec::new(),
        }
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn with_swaps(mut self, allow_swaps: bool) -> Self {
        self.allow_swaps = allow_swaps;
        self
    }

    pub fn with_communication(mut self, comm_radius: CommRadius, metric: DistanceMetric) -> Self {
        self.comm_radius = comm_radius;
        self.metric = metric;
        self
    }

    fn query(
        &mut self,
        oracle: &mut dyn ActionOracle,
        positions: &[Position],
    ) -> anyhow::Result<Vec<ActionPreference>> {
        let graph = CommGraph::build(positions, self.comm_radius, self.metric);
        let oracle_start_time = Instant::now();
        let preferences = oracle.predict(positions, &self.goals, &graph)?;
        self.oracle_times_us
            .push(oracle_start_time.elapsed().as_micros() as usize);
        self.stats.oracle_calls += 1;
        if preferences.len() != positions.len() {
            anyhow::bail!(
                "oracle returned {} preferences for {} agents",
                preferences.len(),
                positions.len()
            );
        }
        Ok(preferences)
    }

    #[instrument(skip_all, name = "lacam", fields(agents = start.len(), budget = self.node_budget), level = "debug")]
    pub fn solve(
        &mut self,
        start: &[Position],
        oracle: &mut dyn ActionOracle,
    ) -> anyhow::Result<SearchOutcome> {
        let solve_start_time = Instant::now();
        let outcome = self.search(start, oracle);
        self.stats.time_us = solve_start_time.elapsed().as_micros() as usize;
        self.stats.print();
        outcome
    }

    fn search(
        &mut self,
        start: &[Position],
        oracle: &mut dyn ActionOracle,
    ) -> anyhow::Result<SearchOutcome> {
        let shield = CollisionShield::new(self.map, self.tie_break, self.allow_swaps);
        let mut arena = NodeArena::default();

        let preferences = self.query(oracle, start)?;
        let root = arena.insert(HighLevelNode::root(
            start.to_vec(),
            &self.goals,
            preferences,
            self.tie_break,
        ));
        self.stats.nodes_created += 1;
        if arena[root].is_goal(&self.goals) {
            return Ok(SearchOutcome::Solved {
                path: arena.path_to(root),
            });
        }

        let mut stack: Vec<NodeId> = vec![root];
        while let Some(current) = stack.pop() {
            if self.stats.expansions >= self.node_budget {
                stack.push(current);
                let deepest = deepest_on_stack(&arena, &stack);
                info!(
                    "LaCAM exceeded {} expansions, {} agents off goal at depth {}",
                    self.node_budget,
                    agents_off_goal(&arena[deepest].positions, &self.goals),
                    arena[deepest].depth
                );
                return Ok(SearchOutcome::NotSolved {
                    path: arena.path_to(deepest),
                    budget_exceeded: true,
                });
            }

            let Some(constraint) = arena[current].next_branch() else {
                trace!("node {current} exhausted, backtrack");
                self.stats.backtracks += 1;
                continue;
            };
            if arena[current].has_branches() {
                stack.push(current);
            }
            self.stats.expansions += 1;

            let node = &arena[current];
            let resolve_start_time = Instant::now();
            let outcome = shield.resolve(
                &node.positions,
                &node.priorities,
                &node.preferences,
                &constraint,
            );
            self.resolve_times_us
                .push(resolve_start_time.elapsed().as_micros() as usize);
            let joint_move = match outcome {
                ShieldOutcome::Resolved(joint_move) => joint_move,
                ShieldOutcome::Infeasible { agent, action } => {
                    trace!("constraint {constraint:?} infeasible at agent {agent} {action:?}");
                    self.stats.infeasible_branches += 1;
                    continue;
                }
            };

            if let Some(collision) = joint_move.realized_collision {
                return Err(EpisodeError::RealizedCollision {
                    step: node.depth + 1,
                    first: collision.first,
                    second: collision.second,
                    cell: collision.cell,
                }
                .into());
            }

            let next = match arena.lookup(&joint_move.next) {
                Some(existing) => {
                    self.stats.memo_hits += 1;
                    existing
                }
                None => {
                    let preferences = self.query(oracle, &joint_move.next)?;
                    let child = arena[current].child(
                        current,
                        joint_move.next,
                        &self.goals,
                        preferences,
                        self.tie_break,
                    );
                    self.stats.nodes_created += 1;
                    arena.insert(child)
                }
            };

            if arena[next].is_goal(&self.goals) {
                let path = arena.path_to(next);
                debug!(
                    "LaCAM reached goal at depth {} after {} expansions",
                    arena[next].depth, self.stats.expansions
                );
                return Ok(SearchOutcome::Solved { path });
            }

            stack.push(next);
        }

        info!("LaCAM exhausted the search tree without reaching the goal");
        let deepest = (0..arena.len())
            .max_by_key(|&id| arena[id].depth)
            .unwrap_or(root);
        Ok(SearchOutcome::NotSolved {
            path: arena.path_to(deepest),
            budget_exceeded: false,
        })
    }
}

fn deepest_on_stack(arena: &NodeArena, stack: &[NodeId]) -> NodeId {
    stack
        .iter()
        .rev()
        .copied()
        .reduce(|best, id| if arena[id].depth > arena[best].depth { id } else { best })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Action;
    use crate::oracle::DistanceOracle;
    use crate::solver::detect_collision;

    struct CountingOracle {
        inner: DistanceOracle,
        seen: Vec<JointState>,
    }

    impl ActionOracle for CountingOracle {
        fn predict(
            &mut self,
            positions: &[Position],
            goals: &[Position],
            graph: &CommGraph,
        ) -> anyhow::Result<Vec<ActionPreference>> {
            self.seen.push(positions.to_vec());
            self.inner.predict(positions, goals, graph)
        }
    }

    struct LazyOracle;

    impl ActionOracle for LazyOracle {
        fn predict(
            &mut self,
            positions: &[Position],
            _goals: &[Position],
            _graph: &CommGraph,
        ) -> anyhow::Result<Vec<ActionPreference>> {
            Ok(vec![ActionPreference::favoring(Action::Stay); positions.len()])
        }
    }

    fn assert_valid_path(map: &GridMap, path: &[JointState]) {
        for window in path.windows(2) {
            let (current, next) = (&window[0], &window[1]);
            assert!(detect_collision(current, next, false).is_none());
            for (&from, &to) in current.iter().zip(next) {
                assert!(map.is_free(to));
                assert!(Action::between(from, to).is_some());
            }
        }
    }

    #[test]
    fn test_corridor_swap_not_solved() {
        let map = GridMap::open(1, 3);
        let goals = vec![(0, 2), (0, 0)];
        let start = [(0, 0), (0, 2)];
        let mut oracle = DistanceOracle::new(&map, &goals);
        let mut search = JointSearch::new(&map, goals, 50);

        let outcome = search.solve(&start, &mut oracle).unwrap();
        assert!(!outcome.is_solved());
        assert!(search.stats.expansions <= 50);
        assert_eq!(outcome.path()[0], start.to_vec());
        assert_valid_path(&map, outcome.path());
    }

    #[test]
    fn test_search_finds_detour_greedy_cannot() {
        // Agents must trade ends of a corridor with one side pocket at (1, 1).
        let map = GridMap::from_rows(&["...", "@.@"]);
        let goals = vec![(0, 2), (0, 0)];
        let start = [(0, 0), (0, 2)];
        let mut oracle = DistanceOracle::new(&map, &goals);
        let mut search = JointSearch::new(&map, goals.clone(), 2000);

        let outcome = search.solve(&start, &mut oracle).unwrap();
        assert!(outcome.is_solved(), "stats: {:?}", search.stats);
        let path = outcome.path();
        assert_eq!(path.first(), Some(&start.to_vec()));
        assert_eq!(path.last(), Some(&goals));
        assert_valid_path(&map, path);
    }

    #[test]
    fn test_memoized_states_query_oracle_once() {
        let map = GridMap::from_rows(&["...", "@.@"]);
        let goals = vec![(0, 2), (0, 0)];
        let start = [(0, 0), (0, 2)];
        let mut oracle = CountingOracle {
            inner: DistanceOracle::new(&map, &goals),
            seen: Vec::new(),
        };
        let mut search = JointSearch::new(&map, goals, 2000);
        search.solve(&start, &mut oracle).unwrap();

        let mut distinct = oracle.seen.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), oracle.seen.len());
        assert_eq!(search.stats.nodes_created, oracle.seen.len());
        assert_eq!(search.stats.oracle_calls, oracle.seen.len());
        assert!(search.stats.memo_hits > 0);
        assert_eq!(search.oracle_times_us.len(), search.stats.oracle_calls);
        assert_eq!(search.resolve_times_us.len(), search.stats.expansions);
    }

    #[test]
    fn test_constraints_overrule_lazy_oracle() {
        let map = GridMap::open(3, 3);
        let goals = vec![(2, 2), (0, 0)];
        let start = [(0, 0), (2, 2)];
        let mut search = JointSearch::new(&map, goals.clone(), 5000);

        let outcome = search.solve(&start, &mut LazyOracle).unwrap();
        assert!(outcome.is_solved());
        assert_eq!(outcome.path().last(), Some(&goals));
        assert_valid_path(&map, outcome.path());
    }

    #[test]
    fn test_start_at_goal() {
        let map = GridMap::open(2, 2);
        let goals = vec![(0, 0), (1, 1)];
        let mut search = JointSearch::new(&map, goals.clone(), 10);
        let outcome = search.solve(&goals, &mut LazyOracle).unwrap();
        assert_eq!(outcome, SearchOutcome::Solved { path: vec![goals] });
        assert_eq!(search.stats.expansions, 0);
    }

    #[test]
    fn test_search_is_deterministic() {
        let map = GridMap::from_rows(&["....", ".@@.", "...."]);
        let goals = vec![(2, 3), (0, 0), (2, 0)];
        let start = [(0, 0), (2, 3), (0, 3)];

        let run = || {
            let mut oracle = DistanceOracle::new(&map, &goals);
            let mut search = JointSearch::new(&map, goals.clone(), 3000);
            let outcome = search.solve(&start, &mut oracle).unwrap();
            (outcome, search.stats.expansions, search.stats.nodes_created)
        };
        assert_eq!(run(), run());
    }
}
