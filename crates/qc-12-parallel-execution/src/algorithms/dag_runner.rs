//! DAG Runner
//!
//! Executes a conflict graph on a rayon pool. Zero in-degree nodes are
//! spawned first; finishing a node decrements its dependents and spawns
//! those that reach zero. A pause flag is checked before every node.

use super::kahns::kahns_topological_sort;
use crate::domain::entities::{ConflictGraph, DagRunStats};
use crate::domain::errors::OrderingError;
use crate::domain::value_objects::TxId;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info};

struct RunContext<'a, F> {
    graph: &'a ConflictGraph,
    in_degree: Vec<AtomicUsize>,
    pause: &'a AtomicBool,
    executed: AtomicUsize,
    execute: &'a F,
}

pub struct DagRunner;

impl DagRunner {
    /// Run every node of `graph` through `execute`, respecting edges.
    ///
    /// Returns once all nodes ran, or once the remaining ones were skipped
    /// because `pause` was raised. Nodes already running finish normally.
    pub fn run<F>(
        graph: &ConflictGraph,
        pool: &ThreadPool,
        pause: &AtomicBool,
        execute: F,
    ) -> Result<DagRunStats, OrderingError>
    where
        F: Fn(TxId) + Sync,
    {
        let started = Instant::now();
        let schedule = kahns_topological_sort(graph)?;

        let ctx = RunContext {
            graph,
            in_degree: graph
                .in_degree
                .iter()
                .map(|degree| AtomicUsize::new(*degree))
                .collect(),
            pause,
            executed: AtomicUsize::new(0),
            execute: &execute,
        };

        pool.scope(|scope| {
            for id in graph.zero_in_degree_nodes() {
                spawn_node(scope, id, &ctx);
            }
        });

        let stats = DagRunStats {
            nodes_total: graph.node_count(),
            nodes_executed: ctx.executed.load(Ordering::Acquire),
            levels: schedule.parallel_groups.len(),
            max_parallelism: schedule.max_parallelism,
            paused: pause.load(Ordering::Acquire),
            elapsed: started.elapsed(),
        };

        info!(
            nodes = stats.nodes_total,
            executed = stats.nodes_executed,
            levels = stats.levels,
            max_parallelism = stats.max_parallelism,
            paused = stats.paused,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "DAG run complete"
        );

        Ok(stats)
    }
}

fn spawn_node<'scope, 'a: 'scope, F>(
    scope: &rayon::Scope<'scope>,
    id: TxId,
    ctx: &'scope RunContext<'a, F>,
) where
    F: Fn(TxId) + Sync,
{
    scope.spawn(move |scope| {
        if ctx.pause.load(Ordering::Acquire) {
            debug!(tx = id, "DAG paused, skipping node");
            return;
        }

        (ctx.execute)(id);
        ctx.executed.fetch_add(1, Ordering::AcqRel);

        for &next in &ctx.graph.adjacency[id] {
            if ctx.in_degree[next].fetch_sub(1, Ordering::AcqRel) == 1 {
                spawn_node(scope, next, ctx);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ConflictEdge;
    use parking_lot::Mutex;

    fn pool(threads: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    fn graph_with(nodes: usize, edges: &[(TxId, TxId)]) -> ConflictGraph {
        let mut graph = ConflictGraph::with_nodes(nodes);
        for (from, to) in edges {
            graph.add_edge(ConflictEdge::new(*from, *to, vec![]));
        }
        graph
    }

    #[test]
    fn test_runs_every_node_once() {
        let graph = graph_with(5, &[]);
        let seen = Mutex::new(Vec::new());
        let pause = AtomicBool::new(false);

        let stats = DagRunner::run(&graph, &pool(4), &pause, |id| seen.lock().push(id)).unwrap();

        let mut seen = seen.into_inner();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(stats.nodes_executed, 5);
        assert_eq!(stats.levels, 1);
        assert!(!stats.paused);
    }

    #[test]
    fn test_respects_edges() {
        let graph = graph_with(4, &[(0, 1), (1, 3), (0, 2)]);
        let order = Mutex::new(Vec::new());
        let pause = AtomicBool::new(false);

        DagRunner::run(&graph, &pool(4), &pause, |id| order.lock().push(id)).unwrap();

        let order = order.into_inner();
        let pos = |id: TxId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(3));
        assert!(pos(0) < pos(2));
    }

    #[test]
    fn test_pause_stops_dispatch() {
        let graph = graph_with(3, &[(0, 1), (1, 2)]);
        let pause = AtomicBool::new(false);
        let seen = Mutex::new(Vec::new());

        let stats = DagRunner::run(&graph, &pool(2), &pause, |id| {
            seen.lock().push(id);
            pause.store(true, Ordering::Release);
        })
        .unwrap();

        assert_eq!(seen.into_inner(), vec![0]);
        assert_eq!(stats.nodes_executed, 1);
        assert!(stats.paused);
    }

    #[test]
    fn test_cyclic_graph_is_rejected() {
        let graph = graph_with(2, &[(0, 1), (1, 0)]);
        let pause = AtomicBool::new(false);

        let result = DagRunner::run(&graph, &pool(1), &pause, |_| {});
        assert!(matches!(result, Err(OrderingError::CycleDetected)));
    }
}
