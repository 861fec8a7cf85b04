//! Domain invariants for conflict graphs and DMC ordering
//!
//! Used by debug assertions in the flows and by the test suites.

use super::entities::{ConflictGraph, ExecutionSchedule, ParallelGroup};
use super::value_objects::{Bytes, CallKey, TxId};
use std::collections::HashSet;

/// Dependencies are respected: if A → B exists, A executes before B.
pub fn invariant_topological_order(schedule: &ExecutionSchedule, graph: &ConflictGraph) -> bool {
    let mut executed: HashSet<TxId> = HashSet::new();

    for group in &schedule.parallel_groups {
        for tx in &group.transactions {
            let blocked = graph
                .edges
                .iter()
                .any(|edge| edge.to == *tx && !executed.contains(&edge.from));
            if blocked {
                return false;
            }
        }

        executed.extend(group.transactions.iter().copied());
    }

    true
}

/// Edges only point forward in submission order, which also rules out cycles.
pub fn invariant_submission_order(graph: &ConflictGraph) -> bool {
    graph.edges.iter().all(|edge| edge.from < edge.to)
}

/// Transactions in the same parallel group have no edge between them.
pub fn invariant_parallel_safety(group: &ParallelGroup, graph: &ConflictGraph) -> bool {
    for i in 0..group.transactions.len() {
        for j in (i + 1)..group.transactions.len() {
            let tx_i = group.transactions[i];
            let tx_j = group.transactions[j];

            if graph.has_edge(tx_i, tx_j) || graph.has_edge(tx_j, tx_i) {
                return false;
            }
        }
    }

    true
}

/// Every node is scheduled exactly once.
pub fn invariant_completeness(schedule: &ExecutionSchedule, graph: &ConflictGraph) -> bool {
    let flat = schedule.flatten();
    let scheduled: HashSet<TxId> = flat.iter().copied().collect();

    flat.len() == graph.node_count() && scheduled.len() == graph.node_count()
}

/// Every edge joins two transactions sharing a critical field, in
/// submission order, and every sharing pair is connected by a path.
/// Transactions with disjoint fields never get a direct edge.
pub fn invariant_shared_field_edges(fields: &[Vec<Bytes>], graph: &ConflictGraph) -> bool {
    let shares = |i: TxId, j: TxId| fields[i].iter().any(|f| fields[j].contains(f));

    if graph
        .edges
        .iter()
        .any(|edge| edge.from >= edge.to || !shares(edge.from, edge.to))
    {
        return false;
    }

    (0..fields.len()).all(|i| {
        let reachable = reachable_from(graph, i);
        ((i + 1)..fields.len()).all(|j| !shares(i, j) || reachable.contains(&j))
    })
}

fn reachable_from(graph: &ConflictGraph, start: TxId) -> HashSet<TxId> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        for &next in &graph.adjacency[node] {
            if seen.insert(next) {
                stack.push(next);
            }
        }
    }
    seen
}

/// Resumed calls are processed by context ascending, seq descending.
pub fn invariant_resume_order(processed: &[CallKey]) -> bool {
    processed
        .windows(2)
        .all(|pair| pair[0].resume_order() < pair[1].resume_order())
}
