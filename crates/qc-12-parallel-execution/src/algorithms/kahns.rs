//! Kahn's Topological Sort Algorithm
//!
//! O(V + E), detects cycles, and yields the parallel levels of a conflict
//! graph. The DAG runner does not need the levels to dispatch work; they
//! validate a graph before a run and feed `DagRunStats`.

use crate::domain::entities::{ConflictGraph, ExecutionSchedule, ParallelGroup};
use crate::domain::errors::OrderingError;
use crate::domain::value_objects::TxId;

/// Perform Kahn's topological sort on the conflict graph.
///
/// Transactions in the same group can execute concurrently. Groups are
/// sorted ascending so the result is deterministic.
pub fn kahns_topological_sort(graph: &ConflictGraph) -> Result<ExecutionSchedule, OrderingError> {
    if graph.node_count() == 0 {
        return Ok(ExecutionSchedule::new(vec![]));
    }

    let mut in_degree = graph.in_degree.clone();
    let mut queue: Vec<TxId> = graph.zero_in_degree_nodes();

    let mut groups: Vec<ParallelGroup> = Vec::new();
    let mut scheduled_count = 0;

    while !queue.is_empty() {
        let current_group = std::mem::take(&mut queue);
        scheduled_count += current_group.len();

        let mut next_queue: Vec<TxId> = Vec::new();
        for &node in &current_group {
            for &neighbor in &graph.adjacency[node] {
                let degree = &mut in_degree[neighbor];
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    next_queue.push(neighbor);
                }
            }
        }

        groups.push(ParallelGroup::new(groups.len(), current_group));

        next_queue.sort_unstable();
        queue = next_queue;
    }

    if scheduled_count < graph.node_count() {
        return Err(OrderingError::CycleDetected);
    }

    Ok(ExecutionSchedule::new(groups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ConflictEdge;
    use crate::domain::invariants::{
        invariant_completeness, invariant_parallel_safety, invariant_topological_order,
    };

    fn graph_with(nodes: usize, edges: &[(TxId, TxId)]) -> ConflictGraph {
        let mut graph = ConflictGraph::with_nodes(nodes);
        for (from, to) in edges {
            graph.add_edge(ConflictEdge::new(*from, *to, vec![]));
        }
        graph
    }

    /// A → B → C: three groups of one
    #[test]
    fn test_kahns_simple_chain() {
        let graph = graph_with(3, &[(0, 1), (1, 2)]);
        let schedule = kahns_topological_sort(&graph).unwrap();

        assert_eq!(schedule.parallel_groups.len(), 3);
        assert_eq!(schedule.max_parallelism, 1);
        assert_eq!(schedule.flatten(), vec![0, 1, 2]);
    }

    #[test]
    fn test_kahns_fully_parallel() {
        let graph = graph_with(3, &[]);
        let schedule = kahns_topological_sort(&graph).unwrap();

        assert_eq!(schedule.parallel_groups.len(), 1);
        assert_eq!(schedule.max_parallelism, 3);
    }

    /// Diamond: [A], [B, C], [D]
    #[test]
    fn test_kahns_diamond_graph() {
        let graph = graph_with(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let schedule = kahns_topological_sort(&graph).unwrap();

        assert_eq!(schedule.parallel_groups[0].transactions, vec![0]);
        assert_eq!(schedule.parallel_groups[1].transactions, vec![1, 2]);
        assert_eq!(schedule.parallel_groups[2].transactions, vec![3]);
        assert!(invariant_topological_order(&schedule, &graph));
        assert!(invariant_completeness(&schedule, &graph));
        for group in &schedule.parallel_groups {
            assert!(invariant_parallel_safety(group, &graph));
        }
    }

    #[test]
    fn test_cycle_detected() {
        let graph = graph_with(3, &[(0, 1), (1, 2), (2, 0)]);
        assert!(matches!(
            kahns_topological_sort(&graph),
            Err(OrderingError::CycleDetected)
        ));
    }

    #[test]
    fn test_empty_graph() {
        let schedule = kahns_topological_sort(&ConflictGraph::default()).unwrap();
        assert_eq!(schedule.total_transactions, 0);
    }
}
