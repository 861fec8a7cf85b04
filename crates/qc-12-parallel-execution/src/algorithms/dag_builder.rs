//! Conflict Graph Builder
//!
//! Builds the DAG of a batch from each transaction's critical fields.
//! Transaction `j` depends on the last earlier transaction that touched
//! each of its fields, so transactions sharing a field stay ordered by
//! submission through a chain of edges.

use crate::domain::entities::{ConflictEdge, ConflictGraph};
use crate::domain::errors::OrderingError;
use crate::domain::value_objects::{Bytes, TxId};
use std::collections::HashMap;
use tracing::debug;

/// Build the conflict graph for `fields`, indexed by transaction id.
///
/// Each transaction gets one edge from the most recent earlier toucher of
/// each of its fields, deduplicated per predecessor. The edge count is
/// bounded by the total number of fields. Fails once more than
/// `max_edge_count` edges would be created.
pub fn build_conflict_graph(
    fields: &[Vec<Bytes>],
    max_edge_count: usize,
) -> Result<ConflictGraph, OrderingError> {
    let mut graph = ConflictGraph::with_nodes(fields.len());

    // field -> last transaction touching it
    let mut last_toucher: HashMap<&[u8], TxId> = HashMap::new();

    for (to, tx_fields) in fields.iter().enumerate() {
        // predecessor -> first shared field
        let mut predecessors: Vec<(TxId, &[u8])> = Vec::new();

        for field in tx_fields {
            if let Some(from) = last_toucher.insert(field.as_slice(), to) {
                if from != to && !predecessors.iter().any(|(p, _)| *p == from) {
                    predecessors.push((from, field.as_slice()));
                }
            }
        }

        predecessors.sort_by_key(|(from, _)| *from);
        for (from, field) in predecessors {
            if graph.edge_count() >= max_edge_count {
                return Err(OrderingError::TooManyEdges {
                    count: graph.edge_count() + 1,
                    max: max_edge_count,
                });
            }
            graph.add_edge(ConflictEdge::new(from, to, field.to_vec()));
        }
    }

    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Built conflict graph"
    );

    Ok(graph)
}
