//! Conflict graph entities for DAG execution

use super::value_objects::{Bytes, TxId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Conflict graph edge: `from` must finish before `to` starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEdge {
    pub from: TxId,
    pub to: TxId,
    /// First shared critical field that caused the edge
    pub field: Bytes,
}

impl ConflictEdge {
    pub fn new(from: TxId, to: TxId, field: Bytes) -> Self {
        Self { from, to, field }
    }
}

/// DAG over transaction ids `0..node_count`.
#[derive(Debug, Clone, Default)]
pub struct ConflictGraph {
    /// All edges (dependencies)
    pub edges: Vec<ConflictEdge>,
    /// Adjacency list: from -> [to, to, ...]
    pub adjacency: Vec<Vec<TxId>>,
    /// In-degree count for each node
    pub in_degree: Vec<usize>,
}

impl ConflictGraph {
    pub fn with_nodes(node_count: usize) -> Self {
        Self {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); node_count],
            in_degree: vec![0; node_count],
        }
    }

    /// Add a dependency edge
    pub fn add_edge(&mut self, edge: ConflictEdge) {
        self.adjacency[edge.from].push(edge.to);
        self.in_degree[edge.to] += 1;
        self.edges.push(edge);
    }

    /// Check if an edge exists from -> to
    pub fn has_edge(&self, from: TxId, to: TxId) -> bool {
        self.adjacency
            .get(from)
            .map(|neighbors| neighbors.contains(&to))
            .unwrap_or(false)
    }

    /// Nodes that can start immediately, ascending
    pub fn zero_in_degree_nodes(&self) -> Vec<TxId> {
        self.in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.in_degree.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// Transactions that can run concurrently once all earlier groups finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub level: usize,
    pub transactions: Vec<TxId>,
}

impl ParallelGroup {
    pub fn new(level: usize, transactions: Vec<TxId>) -> Self {
        Self {
            level,
            transactions,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Level decomposition of a conflict graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSchedule {
    pub parallel_groups: Vec<ParallelGroup>,
    pub total_transactions: usize,
    pub max_parallelism: usize,
}

impl ExecutionSchedule {
    pub fn new(groups: Vec<ParallelGroup>) -> Self {
        let total = groups.iter().map(|g| g.len()).sum();
        let max_par = groups.iter().map(|g| g.len()).max().unwrap_or(0);

        Self {
            parallel_groups: groups,
            total_transactions: total,
            max_parallelism: max_par,
        }
    }

    /// Transactions in a valid serial order
    pub fn flatten(&self) -> Vec<TxId> {
        self.parallel_groups
            .iter()
            .flat_map(|g| g.transactions.iter().copied())
            .collect()
    }
}

/// Outcome of one DAG run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagRunStats {
    pub nodes_total: usize,
    pub nodes_executed: usize,
    pub levels: usize,
    pub max_parallelism: usize,
    pub paused: bool,
    pub elapsed: Duration,
}
