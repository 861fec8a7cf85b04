//! Algorithms module for Parallel Execution
//!
//! Contains:
//! - Critical field extraction
//! - Conflict graph builder
//! - Kahn's topological sort
//! - DAG runner

pub mod critical_fields;
pub mod dag_builder;
pub mod dag_runner;
pub mod kahns;

pub use critical_fields::{
    extract_critical_keys, ConflictField, ConflictFieldKind, CriticalFields, EnvKind,
};
pub use dag_builder::build_conflict_graph;
pub use dag_runner::DagRunner;
pub use kahns::kahns_topological_sort;
