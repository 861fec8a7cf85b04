//! Configuration for the Parallel Execution Subsystem

use crate::domain::value_objects::SuspensionStrategy;
use serde::{Deserialize, Serialize};
use std::env;

/// Executor configuration, threaded through block context and factory
/// construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Threads driving flows and running DAG nodes
    pub dag_threads: usize,
    /// Idle threads kept for worker-pool units; each suspended unit blocks
    /// one thread and the pool grows past this as needed
    pub worker_pool_threads: usize,
    /// How units suspend on external calls and key-lock requests
    pub suspension: SuspensionStrategy,
    pub is_wasm: bool,
    pub is_auth_check: bool,
    /// Namespace tracked keys by contract address
    pub enable_sharding: bool,
    /// Create DAG flow controllers instead of plain stack flows
    pub enable_dag: bool,
    /// Speculative DAG preparations kept across blocks
    pub dag_cache_capacity: usize,
    /// Parsed conflict-field declarations kept per (contract, selector)
    pub abi_cache_capacity: usize,
    /// Nested call limit; deeper calls revert
    pub max_call_depth: usize,
    /// Maximum edges in a conflict graph (anti-DoS)
    pub max_edge_count: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            dag_threads: cpus,
            worker_pool_threads: cpus * 2,
            suspension: SuspensionStrategy::Coroutine,
            is_wasm: false,
            is_auth_check: false,
            enable_sharding: false,
            enable_dag: true,
            dag_cache_capacity: 16,
            abi_cache_capacity: 1024,
            max_call_depth: 1024,
            max_edge_count: 100_000,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overridden by environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_EXEC_DAG_THREADS`
    /// - `QC_EXEC_WORKER_THREADS`
    /// - `QC_EXEC_SUSPENSION`: `coroutine` or `worker-pool`
    /// - `QC_EXEC_WASM`, `QC_EXEC_AUTH_CHECK`, `QC_EXEC_SHARDING`, `QC_EXEC_DAG`
    /// - `QC_EXEC_DAG_CACHE`, `QC_EXEC_ABI_CACHE`
    /// - `QC_EXEC_MAX_CALL_DEPTH`, `QC_EXEC_MAX_EDGES`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            dag_threads: parse_var("QC_EXEC_DAG_THREADS").unwrap_or(defaults.dag_threads),
            worker_pool_threads: parse_var("QC_EXEC_WORKER_THREADS")
                .unwrap_or(defaults.worker_pool_threads),
            suspension: env::var("QC_EXEC_SUSPENSION")
                .ok()
                .and_then(|v| parse_suspension(&v))
                .unwrap_or(defaults.suspension),
            is_wasm: flag_var("QC_EXEC_WASM").unwrap_or(defaults.is_wasm),
            is_auth_check: flag_var("QC_EXEC_AUTH_CHECK").unwrap_or(defaults.is_auth_check),
            enable_sharding: flag_var("QC_EXEC_SHARDING").unwrap_or(defaults.enable_sharding),
            enable_dag: flag_var("QC_EXEC_DAG").unwrap_or(defaults.enable_dag),
            dag_cache_capacity: parse_var("QC_EXEC_DAG_CACHE")
                .unwrap_or(defaults.dag_cache_capacity),
            abi_cache_capacity: parse_var("QC_EXEC_ABI_CACHE")
                .unwrap_or(defaults.abi_cache_capacity),
            max_call_depth: parse_var("QC_EXEC_MAX_CALL_DEPTH").unwrap_or(defaults.max_call_depth),
            max_edge_count: parse_var("QC_EXEC_MAX_EDGES").unwrap_or(defaults.max_edge_count),
        }
    }

    pub fn with_suspension(mut self, suspension: SuspensionStrategy) -> Self {
        self.suspension = suspension;
        self
    }

    pub fn with_dag(mut self, enable_dag: bool) -> Self {
        self.enable_dag = enable_dag;
        self
    }

    pub fn with_sharding(mut self, enable_sharding: bool) -> Self {
        self.enable_sharding = enable_sharding;
        self
    }

    pub fn with_threads(mut self, dag_threads: usize, worker_pool_threads: usize) -> Self {
        self.dag_threads = dag_threads.max(1);
        self.worker_pool_threads = worker_pool_threads.max(1);
        self
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_max_edge_count(mut self, max_edge_count: usize) -> Self {
        self.max_edge_count = max_edge_count;
        self
    }
}

fn parse_var(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
}

fn flag_var(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}

fn parse_suspension(value: &str) -> Option<SuspensionStrategy> {
    match value.to_lowercase().as_str() {
        "coroutine" => Some(SuspensionStrategy::Coroutine),
        "worker-pool" | "worker_pool" | "workerpool" => Some(SuspensionStrategy::WorkerPool),
        _ => None,
    }
}
