//! Error types for Parallel Execution

use super::value_objects::{ContextId, Seq};
use thiserror::Error;

/// All errors that can occur while executing calls and flows
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// A key-lock request was answered with a revert
    #[error("Dead lock detected while acquiring key: {key}")]
    DeadLock { key: String },

    /// The executor or flow has been told to stop
    #[error("Executor has been stopped")]
    Stopped,

    /// Request issued by an outdated scheduler term
    #[error("Scheduler term mismatch: requested {requested}, current {current}")]
    SchedulerTermMismatch { requested: i64, current: i64 },

    /// Speculative DAG preparation does not match the incoming batch
    #[error("Prepared DAG flow does not match block {number} contract {contract}")]
    NotPrepared { number: i64, contract: String },

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// DAG construction or run failure
    #[error("DAG error: {0}")]
    Dag(String),

    /// Fault inside one call body
    #[error("Execution error at {context_id}:{seq}: {message}")]
    Execution {
        context_id: ContextId,
        seq: Seq,
        message: String,
    },

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Block context is gone or was never created
    #[error("Block context unavailable")]
    BlockContextUnavailable,

    /// Message type that cannot be executed here
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
}

impl ExecuteError {
    pub fn execution(context_id: ContextId, seq: Seq, message: impl Into<String>) -> Self {
        Self::Execution {
            context_id,
            seq,
            message: message.into(),
        }
    }

    pub fn is_dead_lock(&self) -> bool {
        matches!(self, Self::DeadLock { .. })
    }

    /// Errors confined to one transaction; siblings keep running.
    pub fn is_transaction_scoped(&self) -> bool {
        matches!(self, Self::DeadLock { .. } | Self::Execution { .. })
    }

    /// The caller should retry against a fresh executor instance.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::SchedulerTermMismatch { .. } | Self::NotPrepared { .. }
        )
    }
}

/// Storage collaborator errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Errors raised while building or sorting a conflict graph
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderingError {
    /// Cycle detected in dependency graph
    #[error("Cycle detected in dependency graph")]
    CycleDetected,

    /// Edge count exceeded limits (anti-DoS)
    #[error("Edge count exceeded: {count} > {max}")]
    TooManyEdges { count: usize, max: usize },
}

impl From<OrderingError> for ExecuteError {
    fn from(err: OrderingError) -> Self {
        Self::Dag(err.to_string())
    }
}
