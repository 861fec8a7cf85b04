//! Outbound Ports (Driven Ports / SPI)
//!
//! Collaborators the execution core consumes: state storage, the contract
//! VM, precompiled contracts and the conflict-field source for DAG building.

use crate::domain::errors::{ExecuteError, StorageError};
use crate::domain::value_objects::{BlockHeader, Bytes, Entry, TableInfo};
use crate::domain::CallContext;
use crate::executive::HostContext;
use async_trait::async_trait;

/// State storage of one block.
///
/// Synchronous from the caller's point of view; implementations backed by
/// remote storage block inside these calls, which is what the worker-pool
/// suspension strategy is for.
pub trait StateStorage: Send + Sync {
    fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StorageError>;

    fn get_rows(&self, table: &str, keys: &[String]) -> Result<Vec<Option<Entry>>, StorageError> {
        keys.iter().map(|key| self.get_row(table, key)).collect()
    }

    fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<(), StorageError>;

    fn open_table(&self, name: &str) -> Result<Option<TableInfo>, StorageError>;

    fn create_table(&self, name: &str, value_fields: &str) -> Result<TableInfo, StorageError>;

    /// Rows written since this storage was layered, ordered by (table, key).
    fn dirty_rows(&self) -> Vec<(String, String, Entry)> {
        Vec::new()
    }
}

/// The "execute a single call" black box (EVM or WASM interpreter).
///
/// Storage access and nested calls go through `host`; awaiting them may
/// suspend the surrounding unit. The returned context must be `Finished`
/// or `Revert`.
#[async_trait]
pub trait ContractVm: Send + Sync {
    async fn execute(
        &self,
        host: &mut HostContext,
        input: CallContext,
    ) -> Result<CallContext, ExecuteError>;
}

/// A natively implemented contract registered by address or name.
#[async_trait]
pub trait Precompiled: Send + Sync {
    async fn call(
        &self,
        host: &mut HostContext,
        input: CallContext,
    ) -> Result<CallContext, ExecuteError>;

    /// Whether calls may run inside a DAG.
    fn is_parallel(&self) -> bool {
        false
    }

    /// Critical fields of a call to a parallel precompile.
    fn parallel_tags(&self, _input: &CallContext) -> Option<Vec<Bytes>> {
        None
    }
}

/// Source of the declared critical fields of a call.
///
/// `None` means the fields are unknown and the call conflicts with every
/// other call; it is then executed serially.
pub trait ConflictFieldProvider: Send + Sync {
    fn conflict_fields(
        &self,
        storage: &dyn StateStorage,
        header: &BlockHeader,
        input: &CallContext,
    ) -> Option<Vec<Bytes>>;
}

/// Mock implementations for testing
#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::domain::value_objects::{MessageType, TransactionStatus};

    /// VM that finishes every call and echoes its input data
    pub struct EchoVm;

    #[async_trait]
    impl ContractVm for EchoVm {
        async fn execute(
            &self,
            _host: &mut HostContext,
            input: CallContext,
        ) -> Result<CallContext, ExecuteError> {
            let mut out = input.response(MessageType::Finished);
            out.data = input.data.clone();
            Ok(out)
        }
    }

    /// Table touched by `ScriptedVm`
    pub const TEST_TABLE: &str = "t_test";

    /// VM driven by its payload:
    ///
    /// - `call:<address>`: call `address` once, finish with its data
    /// - `get:<key>`: read `key` of `TEST_TABLE`, finish with its value
    /// - `set:<key>`: write `key` of `TEST_TABLE`
    /// - anything else is echoed
    pub struct ScriptedVm;

    #[async_trait]
    impl ContractVm for ScriptedVm {
        async fn execute(
            &self,
            host: &mut HostContext,
            input: CallContext,
        ) -> Result<CallContext, ExecuteError> {
            let payload = String::from_utf8_lossy(&input.data).into_owned();
            let mut out = input.response(MessageType::Finished);

            if let Some(target) = payload.strip_prefix("call:") {
                let request =
                    CallContext::message(0, 0, host.contract(), target, b"ping".to_vec());
                let response = host.external_call(request).await?;
                if response.message_type == MessageType::Revert {
                    return Ok(input.revert(TransactionStatus::RevertInstruction, "callee reverted"));
                }
                out.data = response.data;
            } else if let Some(key) = payload.strip_prefix("get:") {
                out.data = host
                    .get_row(TEST_TABLE, key)
                    .await?
                    .map(|entry| entry.value)
                    .unwrap_or_default();
            } else if let Some(key) = payload.strip_prefix("set:") {
                host.set_row(TEST_TABLE, key, Entry::new("x")).await?;
            } else {
                out.data = input.data.clone();
            }
            Ok(out)
        }
    }

    /// Conflict source keyed on the first payload byte; empty payloads are unknown
    pub struct FirstByteConflicts;

    impl ConflictFieldProvider for FirstByteConflicts {
        fn conflict_fields(
            &self,
            _storage: &dyn StateStorage,
            _header: &BlockHeader,
            input: &CallContext,
        ) -> Option<Vec<Bytes>> {
            input.data.first().map(|b| vec![vec![*b]])
        }
    }
}
