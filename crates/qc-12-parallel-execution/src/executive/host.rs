//! Host interface seen by a running call body
//!
//! The VM and precompiles read and write state and issue nested calls only
//! through `HostContext`. Every awaited host operation is a potential
//! suspension point of the surrounding unit.

use super::factory::ExecutiveFactory;
use super::storage_wrapper::StorageAccessWrapper;
use super::suspend::Suspender;
use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{
    Address, BlockHeader, CallKey, Entry, LogEntry, MessageType, TableInfo, TransactionStatus,
    GET_CODE_INPUT,
};
use crate::domain::CallContext;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Table holding a contract's code, ABI and metadata rows.
pub fn contract_table(address: &str) -> String {
    format!("/apps/{address}")
}

pub struct HostContext {
    key: CallKey,
    contract: Address,
    origin: Address,
    depth: usize,
    static_call: bool,
    header: BlockHeader,
    storage: StorageAccessWrapper,
    suspender: Suspender,
    factory: Arc<ExecutiveFactory>,
    /// Highest seq handed out in this chain; only advanced inline
    seq_source: Arc<AtomicI64>,
    logs: Vec<LogEntry>,
}

impl HostContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: CallKey,
        contract: Address,
        input: &CallContext,
        depth: usize,
        header: BlockHeader,
        storage: StorageAccessWrapper,
        suspender: Suspender,
        factory: Arc<ExecutiveFactory>,
        seq_source: Arc<AtomicI64>,
    ) -> Self {
        Self {
            key,
            contract,
            origin: input.origin.clone(),
            depth,
            static_call: input.static_call,
            header,
            storage,
            suspender,
            factory,
            seq_source,
            logs: Vec::new(),
        }
    }

    pub fn call_key(&self) -> CallKey {
        self.key
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_static_call(&self) -> bool {
        self.static_call
    }

    pub fn header(&self) -> BlockHeader {
        self.header
    }

    pub fn is_wasm(&self) -> bool {
        self.factory.env().config().is_wasm
    }

    pub fn is_auth_check(&self) -> bool {
        self.factory.env().config().is_auth_check
    }

    /// Read a row, acquiring its key lock first if another chain holds it.
    pub async fn get_row(&mut self, table: &str, key: &str) -> Result<Option<Entry>, ExecuteError> {
        self.acquire(table, key).await?;
        self.storage.get_row(table, key)
    }

    pub async fn get_rows(
        &mut self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, ExecuteError> {
        for key in keys {
            self.acquire(table, key).await?;
        }
        self.storage.get_rows(table, keys)
    }

    /// Write a row, acquiring its key lock first if another chain holds it.
    pub async fn set_row(&mut self, table: &str, key: &str, entry: Entry) -> Result<(), ExecuteError> {
        self.acquire(table, key).await?;
        self.storage.set_row(table, key, entry)
    }

    pub fn open_table(&self, name: &str) -> Result<Option<TableInfo>, ExecuteError> {
        self.storage.open_table(name)
    }

    pub fn create_table(&self, name: &str, value_fields: &str) -> Result<TableInfo, ExecuteError> {
        self.storage.create_table(name, value_fields)
    }

    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    async fn acquire(&mut self, table: &str, key: &str) -> Result<(), ExecuteError> {
        match self.storage.before_access(table, key) {
            Some(lock) => self.external_acquire_key_lock(lock).await,
            None => Ok(()),
        }
    }

    /// Ask the scheduler for a key held by another chain.
    ///
    /// Suspends with a `KeyLock` message carrying this chain's keys. A
    /// `Revert` answer means waiting would deadlock.
    pub async fn external_acquire_key_lock(&mut self, lock: String) -> Result<(), ExecuteError> {
        let mut request = CallContext::message(
            self.key.context_id,
            self.key.seq,
            self.contract.clone(),
            self.contract.clone(),
            Vec::new(),
        )
        .with_type(MessageType::KeyLock)
        .with_origin(self.origin.clone());
        request.acquire_key_lock = Some(lock.clone());
        request.key_locks = self.storage.export_locks();

        debug!(
            context_id = self.key.context_id,
            seq = self.key.seq,
            key = %lock,
            "Requesting key lock"
        );

        let response = self.suspender.suspend(request).await?;
        if response.message_type == MessageType::Revert {
            warn!(
                context_id = self.key.context_id,
                seq = self.key.seq,
                key = %lock,
                "Dead lock detected"
            );
            return Err(ExecuteError::DeadLock { key: lock });
        }

        self.storage.import_existing_locks(response.key_locks);
        Ok(())
    }

    /// Call another contract and wait for its response.
    ///
    /// Code lookups and constant precompiles are answered in place. Other
    /// calls either run inline as a child unit (DAG execution) or suspend
    /// this unit until the scheduler routes the callee's result back.
    pub async fn external_call(&mut self, mut msg: CallContext) -> Result<CallContext, ExecuteError> {
        msg.set_key(self.key);
        msg.message_type = MessageType::Message;
        msg.sender_address = self.contract.clone();
        msg.origin = self.origin.clone();
        msg.static_call |= self.static_call;

        if self.depth + 1 > self.factory.env().config().max_call_depth {
            warn!(
                context_id = self.key.context_id,
                depth = self.depth,
                "Call depth limit exceeded"
            );
            return Ok(msg.revert(TransactionStatus::CallDepthExceeded, "call depth exceeded"));
        }

        if msg.data == GET_CODE_INPUT {
            return self.get_code(&msg);
        }

        if let Some(precompiled) = self.factory.env().precompiled().get(&msg.receive_address) {
            trace!(to = %msg.receive_address, "Calling constant precompiled");
            let mut out = precompiled.call(self, msg).await?;
            out.set_key(self.key);
            return Ok(out);
        }

        if self.suspender.is_inline() {
            return self.inline_call(msg).await;
        }

        msg.key_locks = self.storage.export_locks();
        trace!(
            context_id = self.key.context_id,
            seq = self.key.seq,
            to = %msg.receive_address,
            "External call"
        );

        let response = self.suspender.suspend(msg).await?;
        self.storage.import_existing_locks(response.key_locks.clone());
        Ok(response)
    }

    async fn inline_call(&mut self, mut msg: CallContext) -> Result<CallContext, ExecuteError> {
        let seq = self.seq_source.fetch_add(1, Ordering::AcqRel) + 1;
        msg.seq = seq;

        let mut child = self.factory.build_unit(
            msg.code_address.clone(),
            CallKey::new(self.key.context_id, seq),
            self.depth + 1,
            self.seq_source.clone(),
        );

        let mut out = match child.execute_inline(msg.clone()).await {
            Ok(out) => out,
            Err(e) if e.is_transaction_scoped() => msg.revert_from_error(&e),
            Err(e) => return Err(e),
        };

        // Callee keys stay held by this chain
        for lock in out.key_locks.drain(..) {
            self.storage.record_lock(lock);
        }
        out.set_key(self.key);
        Ok(out)
    }

    fn get_code(&self, msg: &CallContext) -> Result<CallContext, ExecuteError> {
        let table = contract_table(&msg.receive_address);
        match self.storage.get_row(&table, "code")? {
            Some(entry) if !entry.deleted => {
                let mut out = msg.response(MessageType::Finished);
                out.data = entry.value;
                Ok(out)
            }
            _ => Ok(msg.revert(
                TransactionStatus::CallAddressError,
                format!("no code at {}", msg.receive_address),
            )),
        }
    }

    /// Close a finished body: stamp the key, hand out the touched keys and
    /// attach emitted logs.
    pub(crate) fn finish(&mut self, mut out: CallContext) -> Result<CallContext, ExecuteError> {
        if !out.is_terminal() {
            return Err(ExecuteError::InvalidState(format!(
                "call body returned {:?}",
                out.message_type
            )));
        }

        out.set_key(self.key);
        out.key_locks = self.storage.export_locks();
        if !self.logs.is_empty() {
            let mut logs = std::mem::take(&mut self.logs);
            logs.append(&mut out.log_entries);
            out.log_entries = logs;
        }
        Ok(out)
    }
}
