//! The call message exchanged between flows, units and the scheduler

use super::errors::ExecuteError;
use super::value_objects::{
    Address, Bytes, CallKey, ContextId, LogEntry, MessageType, Seq, TransactionStatus,
};
use serde::{Deserialize, Serialize};

/// One request or response step of a call chain.
///
/// A `CallContext` is moved through every hand-off (flow → state → unit →
/// scheduler), so exactly one owner exists per `(context_id, seq)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Groups every step of one top-level transaction
    pub context_id: ContextId,
    /// Step counter within the chain
    pub seq: Seq,
    pub message_type: MessageType,
    /// Set while `message_type` is `TxHash`
    pub transaction_hash: Option<String>,
    pub sender_address: Address,
    pub code_address: Address,
    pub receive_address: Address,
    pub origin: Address,
    pub gas: i64,
    pub data: Bytes,
    /// Keys held or requested; ordered
    pub key_locks: Vec<String>,
    /// The key requested by a `KeyLock` message
    pub acquire_key_lock: Option<String>,
    pub status: i32,
    pub static_call: bool,
    pub create: bool,
    pub internal_call: bool,
    pub log_entries: Vec<LogEntry>,
    /// Human readable failure reason for `Revert`
    pub message: String,
}

impl CallContext {
    /// A new top-level (or nested) call request to `to`.
    pub fn message(
        context_id: ContextId,
        seq: Seq,
        from: impl Into<Address>,
        to: impl Into<Address>,
        data: impl Into<Bytes>,
    ) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            context_id,
            seq,
            message_type: MessageType::Message,
            transaction_hash: None,
            sender_address: from.clone(),
            code_address: to.clone(),
            receive_address: to,
            origin: from,
            gas: 3_000_000,
            data: data.into(),
            key_locks: Vec::new(),
            acquire_key_lock: None,
            status: TransactionStatus::None.code(),
            static_call: false,
            create: false,
            internal_call: false,
            log_entries: Vec::new(),
            message: String::new(),
        }
    }

    /// Response to this context with the given terminal or suspension type.
    ///
    /// Sender and receiver are swapped, the key is kept.
    pub fn response(&self, message_type: MessageType) -> Self {
        Self {
            context_id: self.context_id,
            seq: self.seq,
            message_type,
            transaction_hash: None,
            sender_address: self.receive_address.clone(),
            code_address: self.code_address.clone(),
            receive_address: self.sender_address.clone(),
            origin: self.origin.clone(),
            gas: self.gas,
            data: Bytes::new(),
            key_locks: Vec::new(),
            acquire_key_lock: None,
            status: TransactionStatus::None.code(),
            static_call: self.static_call,
            create: false,
            internal_call: self.internal_call,
            log_entries: Vec::new(),
            message: String::new(),
        }
    }

    /// A `Revert` response carrying `status` and `message`.
    pub fn revert(&self, status: TransactionStatus, message: impl Into<String>) -> Self {
        let mut out = self.response(MessageType::Revert);
        out.status = status.code();
        out.message = message.into();
        out
    }

    /// Revert response for an error that stays inside one transaction.
    pub fn revert_from_error(&self, error: &ExecuteError) -> Self {
        let status = match error {
            ExecuteError::DeadLock { .. } => TransactionStatus::DeadLock,
            ExecuteError::Execution { .. } => TransactionStatus::InternalError,
            _ => TransactionStatus::Unknown,
        };
        self.revert(status, error.to_string())
    }

    pub fn key(&self) -> CallKey {
        CallKey::new(self.context_id, self.seq)
    }

    pub fn set_key(&mut self, key: CallKey) {
        self.context_id = key.context_id;
        self.seq = key.seq;
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_key_locks(mut self, key_locks: Vec<String>) -> Self {
        self.key_locks = key_locks;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<Address>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_gas(mut self, gas: i64) -> Self {
        self.gas = gas;
        self
    }

    pub fn with_static_call(mut self, static_call: bool) -> Self {
        self.static_call = static_call;
        self
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status.code();
        self
    }

    /// Four-byte function selector, if the payload carries one.
    pub fn selector(&self) -> Option<[u8; 4]> {
        let head = self.data.get(..4)?;
        let mut selector = [0u8; 4];
        selector.copy_from_slice(head);
        Some(selector)
    }

    pub fn is_terminal(&self) -> bool {
        self.message_type.is_terminal()
    }

    pub fn is_suspension(&self) -> bool {
        self.message_type.is_suspension()
    }

    /// A brand-new top-level call: first step of its chain.
    pub fn is_origin(&self) -> bool {
        self.message_type == MessageType::Message && self.seq == 0
    }
}
