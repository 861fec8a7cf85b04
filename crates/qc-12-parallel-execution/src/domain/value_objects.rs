//! Value objects for Parallel Execution

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;

/// Type aliases for clarity
pub type ContextId = i64;
pub type Seq = i64;
pub type Address = String;
pub type Bytes = Vec<u8>;
pub type TxId = usize;

/// Data of an external call that asks for a contract's code instead of invoking it.
pub const GET_CODE_INPUT: &[u8] = b"\x00\x00\x00\x00getCode";

/// Identity of one step of a call chain: `(context_id, seq)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallKey {
    pub context_id: ContextId,
    pub seq: Seq,
}

impl CallKey {
    pub fn new(context_id: ContextId, seq: Seq) -> Self {
        Self { context_id, seq }
    }

    /// Key ordering used by the waiting set: context ascending, seq descending.
    pub fn resume_order(&self) -> (ContextId, Reverse<Seq>) {
        (self.context_id, Reverse(self.seq))
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context_id, self.seq)
    }
}

/// Kind of a call message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Transaction referenced by hash only, input not yet filled
    TxHash,
    /// Request to invoke a contract
    Message,
    /// Request to acquire a key lock held by another chain
    KeyLock,
    /// Successful terminal response
    Finished,
    /// Failed terminal response
    Revert,
    /// Not eligible for DAG execution, hand back to the caller for DMC
    SendBack,
}

impl MessageType {
    /// A message that suspends the producing chain.
    pub fn is_suspension(&self) -> bool {
        matches!(self, Self::Message | Self::KeyLock)
    }

    /// A message that ends the producing chain.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Revert)
    }
}

/// Result codes carried in `CallContext::status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TransactionStatus {
    None = 0,
    Unknown = 1,
    OutOfGas = 12,
    PrecompiledError = 15,
    RevertInstruction = 16,
    CallAddressError = 19,
    CallDepthExceeded = 20,
    DeadLock = 27,
    InternalError = 28,
}

impl TransactionStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Event emitted by a contract.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Bytes>,
    pub data: Bytes,
}

impl LogEntry {
    pub fn new(address: impl Into<Address>, topics: Vec<Bytes>, data: Bytes) -> Self {
        Self {
            address: address.into(),
            topics,
            data,
        }
    }
}

/// How a unit suspends while waiting for an external response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspensionStrategy {
    /// Execution is a cooperative coroutine polled on the driving thread
    #[default]
    Coroutine,
    /// Execution runs on a bounded worker pool and blocks on a promise
    WorkerPool,
}

/// Block identity visible to executing calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: i64,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn new(number: i64, timestamp: u64) -> Self {
        Self { number, timestamp }
    }
}

/// Stored row value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Bytes,
    pub deleted: bool,
}

impl Entry {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            deleted: false,
        }
    }

    pub fn deleted() -> Self {
        Self {
            value: Bytes::new(),
            deleted: true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Table metadata returned by `open_table`/`create_table`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub value_fields: String,
}
