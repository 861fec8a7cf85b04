//! Critical Fields
//!
//! Declared conflict fields of a contract function and the critical keys
//! they produce for one concrete call. Two calls conflict when they share
//! a critical key.

use crate::domain::value_objects::{BlockHeader, Bytes, TxId};
use crate::domain::CallContext;
use serde::{Deserialize, Serialize};

/// Width of one ABI-encoded parameter word
const WORD_SIZE: usize = 32;
const SELECTOR_SIZE: usize = 4;

/// Environment value a conflict field can depend on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvKind {
    Caller,
    Origin,
    Now,
    BlockNumber,
    Addr,
}

/// What part of a call a declared conflict field refers to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictFieldKind {
    /// Conflicts with every call
    All,
    /// Length of a dynamic slot
    Len,
    Env(EnvKind),
    /// Call parameter at the given path
    Var(Vec<usize>),
    Const(Bytes),
    /// Slot only
    None,
}

/// One declared conflict field of a contract function
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictField {
    pub kind: ConflictFieldKind,
    #[serde(default)]
    pub slot: Option<u64>,
}

impl ConflictField {
    pub fn new(kind: ConflictFieldKind, slot: Option<u64>) -> Self {
        Self { kind, slot }
    }
}

/// Critical keys of `input` for the declared `fields`.
///
/// Returns `None` when the call must be treated as conflicting with
/// everything: no fields declared, an `All` field, or a parameter that
/// cannot be located in the payload.
pub fn extract_critical_keys(
    fields: &[ConflictField],
    input: &CallContext,
    header: &BlockHeader,
) -> Option<Vec<Bytes>> {
    if fields.is_empty() {
        return None;
    }

    let to = input.receive_address.as_bytes();
    let mut keys = Vec::with_capacity(fields.len());

    for field in fields {
        let mut key = Vec::with_capacity(to.len() + 8 + WORD_SIZE);
        key.extend_from_slice(to);
        key.extend_from_slice(&field.slot.unwrap_or(0).to_be_bytes());

        match &field.kind {
            ConflictFieldKind::All => return None,
            ConflictFieldKind::Len | ConflictFieldKind::None => {}
            ConflictFieldKind::Env(env) => match env {
                EnvKind::Caller => key.extend_from_slice(input.sender_address.as_bytes()),
                EnvKind::Origin => key.extend_from_slice(input.origin.as_bytes()),
                EnvKind::Now => key.extend_from_slice(&header.timestamp.to_be_bytes()),
                EnvKind::BlockNumber => key.extend_from_slice(&header.number.to_be_bytes()),
                EnvKind::Addr => key.extend_from_slice(to),
            },
            ConflictFieldKind::Var(path) => {
                let index = *path.first()?;
                key.extend_from_slice(parameter_word(&input.data, index)?);
            }
            ConflictFieldKind::Const(value) => key.extend_from_slice(value),
        }

        keys.push(key);
    }

    Some(keys)
}

/// The `index`-th static parameter word after the selector.
fn parameter_word(data: &[u8], index: usize) -> Option<&[u8]> {
    let start = SELECTOR_SIZE.checked_add(index.checked_mul(WORD_SIZE)?)?;
    data.get(start..start.checked_add(WORD_SIZE)?)
}

/// Critical keys per transaction of one batch; `None` marks a serial one.
#[derive(Clone, Debug, Default)]
pub struct CriticalFields {
    fields: Vec<Option<Vec<Bytes>>>,
}

impl CriticalFields {
    pub fn new(size: usize) -> Self {
        Self {
            fields: vec![None; size],
        }
    }

    pub fn put(&mut self, id: TxId, fields: Option<Vec<Bytes>>) {
        if let Some(slot) = self.fields.get_mut(id) {
            *slot = fields;
        }
    }

    pub fn get(&self, id: TxId) -> Option<&Vec<Bytes>> {
        self.fields.get(id).and_then(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Transactions with known fields, ascending
    pub fn eligible(&self) -> Vec<TxId> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(id, _)| id)
            .collect()
    }

    /// Transactions that must run serially, ascending
    pub fn serial(&self) -> Vec<TxId> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    /// Fields of the eligible transactions, in `eligible()` order.
    pub fn eligible_fields(&self) -> Vec<Vec<Bytes>> {
        self.fields.iter().flatten().cloned().collect()
    }
}
