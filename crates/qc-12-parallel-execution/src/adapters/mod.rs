//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements outbound port traits: in-memory layered state storage and
//! conflict fields declared in contract ABI metadata.

mod abi_conflict_fields;
mod memory_storage;

pub use abi_conflict_fields::{DeclaredConflictFields, FunctionAbi, ABI_ROW};
pub use memory_storage::InMemoryStorage;
