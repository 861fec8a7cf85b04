//! Domain module for Parallel Execution
//!
//! Contains the call message, conflict graph entities, value objects,
//! errors, and invariants.

pub mod call_context;
pub mod entities;
pub mod errors;
pub mod invariants;
pub mod value_objects;

pub use call_context::CallContext;
pub use entities::*;
pub use errors::*;
pub use value_objects::*;
