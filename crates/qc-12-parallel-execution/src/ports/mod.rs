//! Ports for Parallel Execution
//!
//! Hexagonal architecture ports:
//! - Inbound (Driving): API exposed to the block scheduler
//! - Outbound (Driven): storage, VM, precompiled and conflict-field SPIs

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
