//! # QC-12: Parallel Transaction Execution Subsystem
//!
//! Executes the contract calls of a block and returns results identical
//! to a serial execution. Independent transactions run in parallel
//! through a conflict DAG; re-entrant and cross-contract calls run
//! through Dynamic Message Calling (DMC): units suspend on external calls
//! and key-lock requests, and the scheduler routes responses back.
//!
//! ## Architecture
//!
//! - **Domain**: `CallContext`, keys, message types, conflict graph, errors
//! - **Algorithms**: critical fields, conflict graph builder, Kahn's sort, DAG runner
//! - **Executive**: key-lock tracking, storage wrapper, execution units (coroutine
//!   or worker-pool suspension), factory
//! - **Flow**: `CallState`, stack and DAG flow controllers
//! - **Ports**: Inbound (`TransactionExecutionApi`) and Outbound (`StateStorage`,
//!   `ContractVm`, `Precompiled`, `ConflictFieldProvider`)
//! - **Adapters**: in-memory layered storage, ABI-declared conflict fields
//! - **Application**: `BlockContext`, term switch, speculative DAG cache, service

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod executive;
pub mod flow;
pub mod ports;

pub use application::{BlockContext, TransactionExecutor};
pub use config::ExecutorConfig;
pub use domain::entities::*;
pub use domain::errors::{ExecuteError, OrderingError, StorageError};
pub use domain::value_objects::*;
pub use domain::CallContext;
pub use executive::{ExecutionEnv, ExecutionUnit, ExecutiveFactory, HostContext, PrecompiledRegistry};
pub use flow::{CallState, CallStatus, DagFlow, FlowController, StackFlow};
pub use ports::inbound::TransactionExecutionApi;
pub use ports::outbound::{ConflictFieldProvider, ContractVm, Precompiled, StateStorage};
