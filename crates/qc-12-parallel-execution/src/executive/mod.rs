//! Executive layer: everything that runs a single call chain
//!
//! - `KeyLockTracker` / `StorageAccessWrapper`: lock bookkeeping on storage access
//! - `Suspender`: promise/future hand-off between a body and its driver
//! - `HostContext`: what the VM sees
//! - `ExecutionUnit` / `ExecutiveFactory`: the unit and how it is built
//! - `ExecutionEnv` / `PrecompiledRegistry`: long-lived collaborators

pub mod env;
pub mod factory;
pub mod host;
pub mod key_locks;
pub mod precompiled;
pub mod storage_wrapper;
pub mod suspend;
pub mod unit;

pub use env::{ExecutionEnv, ExecutorPools, WorkerThreads};
pub use factory::ExecutiveFactory;
pub use host::{contract_table, HostContext};
pub use key_locks::KeyLockTracker;
pub use precompiled::PrecompiledRegistry;
pub use storage_wrapper::StorageAccessWrapper;
pub use suspend::{Suspender, Suspension, UnitEvent};
pub use unit::ExecutionUnit;
