//! Application layer: block lifecycle and the service facade

pub mod block_context;
pub mod dag_cache;
pub mod executor_switch;
pub mod service;

pub use block_context::BlockContext;
pub use dag_cache::{DagCacheKey, SpeculativeDagCache};
pub use executor_switch::{ExecutorSwitch, TermChange, STOPPED_TERM};
pub use service::{TransactionExecutor, ANY_CONTRACT};
