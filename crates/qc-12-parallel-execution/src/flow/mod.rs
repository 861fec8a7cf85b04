//! Flow controllers
//!
//! One controller per contract per block. It owns the call states of that
//! contract and decides which of them run next.

pub mod call_state;
pub mod dag_flow;
pub mod stack_flow;

pub use call_state::{CallState, CallStatus};
pub use dag_flow::{DagFlow, DagOutcome, DagTask};
pub use stack_flow::StackFlow;

use crate::domain::errors::ExecuteError;
use crate::domain::CallContext;
use crate::executive::ExecutiveFactory;
use std::sync::Arc;
use tracing::{error, trace};

pub type OutputCallback = Box<dyn FnMut(CallContext) + Send>;
pub type FinishedCallback = Box<dyn FnOnce(Result<(), ExecuteError>) + Send>;

pub enum FlowController {
    Stack(StackFlow),
    Dag(DagFlow),
}

impl FlowController {
    pub fn contract(&self) -> &str {
        match self {
            Self::Stack(flow) => flow.contract(),
            Self::Dag(flow) => flow.contract(),
        }
    }

    pub fn factory(&self) -> &Arc<ExecutiveFactory> {
        match self {
            Self::Stack(flow) => flow.factory(),
            Self::Dag(flow) => flow.factory(),
        }
    }

    pub fn is_dag(&self) -> bool {
        matches!(self, Self::Dag(_))
    }

    pub fn submit(&self, ctx: CallContext) -> Result<(), ExecuteError> {
        match self {
            Self::Stack(flow) => flow.submit(ctx),
            Self::Dag(flow) => flow.submit(ctx),
        }
    }

    pub fn submit_batch(&self, inputs: Vec<CallContext>) -> Result<(), ExecuteError> {
        inputs.into_iter().try_for_each(|ctx| self.submit(ctx))
    }

    /// Run synchronously on the calling thread.
    pub fn run(&self, on_output: &mut dyn FnMut(CallContext)) -> Result<(), ExecuteError> {
        match self {
            Self::Stack(flow) => flow.run(on_output),
            Self::Dag(flow) => flow.run(on_output),
        }
    }

    /// Run on the flow pool.
    ///
    /// `on_each_output` sees every output in production order;
    /// `on_finished` is called exactly once afterwards.
    pub fn async_run(self: &Arc<Self>, on_each_output: OutputCallback, on_finished: FinishedCallback) {
        let flow = self.clone();
        let factory = self.factory().clone();

        factory.env().pools().flow().spawn(move || {
            let mut on_each_output = on_each_output;
            trace!(contract = %flow.contract(), "Flow run started");

            let result = flow.run(&mut |output| on_each_output(output));
            if let Err(e) = &result {
                error!(contract = %flow.contract(), error = %e, "Flow run failed");
            }
            on_finished(result);
        });
    }

    pub fn stop(&self) {
        match self {
            Self::Stack(flow) => flow.stop(),
            Self::Dag(flow) => flow.stop(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        match self {
            Self::Stack(flow) => flow.is_stopped(),
            Self::Dag(flow) => flow.is_stopped(),
        }
    }

    /// Drop every call state held by the flow.
    pub fn clear(&self) {
        match self {
            Self::Stack(flow) => flow.clear(),
            Self::Dag(flow) => flow.clear(),
        }
    }
}
