//! Call execution unit
//!
//! Executes one call end to end. The body (VM or precompile) is an async
//! future over a `HostContext`; nested calls and key-lock requests park it
//! through a `Suspender`. `start`/`resume` hand control to the body and
//! return as soon as it parks again or finishes, so exactly one of driver
//! and body is active at any time.

use super::factory::ExecutiveFactory;
use super::host::HostContext;
use super::suspend::{Suspender, SuspensionSlot, UnitEvent};
use crate::domain::errors::{ExecuteError, StorageError};
use crate::domain::value_objects::{Address, CallKey, MessageType, SuspensionStrategy};
use crate::domain::CallContext;
use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::task::noop_waker;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error, trace};

type Body = BoxFuture<'static, Result<CallContext, ExecuteError>>;

enum Driver {
    NotStarted,
    Coroutine { body: Body, slot: SuspensionSlot },
    WorkerPool { events: mpsc::UnboundedReceiver<UnitEvent> },
    Finished,
}

pub struct ExecutionUnit {
    key: CallKey,
    contract: Address,
    depth: usize,
    strategy: SuspensionStrategy,
    factory: Arc<ExecutiveFactory>,
    seq_source: Arc<AtomicI64>,
    driver: Driver,
    /// Wakes the parked body
    pending: Option<oneshot::Sender<CallContext>>,
    /// Resumption value for the next `resume`
    exchange: Option<CallContext>,
}

impl ExecutionUnit {
    pub(crate) fn new(
        key: CallKey,
        contract: Address,
        depth: usize,
        strategy: SuspensionStrategy,
        factory: Arc<ExecutiveFactory>,
        seq_source: Arc<AtomicI64>,
    ) -> Self {
        Self {
            key,
            contract,
            depth,
            strategy,
            factory,
            seq_source,
            driver: Driver::NotStarted,
            pending: None,
            exchange: None,
        }
    }

    pub fn key(&self) -> CallKey {
        self.key
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn strategy(&self) -> SuspensionStrategy {
        self.strategy
    }

    /// Parked on an external call or key-lock request.
    pub fn is_suspended(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.driver, Driver::Finished)
    }

    /// Begin a new call chain.
    ///
    /// Returns the first suspension (`Message`/`KeyLock`) or the terminal
    /// result. `input.key_locks` are the keys other chains hold.
    pub fn start(&mut self, input: CallContext) -> Result<CallContext, ExecuteError> {
        if !matches!(self.driver, Driver::NotStarted) {
            return Err(ExecuteError::InvalidState(format!(
                "unit {} already started",
                self.key
            )));
        }
        if !matches!(input.message_type, MessageType::Message | MessageType::KeyLock) {
            return Err(ExecuteError::UnknownMessageType(format!(
                "{:?}",
                input.message_type
            )));
        }

        debug!(
            context_id = self.key.context_id,
            seq = self.key.seq,
            contract = %self.contract,
            strategy = ?self.strategy,
            "Starting execution unit"
        );

        match self.strategy {
            SuspensionStrategy::Coroutine => {
                let slot: SuspensionSlot = Arc::new(Mutex::new(None));
                let host = self.host(Suspender::Coroutine(slot.clone()), &input)?;
                let body = run_body(self.factory.clone(), host, input).boxed();
                self.driver = Driver::Coroutine { body, slot };
                self.poll_coroutine()
            }
            SuspensionStrategy::WorkerPool => {
                let (events_tx, events) = mpsc::unbounded();
                let host = self.host(Suspender::WorkerPool(events_tx.clone()), &input)?;
                let body = run_body(self.factory.clone(), host, input);
                self.factory.env().pools().worker().spawn(move || {
                    let result = futures::executor::block_on(body);
                    // Receiver gone means the unit was dropped mid-call
                    let _ = events_tx.unbounded_send(UnitEvent::Finished(result));
                })?;
                self.driver = Driver::WorkerPool { events };
                self.wait_worker()
            }
        }
    }

    /// Store the value handed to the body on the next `resume`.
    pub fn set_exchange_message(&mut self, msg: CallContext) {
        self.exchange = Some(msg);
    }

    /// Continue a parked body with the exchange message.
    pub fn resume(&mut self) -> Result<CallContext, ExecuteError> {
        if self.pending.is_none() {
            return Err(ExecuteError::InvalidState(format!(
                "unit {} is not suspended",
                self.key
            )));
        }
        let exchange = self.exchange.take().ok_or_else(|| {
            ExecuteError::InvalidState(format!("unit {} has no exchange message", self.key))
        })?;
        let promise = self.pending.take().ok_or(ExecuteError::Stopped)?;

        trace!(
            context_id = self.key.context_id,
            seq = self.key.seq,
            response = ?exchange.message_type,
            "Resuming execution unit"
        );

        if promise.send(exchange).is_err() {
            self.driver = Driver::Finished;
            return Err(ExecuteError::Stopped);
        }

        match self.driver {
            Driver::Coroutine { .. } => self.poll_coroutine(),
            Driver::WorkerPool { .. } => self.wait_worker(),
            _ => Err(ExecuteError::InvalidState(format!(
                "unit {} has no running body",
                self.key
            ))),
        }
    }

    /// Run the call to completion in place; nested calls become child units.
    ///
    /// Used by DAG execution, where no call can wait on another chain.
    pub fn execute_inline(
        &mut self,
        input: CallContext,
    ) -> BoxFuture<'_, Result<CallContext, ExecuteError>> {
        async move {
            if !matches!(self.driver, Driver::NotStarted) {
                return Err(ExecuteError::InvalidState(format!(
                    "unit {} already started",
                    self.key
                )));
            }
            self.driver = Driver::Finished;

            let host = self.host(Suspender::Inline, &input)?;
            run_body(self.factory.clone(), host, input).await
        }
        .boxed()
    }

    fn host(&self, suspender: Suspender, input: &CallContext) -> Result<HostContext, ExecuteError> {
        let block = self.factory.block()?;
        let mut storage = self.factory.storage_wrapper(&block, &self.contract);
        storage.import_existing_locks(input.key_locks.clone());

        Ok(HostContext::new(
            self.key,
            self.contract.clone(),
            input,
            self.depth,
            block.header(),
            storage,
            suspender,
            self.factory.clone(),
            self.seq_source.clone(),
        ))
    }

    fn poll_coroutine(&mut self) -> Result<CallContext, ExecuteError> {
        let Driver::Coroutine { body, slot } = &mut self.driver else {
            return Err(ExecuteError::InvalidState("not a coroutine unit".into()));
        };
        let slot = slot.clone();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let polled = body.as_mut().poll(&mut cx);

        match polled {
            Poll::Ready(result) => {
                self.driver = Driver::Finished;
                result
            }
            Poll::Pending => match slot.lock().take() {
                Some(suspension) => {
                    self.pending = Some(suspension.promise);
                    Ok(suspension.request)
                }
                None => {
                    self.driver = Driver::Finished;
                    error!(
                        context_id = self.key.context_id,
                        seq = self.key.seq,
                        "Call body yielded without suspending"
                    );
                    Err(ExecuteError::execution(
                        self.key.context_id,
                        self.key.seq,
                        "call body awaited outside the host",
                    ))
                }
            },
        }
    }

    fn wait_worker(&mut self) -> Result<CallContext, ExecuteError> {
        let Driver::WorkerPool { events } = &mut self.driver else {
            return Err(ExecuteError::InvalidState("not a worker-pool unit".into()));
        };

        match futures::executor::block_on(events.next()) {
            Some(UnitEvent::Suspended(suspension)) => {
                self.pending = Some(suspension.promise);
                Ok(suspension.request)
            }
            Some(UnitEvent::Finished(result)) => {
                self.driver = Driver::Finished;
                result
            }
            None => {
                self.driver = Driver::Finished;
                Err(ExecuteError::Stopped)
            }
        }
    }
}

/// Dispatch to a precompile or the VM, turning panics into execution errors.
async fn run_body(
    factory: Arc<ExecutiveFactory>,
    mut host: HostContext,
    input: CallContext,
) -> Result<CallContext, ExecuteError> {
    let key = host.call_key();
    let precompiled = factory.env().precompiled().get(&input.code_address);

    let outcome = match precompiled {
        Some(precompiled) => {
            AssertUnwindSafe(precompiled.call(&mut host, input))
                .catch_unwind()
                .await
        }
        None => {
            AssertUnwindSafe(factory.env().vm().execute(&mut host, input))
                .catch_unwind()
                .await
        }
    };

    match outcome {
        Ok(result) => result
            .and_then(|out| host.finish(out))
            .map_err(|e| contain(key, e)),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                context_id = key.context_id,
                seq = key.seq,
                %message,
                "Call body panicked"
            );
            Err(ExecuteError::execution(key.context_id, key.seq, message))
        }
    }
}

/// Errors of a call body belong to its transaction, except those that
/// concern the whole executor.
fn contain(key: CallKey, e: ExecuteError) -> ExecuteError {
    match e {
        ExecuteError::Storage(StorageError::Backend(_))
        | ExecuteError::Stopped
        | ExecuteError::BlockContextUnavailable
        | ExecuteError::SchedulerTermMismatch { .. }
        | ExecuteError::DeadLock { .. }
        | ExecuteError::Execution { .. } => e,
        other => {
            debug!(
                context_id = key.context_id,
                seq = key.seq,
                error = %other,
                "Call body failed"
            );
            ExecuteError::execution(key.context_id, key.seq, other.to_string())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "call body panicked".to_string()
    }
}
