//! Suspension channels between a running call body and its driver
//!
//! A suspension is a promise/future pair: the body parks on the future,
//! the driver keeps the promise and fulfils it with the exchange message on
//! resume. How the parked body gets control back depends on the strategy:
//!
//! - coroutine: the body is a future polled on the driver's thread; parking
//!   makes the poll return `Pending` and leaves the request in a slot.
//! - worker pool: the body runs on a pool thread and blocks on the future;
//!   the request reaches the driver over a channel.

use crate::domain::errors::ExecuteError;
use crate::domain::CallContext;
use futures::channel::{mpsc, oneshot};
use parking_lot::Mutex;
use std::sync::Arc;

/// A parked body: the request it handed out and the promise that wakes it.
pub struct Suspension {
    pub request: CallContext,
    pub promise: oneshot::Sender<CallContext>,
}

/// What a worker-pool body reports to its driver.
pub enum UnitEvent {
    Suspended(Suspension),
    Finished(Result<CallContext, ExecuteError>),
}

/// Slot shared by a coroutine body and its driver.
pub type SuspensionSlot = Arc<Mutex<Option<Suspension>>>;

/// Body-side end of the suspension channel.
#[derive(Clone)]
pub enum Suspender {
    Coroutine(SuspensionSlot),
    WorkerPool(mpsc::UnboundedSender<UnitEvent>),
    /// Nested calls run to completion in place; nothing can suspend
    Inline,
}

impl Suspender {
    /// Park the body until the driver answers `request`.
    pub async fn suspend(&self, request: CallContext) -> Result<CallContext, ExecuteError> {
        let (promise, future) = oneshot::channel();
        let suspension = Suspension { request, promise };

        match self {
            Self::Coroutine(slot) => {
                *slot.lock() = Some(suspension);
            }
            Self::WorkerPool(events) => {
                events
                    .unbounded_send(UnitEvent::Suspended(suspension))
                    .map_err(|_| ExecuteError::Stopped)?;
            }
            Self::Inline => {
                return Err(ExecuteError::InvalidState(
                    "inline execution cannot suspend".into(),
                ));
            }
        }

        // A dropped promise means the driver went away
        future.await.map_err(|_| ExecuteError::Stopped)
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline)
    }
}
