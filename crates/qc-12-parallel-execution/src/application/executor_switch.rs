//! Scheduler term tracking
//!
//! Every scheduler request carries the term it was issued under. A newer
//! term replaces the current one (the caller then drops its block state);
//! an older one is rejected. Once stopped, every request is rejected.

use crate::domain::errors::ExecuteError;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{info, warn};

/// Term value marking a stopped executor
pub const STOPPED_TERM: i64 = -1;

/// What admitting a request did to the current term
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermChange {
    Same,
    Switched { from: i64, to: i64 },
}

#[derive(Debug)]
pub struct ExecutorSwitch {
    term: AtomicI64,
}

impl ExecutorSwitch {
    pub fn new(term: i64) -> Self {
        Self {
            term: AtomicI64::new(term),
        }
    }

    pub fn current(&self) -> i64 {
        self.term.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.current() == STOPPED_TERM
    }

    /// Check `requested` against the current term, moving forward if newer.
    pub fn admit(&self, requested: i64) -> Result<TermChange, ExecuteError> {
        let mut current = self.current();
        loop {
            if current == STOPPED_TERM {
                return Err(ExecuteError::Stopped);
            }
            if requested < current {
                warn!(requested, current, "Request from an outdated scheduler term");
                return Err(ExecuteError::SchedulerTermMismatch { requested, current });
            }
            if requested == current {
                return Ok(TermChange::Same);
            }

            match self.term.compare_exchange(
                current,
                requested,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    info!(from = current, to = requested, "Scheduler term switched");
                    return Ok(TermChange::Switched {
                        from: current,
                        to: requested,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn stop(&self) {
        let previous = self.term.swap(STOPPED_TERM, Ordering::AcqRel);
        if previous != STOPPED_TERM {
            info!(term = previous, "Executor stopped");
        }
    }
}

impl Default for ExecutorSwitch {
    fn default() -> Self {
        Self::new(0)
    }
}
