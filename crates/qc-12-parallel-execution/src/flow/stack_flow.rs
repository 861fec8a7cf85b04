//! Stack flow controller
//!
//! Drives the call states of one contract across DMC rounds with three
//! pools:
//!
//! - origin queue: new top-level calls, FIFO, only drained while nothing
//!   is paused, and only until the first call pauses
//! - waiting set: chains with a pending input, by context ascending and
//!   seq descending; always processed first
//! - paused pool: chains waiting for an external response
//!
//! Every output, suspension or terminal, is passed to the caller.

use super::call_state::{CallState, CallStatus};
use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{Address, CallKey, ContextId, Seq};
use crate::domain::CallContext;
use crate::executive::ExecutiveFactory;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Default)]
struct StackPools {
    origin: VecDeque<CallKey>,
    waiting: BTreeSet<(ContextId, Reverse<Seq>)>,
    paused: HashSet<CallKey>,
    states: HashMap<CallKey, CallState>,
}

impl StackPools {
    fn is_idle(&self) -> bool {
        self.origin.is_empty() && self.waiting.is_empty()
    }
}

pub struct StackFlow {
    contract: Address,
    factory: Arc<ExecutiveFactory>,
    /// Held for the whole of `run`, which makes runs exclusive
    pools: Mutex<StackPools>,
    stopped: AtomicBool,
}

impl StackFlow {
    pub fn new(contract: impl Into<Address>, factory: Arc<ExecutiveFactory>) -> Self {
        Self {
            contract: contract.into(),
            factory,
            pools: Mutex::new(StackPools::default()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn factory(&self) -> &Arc<ExecutiveFactory> {
        &self.factory
    }

    /// Route one message into the origin queue or the waiting set.
    pub fn submit(&self, ctx: CallContext) -> Result<(), ExecuteError> {
        if self.is_stopped() {
            return Err(ExecuteError::Stopped);
        }

        let key = ctx.key();
        let mut pools = self.pools.lock();

        if let Some(state) = pools.states.get_mut(&key) {
            state.set_resume_param(ctx)?;
            pools.paused.remove(&key);
            pools.waiting.insert(key.resume_order());
            trace!(contract = %self.contract, %key, "Resume submitted");
            return Ok(());
        }

        let is_origin = ctx.is_origin();
        pools.states.insert(key, CallState::new(ctx));
        if is_origin {
            pools.origin.push_back(key);
        } else {
            pools.waiting.insert(key.resume_order());
        }
        trace!(contract = %self.contract, %key, is_origin, "Call submitted");
        Ok(())
    }

    pub fn submit_batch(&self, inputs: Vec<CallContext>) -> Result<(), ExecuteError> {
        inputs.into_iter().try_for_each(|ctx| self.submit(ctx))
    }

    /// Process the waiting set, then the origin queue.
    pub fn run(&self, on_output: &mut dyn FnMut(CallContext)) -> Result<(), ExecuteError> {
        let mut pools = self.pools.lock();
        self.check_stopped()?;

        debug!(
            contract = %self.contract,
            waiting = pools.waiting.len(),
            origin = pools.origin.len(),
            paused = pools.paused.len(),
            "Running stack flow"
        );

        // Keys exported by the previous resumed call, handed to the next one
        let mut carried: Vec<String> = Vec::new();

        while let Some((context_id, Reverse(seq))) = pools.waiting.pop_first() {
            self.check_stopped()?;

            let key = CallKey::new(context_id, seq);
            let Some(state) = pools.states.get_mut(&key) else {
                warn!(contract = %self.contract, %key, "Waiting call has no state");
                continue;
            };

            if !carried.is_empty() {
                state.prepend_key_locks(std::mem::take(&mut carried));
            }

            let output = match state.go(&self.factory) {
                Ok(output) => output,
                Err(e) => return Err(Self::abandon(&mut pools, key, e)),
            };
            if let Some(output) = output {
                carried = output.key_locks.clone();
                Self::settle(&mut pools, key, on_output, output);
            }
        }

        if pools.paused.is_empty() {
            while let Some(key) = pools.origin.pop_front() {
                if self.is_stopped() {
                    pools.origin.push_front(key);
                    return Err(ExecuteError::Stopped);
                }

                let Some(state) = pools.states.get_mut(&key) else {
                    warn!(contract = %self.contract, %key, "Origin call has no state");
                    continue;
                };

                let paused = match state.go(&self.factory) {
                    Ok(Some(output)) => Self::settle(&mut pools, key, on_output, output),
                    Ok(None) => false,
                    Err(e) => return Err(Self::abandon(&mut pools, key, e)),
                };
                if paused {
                    break;
                }
            }
        }

        if pools.is_idle() && pools.paused.is_empty() {
            info!(contract = %self.contract, "Stack flow drained");
        }
        Ok(())
    }

    /// Book an output; returns whether the call paused.
    fn settle(
        pools: &mut StackPools,
        key: CallKey,
        on_output: &mut dyn FnMut(CallContext),
        output: CallContext,
    ) -> bool {
        let paused = match pools.states.get(&key).map(CallState::status) {
            Some(CallStatus::Paused) => {
                pools.paused.insert(key);
                true
            }
            _ => {
                pools.states.remove(&key);
                false
            }
        };
        on_output(output);
        paused
    }

    /// Forget a call whose state failed to advance.
    fn abandon(pools: &mut StackPools, key: CallKey, error: ExecuteError) -> ExecuteError {
        pools.states.remove(&key);
        pools.paused.remove(&key);
        warn!(%key, %error, "Call state failed, dropping it");
        error
    }

    /// Stop the flow; a running iteration stops at the next call boundary.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!(contract = %self.contract, "Stack flow stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn check_stopped(&self) -> Result<(), ExecuteError> {
        if self.is_stopped() {
            Err(ExecuteError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Calls still owned by this flow (queued, waiting or paused).
    pub fn pending_calls(&self) -> usize {
        self.pools.lock().states.len()
    }

    pub fn paused_calls(&self) -> Vec<CallKey> {
        let mut paused: Vec<_> = self.pools.lock().paused.iter().copied().collect();
        paused.sort_unstable();
        paused
    }

    /// Drop every queued and paused call.
    pub fn clear(&self) {
        let mut pools = self.pools.lock();
        *pools = StackPools::default();
    }
}
