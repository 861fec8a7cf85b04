//! Lifecycle of one unit across DMC iterations
//!
//! ```text
//! NeedRun ──go──▶ Paused ──set_resume_param──▶ NeedResume ──go──▶ Paused
//!    │                                              │
//!    └──────go──────▶ Finished ◀────────go──────────┘
//! ```
//!
//! The next status is derived only from the type of the unit's output.

use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{CallKey, MessageType};
use crate::domain::CallContext;
use crate::executive::{ExecutionUnit, ExecutiveFactory};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStatus {
    NeedRun,
    Paused,
    NeedResume,
    Finished,
}

pub struct CallState {
    key: CallKey,
    status: CallStatus,
    unit: Option<ExecutionUnit>,
    input: Option<CallContext>,
    last_output: Option<CallContext>,
}

impl CallState {
    pub fn new(input: CallContext) -> Self {
        Self {
            key: input.key(),
            status: CallStatus::NeedRun,
            unit: None,
            input: Some(input),
            last_output: None,
        }
    }

    pub fn key(&self) -> CallKey {
        self.key
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Hand a response back to a paused chain.
    pub fn set_resume_param(&mut self, ctx: CallContext) -> Result<(), ExecuteError> {
        if self.status == CallStatus::Finished {
            return Err(ExecuteError::InvalidState(format!(
                "call {} already finished",
                self.key
            )));
        }
        self.input = Some(ctx);
        self.status = CallStatus::NeedResume;
        Ok(())
    }

    /// Prepend keys onto the held-lock set of the pending input.
    pub fn prepend_key_locks(&mut self, mut locks: Vec<String>) {
        if let Some(input) = self.input.as_mut() {
            locks.append(&mut input.key_locks);
            input.key_locks = locks;
        }
    }

    /// Advance the unit by one step.
    ///
    /// Returns `None` while paused without a resume parameter, and the
    /// stored terminal output once finished. Transaction-scoped failures
    /// (deadlock, body fault) become a `Revert` output; anything else is
    /// returned as an error.
    pub fn go(
        &mut self,
        factory: &Arc<ExecutiveFactory>,
    ) -> Result<Option<CallContext>, ExecuteError> {
        let result = match self.status {
            CallStatus::Finished => return Ok(self.last_output.clone()),
            CallStatus::Paused => return Ok(None),
            CallStatus::NeedRun => {
                let input = self.take_input()?;
                if input.is_terminal() {
                    // Nothing to execute, the response passes straight through
                    Ok(input)
                } else {
                    let unit = self.unit.insert(factory.build(&input));
                    unit.start(input.clone())
                        .or_else(|e| Self::contain(&input, e))
                }
            }
            CallStatus::NeedResume => {
                let key = self.key;
                let input = self.take_input()?;
                let unit = self.unit.as_mut().ok_or_else(|| {
                    ExecuteError::InvalidState(format!("call {key} has no unit to resume"))
                })?;
                unit.set_exchange_message(input.clone());
                unit.resume().or_else(|e| Self::contain(&input, e))
            }
        };

        let mut output = result?;
        if output.key() != self.key {
            warn!(
                expected = %self.key,
                actual = %output.key(),
                "Output key differs from call state, overwriting"
            );
            output.set_key(self.key);
        }

        self.status = match output.message_type {
            MessageType::Message | MessageType::KeyLock => CallStatus::Paused,
            MessageType::Finished | MessageType::Revert => CallStatus::Finished,
            other => {
                return Err(ExecuteError::UnknownMessageType(format!("{other:?}")));
            }
        };

        debug!(
            context_id = self.key.context_id,
            seq = self.key.seq,
            output = ?output.message_type,
            status = ?self.status,
            "Call state advanced"
        );

        if self.status == CallStatus::Finished {
            self.unit = None;
            self.last_output = Some(output.clone());
        }
        Ok(Some(output))
    }

    fn take_input(&mut self) -> Result<CallContext, ExecuteError> {
        self.input
            .take()
            .ok_or_else(|| ExecuteError::InvalidState(format!("call {} has no input", self.key)))
    }

    fn contain(input: &CallContext, error: ExecuteError) -> Result<CallContext, ExecuteError> {
        if error.is_transaction_scoped() {
            warn!(
                context_id = input.context_id,
                seq = input.seq,
                %error,
                "Call reverted"
            );
            Ok(input.revert_from_error(&error))
        } else {
            Err(error)
        }
    }
}
