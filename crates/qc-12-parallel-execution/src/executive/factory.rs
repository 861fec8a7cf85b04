//! Execution unit factory
//!
//! Builds units bound to one block. The block is referenced weakly: units
//! built after the block was dropped fail with `BlockContextUnavailable`
//! when they start. The sharding variant namespaces tracked keys by the
//! unit's contract address.

use super::env::ExecutionEnv;
use super::storage_wrapper::StorageAccessWrapper;
use super::unit::ExecutionUnit;
use crate::application::block_context::BlockContext;
use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{Address, CallKey};
use crate::domain::CallContext;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Weak};

pub struct ExecutiveFactory {
    block: Weak<BlockContext>,
    env: Arc<ExecutionEnv>,
    sharding: bool,
}

impl ExecutiveFactory {
    pub fn new(block: Weak<BlockContext>, env: Arc<ExecutionEnv>) -> Self {
        Self {
            block,
            env,
            sharding: false,
        }
    }

    /// Factory whose units track keys per contract address.
    pub fn sharding(block: Weak<BlockContext>, env: Arc<ExecutionEnv>) -> Self {
        Self {
            block,
            env,
            sharding: true,
        }
    }

    pub fn is_sharding(&self) -> bool {
        self.sharding
    }

    pub fn env(&self) -> &ExecutionEnv {
        &self.env
    }

    pub fn block(&self) -> Result<Arc<BlockContext>, ExecuteError> {
        self.block
            .upgrade()
            .ok_or(ExecuteError::BlockContextUnavailable)
    }

    /// Unit for the first step of `input`'s chain.
    pub fn build(self: &Arc<Self>, input: &CallContext) -> ExecutionUnit {
        self.build_unit(
            input.code_address.clone(),
            input.key(),
            0,
            Arc::new(AtomicI64::new(input.seq)),
        )
    }

    /// Unit for `contract` at `key`, `depth` calls below the transaction.
    ///
    /// `seq_source` is shared by every unit of one inline call chain.
    pub fn build_unit(
        self: &Arc<Self>,
        contract: Address,
        key: CallKey,
        depth: usize,
        seq_source: Arc<AtomicI64>,
    ) -> ExecutionUnit {
        ExecutionUnit::new(
            key,
            contract,
            depth,
            self.env.config().suspension,
            self.clone(),
            seq_source,
        )
    }

    pub(crate) fn storage_wrapper(
        &self,
        block: &BlockContext,
        contract: &str,
    ) -> StorageAccessWrapper {
        let wrapper = StorageAccessWrapper::new(block.storage());
        if self.sharding {
            wrapper.with_namespace(contract)
        } else {
            wrapper
        }
    }
}
