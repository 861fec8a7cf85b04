//! Block context
//!
//! Per-block registry of flow controllers plus the block's identity and
//! storage handle. Everything but the storage handle is fixed at
//! construction; the handle may be swapped between DMC rounds.

use crate::domain::value_objects::{Address, BlockHeader};
use crate::executive::{ExecutionEnv, ExecutiveFactory};
use crate::flow::{DagFlow, FlowController, StackFlow};
use crate::ports::outbound::StateStorage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct BlockContext {
    header: BlockHeader,
    storage: RwLock<Arc<dyn StateStorage>>,
    prev_storage: Option<Arc<dyn StateStorage>>,
    env: Arc<ExecutionEnv>,
    factory: Arc<ExecutiveFactory>,
    flows: RwLock<HashMap<Address, Arc<FlowController>>>,
}

impl BlockContext {
    pub fn new(
        header: BlockHeader,
        storage: Arc<dyn StateStorage>,
        prev_storage: Option<Arc<dyn StateStorage>>,
        env: Arc<ExecutionEnv>,
    ) -> Arc<Self> {
        info!(
            number = header.number,
            timestamp = header.timestamp,
            "Block context created"
        );

        Arc::new_cyclic(|block| Self {
            header,
            storage: RwLock::new(storage),
            prev_storage,
            factory: Arc::new(if env.config().enable_sharding {
                ExecutiveFactory::sharding(block.clone(), env.clone())
            } else {
                ExecutiveFactory::new(block.clone(), env.clone())
            }),
            env,
            flows: RwLock::new(HashMap::new()),
        })
    }

    pub fn header(&self) -> BlockHeader {
        self.header
    }

    pub fn number(&self) -> i64 {
        self.header.number
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn is_wasm(&self) -> bool {
        self.env.config().is_wasm
    }

    pub fn is_auth_check(&self) -> bool {
        self.env.config().is_auth_check
    }

    pub fn env(&self) -> &ExecutionEnv {
        &self.env
    }

    pub fn factory(&self) -> &Arc<ExecutiveFactory> {
        &self.factory
    }

    pub fn storage(&self) -> Arc<dyn StateStorage> {
        self.storage.read().clone()
    }

    /// Replace the storage handle; units started afterwards see the new one.
    pub fn swap_storage(&self, storage: Arc<dyn StateStorage>) -> Arc<dyn StateStorage> {
        std::mem::replace(&mut *self.storage.write(), storage)
    }

    pub fn prev_storage(&self) -> Option<Arc<dyn StateStorage>> {
        self.prev_storage.clone()
    }

    /// Flow controller of `contract`, created on first use.
    pub fn get_flow_controller(&self, contract: &str) -> Arc<FlowController> {
        if let Some(flow) = self.flows.read().get(contract) {
            return flow.clone();
        }

        let mut flows = self.flows.write();
        flows
            .entry(contract.to_string())
            .or_insert_with(|| {
                let flow = if self.env.config().enable_dag {
                    FlowController::Dag(DagFlow::new(contract, self.factory.clone()))
                } else {
                    FlowController::Stack(StackFlow::new(contract, self.factory.clone()))
                };
                debug!(
                    number = self.header.number,
                    %contract,
                    dag = flow.is_dag(),
                    "Flow controller created"
                );
                Arc::new(flow)
            })
            .clone()
    }

    /// A stack flow for `contract` that is not registered in this block.
    pub fn detached_flow(&self, contract: &str) -> Arc<FlowController> {
        Arc::new(FlowController::Stack(StackFlow::new(
            contract,
            self.factory.clone(),
        )))
    }

    pub fn flow_count(&self) -> usize {
        self.flows.read().len()
    }

    /// Stop every registered flow.
    pub fn stop(&self) {
        for flow in self.flows.read().values() {
            flow.stop();
        }
    }

    /// Drop every flow controller and its queued calls.
    pub fn clear(&self) {
        let flows = std::mem::take(&mut *self.flows.write());
        for flow in flows.values() {
            flow.clear();
        }
        info!(
            number = self.header.number,
            flows = flows.len(),
            "Block context cleared"
        );
    }
}
