//! Transaction Execution Service
//!
//! Main service implementing `TransactionExecutionApi`. Owns the current
//! block, the scheduler term and the speculative DAG cache; flow runs and
//! DAG runs happen on the executor's flow pool and are awaited through
//! oneshot channels.

use super::block_context::BlockContext;
use super::dag_cache::{DagCacheKey, SpeculativeDagCache};
use super::executor_switch::{ExecutorSwitch, TermChange};
use crate::adapters::InMemoryStorage;
use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{Address, BlockHeader, CallKey, Entry, MessageType};
use crate::domain::CallContext;
use crate::executive::ExecutionEnv;
use crate::flow::{DagTask, FlowController};
use crate::ports::inbound::TransactionExecutionApi;
use crate::ports::outbound::StateStorage;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Contract key used for batches spanning several contracts
pub const ANY_CONTRACT: &str = "";

/// Transaction Execution Service
///
/// Request handling:
/// 1. Admit the scheduler term (a newer term drops the current block)
/// 2. Resolve the current block
/// 3. Submit into the flow controller or DAG task
/// 4. Run on the flow pool and collect outputs
pub struct TransactionExecutor {
    env: Arc<ExecutionEnv>,
    switch: ExecutorSwitch,
    /// State below the first executed block
    base_storage: Arc<dyn StateStorage>,
    block: RwLock<Option<Arc<BlockContext>>>,
    /// Storage layer of every block opened in this term, by number
    blocks: RwLock<BTreeMap<i64, Arc<dyn StateStorage>>>,
    dag_cache: SpeculativeDagCache,
    /// Temporary flows of single calls still waiting for a response
    call_flows: Mutex<HashMap<CallKey, Arc<FlowController>>>,
    pause: Arc<AtomicBool>,
}

impl TransactionExecutor {
    pub fn new(env: Arc<ExecutionEnv>, base_storage: Arc<dyn StateStorage>) -> Self {
        Self::with_term(env, base_storage, 0)
    }

    pub fn with_term(env: Arc<ExecutionEnv>, base_storage: Arc<dyn StateStorage>, term: i64) -> Self {
        let dag_cache = SpeculativeDagCache::new(env.config().dag_cache_capacity);
        Self {
            env,
            switch: ExecutorSwitch::new(term),
            base_storage,
            block: RwLock::new(None),
            blocks: RwLock::new(BTreeMap::new()),
            dag_cache,
            call_flows: Mutex::new(HashMap::new()),
            pause: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn env(&self) -> &Arc<ExecutionEnv> {
        &self.env
    }

    pub fn term(&self) -> i64 {
        self.switch.current()
    }

    pub fn current_block(&self) -> Option<Arc<BlockContext>> {
        self.block.read().clone()
    }

    pub fn dag_cache(&self) -> &SpeculativeDagCache {
        &self.dag_cache
    }

    /// Admit `term`, dropping block state if it moved forward.
    fn admit(&self, term: i64) -> Result<(), ExecuteError> {
        if let TermChange::Switched { from, to } = self.switch.admit(term)? {
            info!(from, to, "Dropping block state of previous term");
            self.reset_block();
        }
        Ok(())
    }

    fn reset_block(&self) {
        if let Some(block) = self.block.write().take() {
            block.stop();
            block.clear();
        }
        self.call_flows.lock().clear();
    }

    fn require_block(&self) -> Result<Arc<BlockContext>, ExecuteError> {
        self.current_block()
            .ok_or(ExecuteError::BlockContextUnavailable)
    }

    /// Storage the block `number` is layered on.
    fn storage_below(&self, number: i64) -> Arc<dyn StateStorage> {
        self.blocks
            .read()
            .range(..number)
            .next_back()
            .map(|(_, storage)| storage.clone())
            .unwrap_or_else(|| self.base_storage.clone())
    }

    /// Run `job` on the flow pool and await its result.
    async fn on_flow_pool<T, F>(&self, job: F) -> Result<T, ExecuteError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ExecuteError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.env.pools().flow().spawn(move || {
            // Receiver gone means the request was cancelled
            let _ = tx.send(job());
        });
        rx.await.map_err(|_| ExecuteError::Stopped)?
    }

    /// Run `flow` to its next quiescent point and collect every output.
    async fn run_flow(&self, flow: &Arc<FlowController>) -> Result<Vec<CallContext>, ExecuteError> {
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();

        let sink = outputs.clone();
        flow.async_run(
            Box::new(move |output| sink.lock().push(output)),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let result = rx.await.map_err(|_| ExecuteError::Stopped)?;
        let outputs = std::mem::take(&mut *outputs.lock());
        match result {
            Ok(()) => Ok(outputs),
            Err(e) => {
                if !matches!(e, ExecuteError::Stopped) {
                    warn!(contract = %flow.contract(), error = %e, "Flow failed, clearing it");
                    flow.clear();
                }
                Err(e)
            }
        }
    }

    fn cache_key(block: &BlockContext, contract: &str) -> DagCacheKey {
        DagCacheKey::new(block.number(), block.timestamp(), contract)
    }

    /// Contract shared by every input, or `ANY_CONTRACT`.
    fn batch_contract(inputs: &[CallContext]) -> Address {
        match inputs.split_first() {
            Some((first, rest))
                if rest
                    .iter()
                    .all(|input| input.receive_address == first.receive_address) =>
            {
                first.receive_address.clone()
            }
            _ => ANY_CONTRACT.to_string(),
        }
    }

    fn digest(rows: &[(String, String, Entry)]) -> String {
        let mut hasher = Sha256::new();
        for (table, key, entry) in rows {
            hasher.update((table.len() as u64).to_be_bytes());
            hasher.update(table.as_bytes());
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update([entry.deleted as u8]);
            hasher.update((entry.value.len() as u64).to_be_bytes());
            hasher.update(&entry.value);
        }
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl TransactionExecutionApi for TransactionExecutor {
    #[instrument(skip(self), fields(number = header.number))]
    async fn next_block_header(&self, term: i64, header: BlockHeader) -> Result<(), ExecuteError> {
        self.admit(term)?;

        let prev = self.storage_below(header.number);
        let storage: Arc<dyn StateStorage> = Arc::new(InMemoryStorage::layered(prev.clone()));
        {
            let mut blocks = self.blocks.write();
            // Re-executing a block abandons it and everything above it
            blocks.split_off(&header.number);
            blocks.insert(header.number, storage.clone());
        }

        let block = BlockContext::new(header, storage, Some(prev), self.env.clone());
        if let Some(previous) = self.block.write().replace(block) {
            previous.stop();
            previous.clear();
        }
        self.call_flows.lock().clear();
        self.dag_cache.purge_below(header.number);

        info!(number = header.number, timestamp = header.timestamp, "Next block");
        Ok(())
    }

    #[instrument(skip(self, inputs), fields(inputs = inputs.len()))]
    async fn dmc_execute_transactions(
        &self,
        term: i64,
        contract: Address,
        inputs: Vec<CallContext>,
    ) -> Result<Vec<CallContext>, ExecuteError> {
        self.admit(term)?;
        let block = self.require_block()?;
        let flow = block.get_flow_controller(&contract);

        if let FlowController::Dag(dag) = flow.as_ref() {
            let fresh: Vec<CallContext> = inputs
                .iter()
                .filter(|input| input.is_origin() && !input.static_call)
                .cloned()
                .collect();
            if !fresh.is_empty() {
                match self.dag_cache.take(&Self::cache_key(&block, &contract), &fresh) {
                    Ok(task) => dag.set_prepared(task),
                    Err(e) => debug!(error = %e, "Building DAG in flow"),
                }
            }
        }

        flow.submit_batch(inputs)?;
        let outputs = self.run_flow(&flow).await?;

        debug!(%contract, outputs = outputs.len(), "DMC round finished");
        Ok(outputs)
    }

    #[instrument(skip(self, inputs), fields(inputs = inputs.len()))]
    async fn dag_execute_transactions(
        &self,
        term: i64,
        inputs: Vec<CallContext>,
    ) -> Result<Vec<CallContext>, ExecuteError> {
        self.admit(term)?;
        let block = self.require_block()?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let key = Self::cache_key(&block, &Self::batch_contract(&inputs));
        let prepared = match self.dag_cache.take(&key, &inputs) {
            Ok(task) => Some(task),
            Err(e) => {
                debug!(error = %e, "Building DAG for batch");
                None
            }
        };
        let pause = self.pause.clone();

        self.on_flow_pool(move || {
            let task = match prepared {
                Some(task) => task,
                None => match DagTask::build(&block, inputs) {
                    Ok(task) => task,
                    Err((e, inputs)) => {
                        warn!(
                            error = %e,
                            inputs = inputs.len(),
                            "DAG build failed, sending batch back"
                        );
                        return Ok(inputs
                            .into_iter()
                            .map(|input| input.with_type(MessageType::SendBack))
                            .collect());
                    }
                },
            };
            let size = task.len();
            let factory = block.factory().clone();
            let outcome = task.execute(&factory, factory.env().pools().flow(), &pause)?;

            let mut outputs: Vec<Option<CallContext>> = vec![None; size];
            for (tx, output) in outcome.outputs {
                outputs[tx] = Some(output);
            }
            for (tx, input) in outcome.serial {
                outputs[tx] = Some(input.with_type(MessageType::SendBack));
            }

            info!(
                number = block.number(),
                executed = outcome.stats.nodes_executed,
                levels = outcome.stats.levels,
                "DAG batch finished"
            );

            outputs
                .into_iter()
                .enumerate()
                .map(|(tx, output)| {
                    output.ok_or_else(|| ExecuteError::Dag(format!("transaction {tx} has no output")))
                })
                .collect()
        })
        .await
    }

    #[instrument(skip(self, inputs), fields(number = header.number, inputs = inputs.len()))]
    async fn prepare_dag_flow(
        &self,
        term: i64,
        header: BlockHeader,
        contract: Address,
        inputs: Vec<CallContext>,
    ) -> Result<(), ExecuteError> {
        self.admit(term)?;

        // Reads fall through to the newest state; nothing is written
        let prev = self.storage_below(header.number);
        let speculative = BlockContext::new(
            header,
            Arc::new(InMemoryStorage::layered(prev.clone())),
            Some(prev),
            self.env.clone(),
        );

        let task = self
            .on_flow_pool(move || DagTask::prepare(&speculative, inputs))
            .await?;
        self.dag_cache
            .put(DagCacheKey::new(header.number, header.timestamp, contract), task);
        Ok(())
    }

    #[instrument(skip(self, input), fields(context_id = input.context_id, seq = input.seq))]
    async fn execute_transaction(
        &self,
        term: i64,
        input: CallContext,
    ) -> Result<CallContext, ExecuteError> {
        self.admit(term)?;
        let block = self.require_block()?;
        let key = input.key();

        // One flow per call key; a resume with the same key reuses it
        let flow = self
            .call_flows
            .lock()
            .entry(key)
            .or_insert_with(|| block.detached_flow(&input.receive_address))
            .clone();

        flow.submit(input)?;
        let output = match self.run_flow(&flow).await {
            Ok(outputs) => outputs.into_iter().find(|output| output.key() == key),
            Err(e) => {
                self.call_flows.lock().remove(&key);
                return Err(e);
            }
        };

        let output = output.ok_or_else(|| {
            ExecuteError::InvalidState(format!("call {key} produced no output"))
        })?;
        if output.is_terminal() {
            self.call_flows.lock().remove(&key);
        }
        Ok(output)
    }

    async fn get_hash(&self, term: i64, number: i64) -> Result<String, ExecuteError> {
        self.admit(term)?;
        let storage = self
            .blocks
            .read()
            .get(&number)
            .cloned()
            .ok_or(ExecuteError::BlockContextUnavailable)?;

        let hash = Self::digest(&storage.dirty_rows());
        debug!(number, %hash, "Block state hash");
        Ok(hash)
    }

    async fn switch_term(&self, term: i64) -> Result<(), ExecuteError> {
        self.admit(term)
    }

    async fn stop(&self) -> Result<(), ExecuteError> {
        self.switch.stop();
        self.pause.store(true, Ordering::Release);
        if let Some(block) = self.current_block() {
            block.stop();
        }
        for flow in self.call_flows.lock().values() {
            flow.stop();
        }
        Ok(())
    }
}
