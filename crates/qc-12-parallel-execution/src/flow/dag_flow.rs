//! DAG flow controller
//!
//! Fresh top-level calls are collected and, on `run`, executed through a
//! conflict DAG in parallel before the stack flow takes over. Calls whose
//! critical fields are unknown, creates and calls to non-parallel
//! precompiles bypass the DAG and enter the stack flow as ordinary origin
//! calls.

use super::stack_flow::StackFlow;
use crate::algorithms::{build_conflict_graph, CriticalFields, DagRunner};
use crate::application::block_context::BlockContext;
use crate::domain::entities::{ConflictGraph, DagRunStats};
use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{Address, Bytes, TxId};
use crate::domain::CallContext;
use crate::executive::ExecutiveFactory;
use parking_lot::Mutex;
use rayon::ThreadPool;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A batch with its critical fields and conflict graph.
///
/// Graph node `n` is transaction `eligible[n]` of `inputs`.
pub struct DagTask {
    inputs: Vec<CallContext>,
    fields: CriticalFields,
    eligible: Vec<TxId>,
    graph: ConflictGraph,
    fingerprint: String,
}

/// Result of executing a `DagTask`.
pub struct DagOutcome {
    /// Terminal outputs of the DAG transactions, by transaction id
    pub outputs: Vec<(TxId, CallContext)>,
    /// Inputs that must run serially, by transaction id
    pub serial: Vec<(TxId, CallContext)>,
    pub stats: DagRunStats,
}

impl DagTask {
    /// Extract critical fields for every input and build the graph.
    pub fn prepare(block: &BlockContext, inputs: Vec<CallContext>) -> Result<Self, ExecuteError> {
        Self::build(block, inputs).map_err(|(e, _)| e)
    }

    /// Like `prepare`, but hands the inputs back when the graph cannot be
    /// built.
    pub fn build(
        block: &BlockContext,
        inputs: Vec<CallContext>,
    ) -> Result<Self, (ExecuteError, Vec<CallContext>)> {
        let mut fields = CriticalFields::new(inputs.len());
        for (id, input) in inputs.iter().enumerate() {
            fields.put(id, critical_fields_of(block, input));
        }

        let eligible = fields.eligible();
        let graph = match build_conflict_graph(
            &fields.eligible_fields(),
            block.env().config().max_edge_count,
        ) {
            Ok(graph) => graph,
            Err(e) => return Err((e.into(), inputs)),
        };
        let fingerprint = Self::fingerprint_of(&inputs);

        debug!(
            inputs = inputs.len(),
            eligible = eligible.len(),
            edges = graph.edge_count(),
            "Prepared DAG task"
        );

        Ok(Self {
            inputs,
            fields,
            eligible,
            graph,
            fingerprint,
        })
    }

    /// Digest identifying a batch: keys, targets, call flags and payloads
    /// in order.
    pub fn fingerprint_of(inputs: &[CallContext]) -> String {
        let mut hasher = Sha256::new();
        for input in inputs {
            hasher.update(input.context_id.to_be_bytes());
            hasher.update(input.seq.to_be_bytes());
            hasher.update([input.create as u8, input.static_call as u8]);
            for address in [&input.receive_address, &input.code_address] {
                hasher.update((address.len() as u64).to_be_bytes());
                hasher.update(address.as_bytes());
            }
            hasher.update((input.data.len() as u64).to_be_bytes());
            hasher.update(&input.data);
        }
        hex::encode(hasher.finalize())
    }

    pub fn matches(&self, inputs: &[CallContext]) -> bool {
        self.fingerprint == Self::fingerprint_of(inputs)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn graph(&self) -> &ConflictGraph {
        &self.graph
    }

    pub fn eligible(&self) -> &[TxId] {
        &self.eligible
    }

    pub fn critical_fields(&self) -> &CriticalFields {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Run the eligible transactions inline on `pool`.
    ///
    /// Fails with `Stopped` when `pause` was raised before every node ran.
    pub fn execute(
        self,
        factory: &Arc<ExecutiveFactory>,
        pool: &ThreadPool,
        pause: &AtomicBool,
    ) -> Result<DagOutcome, ExecuteError> {
        let results: Vec<Mutex<Option<Result<CallContext, ExecuteError>>>> =
            self.eligible.iter().map(|_| Mutex::new(None)).collect();

        let stats = DagRunner::run(&self.graph, pool, pause, |node| {
            let input = &self.inputs[self.eligible[node]];
            let mut unit = factory.build(input);
            let result = match futures::executor::block_on(unit.execute_inline(input.clone())) {
                Err(e) if e.is_transaction_scoped() => Ok(input.revert_from_error(&e)),
                other => other,
            };
            *results[node].lock() = Some(result);
        })?;

        if stats.nodes_executed < stats.nodes_total {
            warn!(
                executed = stats.nodes_executed,
                total = stats.nodes_total,
                "DAG run interrupted"
            );
            return Err(ExecuteError::Stopped);
        }

        let mut outputs = Vec::with_capacity(self.eligible.len());
        for (node, slot) in results.into_iter().enumerate() {
            let tx = self.eligible[node];
            match slot.into_inner() {
                Some(Ok(output)) => outputs.push((tx, output)),
                Some(Err(e)) => return Err(e),
                None => return Err(ExecuteError::Dag(format!("transaction {tx} did not run"))),
            }
        }

        let serial_ids = self.fields.serial();
        let serial = self
            .inputs
            .into_iter()
            .enumerate()
            .filter(|(id, _)| serial_ids.binary_search(id).is_ok())
            .collect();

        Ok(DagOutcome {
            outputs,
            serial,
            stats,
        })
    }
}

/// Critical fields of one input, `None` when it must run serially.
fn critical_fields_of(block: &BlockContext, input: &CallContext) -> Option<Vec<Bytes>> {
    if input.create || !input.is_origin() || input.static_call {
        return None;
    }

    let env = block.env();
    if let Some(precompiled) = env.precompiled().get(&input.receive_address) {
        if !precompiled.is_parallel() {
            return None;
        }
        let suffix = input.receive_address.as_bytes();
        return precompiled.parallel_tags(input).map(|tags| {
            tags.into_iter()
                .map(|mut tag| {
                    tag.extend_from_slice(suffix);
                    tag
                })
                .collect()
        });
    }

    let storage = block.storage();
    env.conflict_fields()
        .conflict_fields(storage.as_ref(), &block.header(), input)
}

pub struct DagFlow {
    stack: StackFlow,
    /// Fresh top-level calls not yet run
    pending: Mutex<Vec<CallContext>>,
    prepared: Mutex<Option<DagTask>>,
    run_lock: Mutex<()>,
    pause: AtomicBool,
}

impl DagFlow {
    pub fn new(contract: impl Into<Address>, factory: Arc<ExecutiveFactory>) -> Self {
        Self {
            stack: StackFlow::new(contract, factory),
            pending: Mutex::new(Vec::new()),
            prepared: Mutex::new(None),
            run_lock: Mutex::new(()),
            pause: AtomicBool::new(false),
        }
    }

    pub fn contract(&self) -> &str {
        self.stack.contract()
    }

    pub fn factory(&self) -> &Arc<ExecutiveFactory> {
        self.stack.factory()
    }

    pub fn stack(&self) -> &StackFlow {
        &self.stack
    }

    pub fn submit(&self, ctx: CallContext) -> Result<(), ExecuteError> {
        if self.is_stopped() {
            return Err(ExecuteError::Stopped);
        }
        if ctx.is_origin() && !ctx.static_call {
            self.pending.lock().push(ctx);
            Ok(())
        } else {
            self.stack.submit(ctx)
        }
    }

    /// Build the DAG of `inputs` ahead of the run that will submit them.
    pub fn prepare(&self, inputs: Vec<CallContext>) -> Result<(), ExecuteError> {
        let block = self.factory().block()?;
        let task = DagTask::prepare(&block, inputs)?;
        *self.prepared.lock() = Some(task);
        Ok(())
    }

    /// Install a task prepared elsewhere.
    pub fn set_prepared(&self, task: DagTask) {
        *self.prepared.lock() = Some(task);
    }

    pub fn run(&self, on_output: &mut dyn FnMut(CallContext)) -> Result<(), ExecuteError> {
        let _running = self.run_lock.lock();

        let inputs = std::mem::take(&mut *self.pending.lock());
        if !inputs.is_empty() {
            let block = self.factory().block()?;
            match self.task_for(&block, inputs) {
                Ok(task) => self.run_task(task, on_output)?,
                Err((e, inputs)) => {
                    warn!(
                        contract = %self.contract(),
                        transactions = inputs.len(),
                        error = %e,
                        "DAG build failed, running batch serially"
                    );
                    for input in inputs {
                        self.stack.submit(input)?;
                    }
                }
            }
        }

        self.stack.run(on_output)
    }

    fn run_task(
        &self,
        task: DagTask,
        on_output: &mut dyn FnMut(CallContext),
    ) -> Result<(), ExecuteError> {
        let factory = self.factory().clone();
        let outcome = task.execute(&factory, factory.env().pools().flow(), &self.pause)?;

        info!(
            contract = %self.contract(),
            parallel = outcome.outputs.len(),
            serial = outcome.serial.len(),
            levels = outcome.stats.levels,
            "DAG stage finished"
        );

        for (_, output) in outcome.outputs {
            on_output(output);
        }
        for (_, input) in outcome.serial {
            self.stack.submit(input)?;
        }
        Ok(())
    }

    fn task_for(
        &self,
        block: &BlockContext,
        inputs: Vec<CallContext>,
    ) -> Result<DagTask, (ExecuteError, Vec<CallContext>)> {
        match self.prepared.lock().take() {
            Some(task) if task.matches(&inputs) => {
                debug!(contract = %self.contract(), "Using prepared DAG task");
                Ok(task)
            }
            Some(_) => {
                info!(
                    contract = %self.contract(),
                    "Prepared DAG task does not match batch, rebuilding"
                );
                DagTask::build(block, inputs)
            }
            None => DagTask::build(block, inputs),
        }
    }

    pub fn stop(&self) {
        self.pause.store(true, Ordering::Release);
        self.stack.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stack.is_stopped()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
        self.prepared.lock().take();
        self.stack.clear();
    }
}
