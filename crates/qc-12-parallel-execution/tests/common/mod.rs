//! Shared fixtures for the execution integration tests
//!
//! - `ScriptVm`: a contract VM interpreting its payload as a small script
//! - `ScriptConflicts`: declares exactly the keys a script touches
//! - `Scheduler`: routes DMC messages between contracts until every
//!   transaction has a final result

#![allow(dead_code)]

use async_trait::async_trait;
use qc_12_parallel_execution::adapters::InMemoryStorage;
use qc_12_parallel_execution::{
    Address, BlockContext, BlockHeader, Bytes, CallContext, CallKey, ConflictFieldProvider,
    ContextId, ContractVm, Entry, ExecuteError, ExecutionEnv, ExecutorConfig, HostContext,
    MessageType, Seq, StateStorage, SuspensionStrategy, TransactionExecutionApi,
    TransactionStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const TABLE: &str = "t_kv";

// =============================================================================
// TRACING
// =============================================================================

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// SCRIPT VM
// =============================================================================

/// One step of a contract script.
///
/// Scripts are `;`-separated steps:
///
/// - `get:<key>`: read `key`, append its value
/// - `set:<key>=<value>`: write `key`
/// - `inc:<key>`: increment the decimal counter at `key`, append the new value
/// - `call:<address>:<hex script>`: call `address`, append its data
/// - `create:<table>`: create `table`, failing if it exists
/// - `revert`: revert the call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Get(String),
    Set(String, String),
    Inc(String),
    Call(Address, String),
    Create(String),
    Revert,
}

impl Step {
    pub fn render(&self) -> String {
        match self {
            Step::Get(key) => format!("get:{key}"),
            Step::Set(key, value) => format!("set:{key}={value}"),
            Step::Inc(key) => format!("inc:{key}"),
            Step::Call(to, script) => format!("call:{to}:{}", hex::encode(script)),
            Step::Create(table) => format!("create:{table}"),
            Step::Revert => "revert".to_string(),
        }
    }

    fn parse(raw: &str) -> Option<Step> {
        if raw == "revert" {
            return Some(Step::Revert);
        }
        let (op, arg) = raw.split_once(':')?;
        match op {
            "get" => Some(Step::Get(arg.to_string())),
            "inc" => Some(Step::Inc(arg.to_string())),
            "create" => Some(Step::Create(arg.to_string())),
            "set" => {
                let (key, value) = arg.split_once('=')?;
                Some(Step::Set(key.to_string(), value.to_string()))
            }
            "call" => {
                let (to, script) = arg.split_once(':')?;
                let script = String::from_utf8(hex::decode(script).ok()?).ok()?;
                Some(Step::Call(to.to_string(), script))
            }
            _ => None,
        }
    }
}

pub fn script(steps: &[Step]) -> String {
    steps.iter().map(Step::render).collect::<Vec<_>>().join(";")
}

pub fn parse_script(data: &[u8]) -> Option<Vec<Step>> {
    let text = std::str::from_utf8(data).ok()?;
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split(';').map(Step::parse).collect()
}

pub struct ScriptVm;

#[async_trait]
impl ContractVm for ScriptVm {
    async fn execute(
        &self,
        host: &mut HostContext,
        input: CallContext,
    ) -> Result<CallContext, ExecuteError> {
        let Some(steps) = parse_script(&input.data) else {
            return Ok(input.revert(TransactionStatus::RevertInstruction, "bad script"));
        };

        let mut results: Vec<String> = Vec::new();
        for step in steps {
            match step {
                Step::Get(key) => {
                    let value = host.get_row(TABLE, &key).await?;
                    results.push(
                        value
                            .and_then(|entry| entry.as_str().map(str::to_string))
                            .unwrap_or_default(),
                    );
                }
                Step::Set(key, value) => {
                    host.set_row(TABLE, &key, Entry::new(value)).await?;
                }
                Step::Inc(key) => {
                    let current: u64 = host
                        .get_row(TABLE, &key)
                        .await?
                        .and_then(|entry| entry.as_str().and_then(|s| s.parse().ok()))
                        .unwrap_or(0);
                    let next = (current + 1).to_string();
                    host.set_row(TABLE, &key, Entry::new(next.clone())).await?;
                    results.push(next);
                }
                Step::Call(to, script) => {
                    let request =
                        CallContext::message(0, 0, host.contract(), to, script.into_bytes());
                    let response = host.external_call(request).await?;
                    if response.message_type == MessageType::Revert {
                        return Ok(input.revert(TransactionStatus::RevertInstruction, "callee reverted"));
                    }
                    results.push(String::from_utf8_lossy(&response.data).into_owned());
                }
                Step::Create(table) => {
                    host.create_table(&table, "value")?;
                }
                Step::Revert => {
                    return Ok(input.revert(TransactionStatus::RevertInstruction, "revert"));
                }
            }
        }

        let mut out = input.response(MessageType::Finished);
        out.data = results.join(",").into_bytes();
        Ok(out)
    }
}

/// Declares the keys a script touches; scripts with calls are unknown.
pub struct ScriptConflicts;

impl ConflictFieldProvider for ScriptConflicts {
    fn conflict_fields(
        &self,
        _storage: &dyn StateStorage,
        _header: &BlockHeader,
        input: &CallContext,
    ) -> Option<Vec<Bytes>> {
        let steps = parse_script(&input.data)?;
        let mut fields = Vec::new();
        for step in steps {
            match step {
                Step::Get(key) | Step::Set(key, _) | Step::Inc(key) | Step::Create(key) => {
                    fields.push(key.into_bytes())
                }
                Step::Call(..) => return None,
                Step::Revert => {}
            }
        }
        // Scripts touching nothing still need a vertex
        if fields.is_empty() {
            fields.push(input.receive_address.clone().into_bytes());
        }
        Some(fields)
    }
}

// =============================================================================
// BLOCK FIXTURES
// =============================================================================

pub fn config(strategy: SuspensionStrategy, enable_dag: bool) -> ExecutorConfig {
    ExecutorConfig::default()
        .with_threads(4, 4)
        .with_suspension(strategy)
        .with_dag(enable_dag)
}

pub fn env(config: ExecutorConfig) -> Arc<ExecutionEnv> {
    let env = ExecutionEnv::new(config, Arc::new(ScriptVm))
        .expect("executor pools")
        .with_conflict_fields(Arc::new(ScriptConflicts));
    Arc::new(env)
}

pub fn base_storage() -> Arc<dyn StateStorage> {
    Arc::new(InMemoryStorage::new().with_table(TABLE, "value"))
}

pub fn block(config: ExecutorConfig) -> Arc<BlockContext> {
    BlockContext::new(
        BlockHeader::new(1, 1_000),
        Arc::new(InMemoryStorage::layered(base_storage())),
        None,
        env(config),
    )
}

pub fn tx(context_id: ContextId, to: &str, steps: &[Step]) -> CallContext {
    CallContext::message(context_id, 0, "0xuser", to, script(steps).into_bytes())
}

/// Final state of the block's own storage layer, as (key, value) pairs.
pub fn written_rows(storage: &dyn StateStorage) -> Vec<(String, String)> {
    storage
        .dirty_rows()
        .into_iter()
        .map(|(_, key, entry)| (key, entry.as_str().unwrap_or_default().to_string()))
        .collect()
}

/// Comparable summary of a terminal output.
pub fn summary(output: &CallContext) -> (ContextId, MessageType, i32, String) {
    (
        output.context_id,
        output.message_type,
        output.status,
        String::from_utf8_lossy(&output.data).into_owned(),
    )
}

// =============================================================================
// SCHEDULER DOUBLE
// =============================================================================

/// A pending nested call: the callee's key and where its result goes.
struct Frame {
    callee: CallKey,
    caller: CallKey,
    caller_contract: Address,
}

/// Routes DMC outputs between contracts the way a block scheduler does.
///
/// Nested calls get the next seq of their context; terminal results of
/// nested calls are re-keyed to their caller and sent back; key-lock
/// requests are granted. Contracts are processed in address order.
pub struct Scheduler {
    term: i64,
    seqs: HashMap<ContextId, Seq>,
    frames: HashMap<ContextId, Vec<Frame>>,
    pending: BTreeMap<Address, Vec<CallContext>>,
    pub results: BTreeMap<ContextId, CallContext>,
    pub rounds: usize,
    pub key_lock_requests: usize,
}

impl Scheduler {
    pub fn new(term: i64) -> Self {
        Self {
            term,
            seqs: HashMap::new(),
            frames: HashMap::new(),
            pending: BTreeMap::new(),
            results: BTreeMap::new(),
            rounds: 0,
            key_lock_requests: 0,
        }
    }

    pub fn submit(&mut self, input: CallContext) {
        self.pending
            .entry(input.receive_address.clone())
            .or_default()
            .push(input);
    }

    pub async fn drive<E: TransactionExecutionApi>(
        &mut self,
        executor: &E,
    ) -> Result<(), ExecuteError> {
        while let Some(contract) = self.pending.keys().next().cloned() {
            let inputs = self.pending.remove(&contract).unwrap_or_default();
            let outputs = executor
                .dmc_execute_transactions(self.term, contract, inputs)
                .await?;
            self.rounds += 1;
            for output in outputs {
                self.route(output);
            }
            assert!(self.rounds < 10_000, "scheduler did not converge");
        }
        Ok(())
    }

    fn route(&mut self, output: CallContext) {
        let context_id = output.context_id;
        match output.message_type {
            MessageType::Message => {
                let seq = self.seqs.entry(context_id).or_insert(0);
                *seq += 1;
                let callee = CallKey::new(context_id, *seq);

                self.frames.entry(context_id).or_default().push(Frame {
                    callee,
                    caller: output.key(),
                    caller_contract: output.sender_address.clone(),
                });

                let mut call = output;
                call.set_key(callee);
                self.submit(call);
            }
            MessageType::KeyLock => {
                self.key_lock_requests += 1;
                // Requests name their own contract on both ends
                self.submit(output.response(MessageType::Finished));
            }
            MessageType::Finished | MessageType::Revert => {
                let frames = self.frames.entry(context_id).or_default();
                match frames.last() {
                    Some(frame) if frame.callee == output.key() => {
                        let frame = frames.pop().expect("frame");
                        let mut response = output;
                        response.set_key(frame.caller);
                        response.receive_address = frame.caller_contract;
                        self.submit(response);
                    }
                    _ => {
                        self.results.insert(context_id, output);
                    }
                }
            }
            other => panic!("unexpected output type {other:?}"),
        }
    }
}
