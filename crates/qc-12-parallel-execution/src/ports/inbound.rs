//! Inbound Ports (Driving Ports / API)
//!
//! What the block scheduler calls on an executor.

use crate::domain::errors::ExecuteError;
use crate::domain::value_objects::{Address, BlockHeader};
use crate::domain::CallContext;
use async_trait::async_trait;

/// Primary Transaction Execution API
///
/// Every call carries the scheduler term it was issued under; requests
/// from an older term are rejected.
#[async_trait]
pub trait TransactionExecutionApi: Send + Sync {
    /// Open a new block; storage is layered over the previous block's.
    async fn next_block_header(&self, term: i64, header: BlockHeader)
        -> Result<(), ExecuteError>;

    /// Submit one DMC round for `contract` and run its flow.
    ///
    /// Returns every output produced by the round: terminal results as
    /// well as `Message`/`KeyLock` suspensions to be routed by the caller.
    async fn dmc_execute_transactions(
        &self,
        term: i64,
        contract: Address,
        inputs: Vec<CallContext>,
    ) -> Result<Vec<CallContext>, ExecuteError>;

    /// Execute a batch of top-level transactions through a conflict DAG.
    ///
    /// Outputs are in input order. Transactions not eligible for the DAG
    /// come back as `SendBack` and must be resubmitted through DMC.
    async fn dag_execute_transactions(
        &self,
        term: i64,
        inputs: Vec<CallContext>,
    ) -> Result<Vec<CallContext>, ExecuteError>;

    /// Speculatively build the conflict DAG for a batch of a future block.
    async fn prepare_dag_flow(
        &self,
        term: i64,
        header: BlockHeader,
        contract: Address,
        inputs: Vec<CallContext>,
    ) -> Result<(), ExecuteError>;

    /// Run one message and return its first output.
    ///
    /// Static calls run against a temporary flow that is never registered
    /// in the block.
    async fn execute_transaction(
        &self,
        term: i64,
        input: CallContext,
    ) -> Result<CallContext, ExecuteError>;

    /// Digest of the state written by block `number`.
    async fn get_hash(&self, term: i64, number: i64) -> Result<String, ExecuteError>;

    /// Move to a new scheduler term; the current block is dropped.
    async fn switch_term(&self, term: i64) -> Result<(), ExecuteError>;

    /// Stop the executor; every later request fails with `Stopped`.
    async fn stop(&self) -> Result<(), ExecuteError>;
}
