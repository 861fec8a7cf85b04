//! # Transaction Executor Integration (qc-12)
//!
//! Drives `TransactionExecutor` the way a block scheduler does: DMC rounds
//! per contract with nested calls and key locks routed between them, DAG
//! batches with send-back, term handling and state digests.

mod common;

use common::*;
use qc_12_parallel_execution::{
    BlockHeader, CallContext, ExecuteError, MessageType, SuspensionStrategy,
    TransactionExecutionApi, TransactionExecutor,
};
use std::time::Duration;

const TERM: i64 = 1;

async fn executor(strategy: SuspensionStrategy, enable_dag: bool) -> TransactionExecutor {
    init_tracing();
    let executor = TransactionExecutor::with_term(env(config(strategy, enable_dag)), base_storage(), TERM);
    executor
        .next_block_header(TERM, BlockHeader::new(1, 1_000))
        .await
        .unwrap();
    executor
}

fn cross_contract_batch() -> Vec<CallContext> {
    vec![
        tx(
            1,
            "0xa",
            &[
                Step::Inc("x".into()),
                Step::Call(
                    "0xb".into(),
                    script(&[Step::Get("x".into()), Step::Inc("y".into())]),
                ),
                Step::Get("x".into()),
            ],
        ),
        tx(2, "0xb", &[Step::Inc("y".into())]),
    ]
}

// =============================================================================
// DMC
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_cross_contract_calls_route_to_completion() {
    for strategy in [SuspensionStrategy::Coroutine, SuspensionStrategy::WorkerPool] {
        let executor = executor(strategy, false).await;
        let mut scheduler = Scheduler::new(TERM);
        for input in cross_contract_batch() {
            scheduler.submit(input);
        }

        scheduler.drive(&executor).await.unwrap();

        assert_eq!(scheduler.results.len(), 2);
        let caller = &scheduler.results[&1];
        assert_eq!(caller.message_type, MessageType::Finished);
        assert_eq!(caller.data, b"1,1,1,1".to_vec());
        assert_eq!(caller.receive_address, "0xuser");

        // The callee held tx 2 back until it finished
        assert_eq!(scheduler.results[&2].data, b"2".to_vec());
        assert!(scheduler.key_lock_requests >= 1);
        assert!(scheduler.rounds > 2);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_strategies_produce_the_same_state() {
    let mut hashes = Vec::new();
    for strategy in [SuspensionStrategy::Coroutine, SuspensionStrategy::WorkerPool] {
        let executor = executor(strategy, false).await;
        let mut scheduler = Scheduler::new(TERM);
        for input in cross_contract_batch() {
            scheduler.submit(input);
        }
        scheduler.drive(&executor).await.unwrap();
        hashes.push(executor.get_hash(TERM, 1).await.unwrap());
    }

    assert_eq!(hashes[0], hashes[1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_chain_deeper_than_worker_threads_finishes() {
    init_tracing();
    let config = config(SuspensionStrategy::WorkerPool, false).with_threads(4, 2);
    let executor = TransactionExecutor::with_term(env(config), base_storage(), TERM);
    executor
        .next_block_header(TERM, BlockHeader::new(1, 1_000))
        .await
        .unwrap();

    // 0xa -> 0xb -> 0xc -> 0xd keeps three units suspended at once
    let innermost = script(&[Step::Inc("w".into())]);
    let third = script(&[Step::Call("0xd".into(), innermost), Step::Inc("z".into())]);
    let second = script(&[Step::Call("0xc".into(), third), Step::Inc("y".into())]);
    let mut scheduler = Scheduler::new(TERM);
    scheduler.submit(tx(1, "0xa", &[Step::Call("0xb".into(), second)]));

    tokio::time::timeout(Duration::from_secs(30), scheduler.drive(&executor))
        .await
        .expect("worker chain must not hang")
        .unwrap();

    let result = &scheduler.results[&1];
    assert_eq!(result.message_type, MessageType::Finished);
    assert_eq!(result.data, b"1,1,1".to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_callee_revert_reaches_caller() {
    let executor = executor(SuspensionStrategy::Coroutine, false).await;
    let mut scheduler = Scheduler::new(TERM);
    scheduler.submit(tx(
        1,
        "0xa",
        &[Step::Call("0xb".into(), script(&[Step::Revert]))],
    ));

    scheduler.drive(&executor).await.unwrap();

    let result = &scheduler.results[&1];
    assert_eq!(result.message_type, MessageType::Revert);
    assert_eq!(result.message, "callee reverted");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_static_call_reads_block_state() {
    let executor = executor(SuspensionStrategy::Coroutine, false).await;
    let mut scheduler = Scheduler::new(TERM);
    scheduler.submit(tx(1, "0xa", &[Step::Set("x".into(), "5".into())]));
    scheduler.drive(&executor).await.unwrap();

    let query = tx(9, "0xa", &[Step::Get("x".into())]).with_static_call(true);
    let output = executor.execute_transaction(TERM, query).await.unwrap();
    assert_eq!(output.message_type, MessageType::Finished);
    assert_eq!(output.data, b"5".to_vec());
}

// =============================================================================
// DAG
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_dag_batch_sends_back_calls_for_dmc() {
    let executor = executor(SuspensionStrategy::Coroutine, true).await;
    let mut inputs = cross_contract_batch();
    inputs.push(tx(3, "0xc", &[Step::Inc("z".into())]));

    let outputs = executor
        .dag_execute_transactions(TERM, inputs)
        .await
        .unwrap();

    let types: Vec<_> = outputs.iter().map(|o| o.message_type).collect();
    assert_eq!(
        types,
        vec![
            MessageType::SendBack,
            MessageType::Finished,
            MessageType::Finished
        ]
    );
    assert_eq!(outputs[2].data, b"1".to_vec());

    // Sent-back transactions finish through DMC
    let mut scheduler = Scheduler::new(TERM);
    scheduler.submit(outputs[0].clone().with_type(MessageType::Message));
    scheduler.drive(&executor).await.unwrap();
    assert_eq!(scheduler.results[&1].message_type, MessageType::Finished);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_speculative_dag_is_used_for_its_block() {
    let executor = executor(SuspensionStrategy::Coroutine, true).await;
    let header = BlockHeader::new(2, 2_000);
    let inputs = vec![
        tx(0, "0xc", &[Step::Inc("a".into())]),
        tx(1, "0xc", &[Step::Inc("a".into())]),
    ];

    executor
        .prepare_dag_flow(TERM, header, "0xc".into(), inputs.clone())
        .await
        .unwrap();
    assert_eq!(executor.dag_cache().len(), 1);

    executor.next_block_header(TERM, header).await.unwrap();
    let outputs = executor
        .dag_execute_transactions(TERM, inputs)
        .await
        .unwrap();

    assert!(executor.dag_cache().is_empty());
    let data: Vec<_> = outputs.iter().map(|o| o.data.clone()).collect();
    assert_eq!(data, vec![b"1".to_vec(), b"2".to_vec()]);
}

// =============================================================================
// TERMS AND BLOCKS
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_older_term_is_rejected_newer_term_drops_block() {
    let executor = executor(SuspensionStrategy::Coroutine, false).await;
    let input = tx(1, "0xa", &[]);

    assert_eq!(
        executor
            .dmc_execute_transactions(TERM - 1, "0xa".into(), vec![input.clone()])
            .await,
        Err(ExecuteError::SchedulerTermMismatch {
            requested: TERM - 1,
            current: TERM
        })
    );

    assert_eq!(
        executor
            .dmc_execute_transactions(TERM + 1, "0xa".into(), vec![input])
            .await,
        Err(ExecuteError::BlockContextUnavailable)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reopening_a_block_discards_its_writes() {
    let executor = executor(SuspensionStrategy::Coroutine, false).await;
    let fresh = executor.get_hash(TERM, 1).await.unwrap();

    let mut scheduler = Scheduler::new(TERM);
    scheduler.submit(tx(1, "0xa", &[Step::Inc("x".into())]));
    scheduler.drive(&executor).await.unwrap();
    assert_ne!(executor.get_hash(TERM, 1).await.unwrap(), fresh);

    executor
        .next_block_header(TERM, BlockHeader::new(1, 1_000))
        .await
        .unwrap();
    assert_eq!(executor.get_hash(TERM, 1).await.unwrap(), fresh);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stopped_executor_rejects_rounds() {
    let executor = executor(SuspensionStrategy::WorkerPool, false).await;
    executor.stop().await.unwrap();

    assert_eq!(
        executor
            .dmc_execute_transactions(TERM, "0xa".into(), vec![tx(1, "0xa", &[])])
            .await,
        Err(ExecuteError::Stopped)
    );
}
