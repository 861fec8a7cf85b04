//! # DAG Properties (qc-12)
//!
//! Property tests over random batches:
//!
//! - the conflict graph orders every pair sharing a field, and only such
//!   pairs get direct edges
//! - Kahn's schedule is complete and respects every edge
//! - DAG execution matches serial stack execution, result for result

mod common;

use common::*;
use proptest::prelude::*;
use qc_12_parallel_execution::algorithms::{build_conflict_graph, kahns_topological_sort};
use qc_12_parallel_execution::domain::invariants::{
    invariant_completeness, invariant_parallel_safety, invariant_shared_field_edges,
    invariant_topological_order,
};
use qc_12_parallel_execution::flow::DagTask;
use qc_12_parallel_execution::{Bytes, CallContext, MessageType, SuspensionStrategy};
use std::sync::atomic::AtomicBool;

// =============================================================================
// STRATEGIES
// =============================================================================

fn field_sets() -> impl Strategy<Value = Vec<Vec<Bytes>>> {
    prop::collection::vec(
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d", "e", "f"]), 1..4)
            .prop_map(|keys| keys.into_iter().map(|k| k.as_bytes().to_vec()).collect()),
        0..24,
    )
}

fn step() -> impl Strategy<Value = Step> {
    let key = prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(str::to_string);
    prop_oneof![
        4 => key.clone().prop_map(Step::Inc),
        2 => key.clone().prop_map(Step::Get),
        2 => (key, 0u8..10).prop_map(|(k, v)| Step::Set(k, v.to_string())),
        1 => Just(Step::Revert),
    ]
}

fn batch() -> impl Strategy<Value = Vec<Vec<Step>>> {
    prop::collection::vec(prop::collection::vec(step(), 0..4), 1..10)
}

fn inputs(scripts: &[Vec<Step>]) -> Vec<CallContext> {
    scripts
        .iter()
        .enumerate()
        .map(|(i, steps)| tx(i as i64, "0xc", steps))
        .collect()
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_edges_follow_shared_fields(fields in field_sets()) {
        let graph = build_conflict_graph(&fields, usize::MAX).unwrap();

        prop_assert!(invariant_shared_field_edges(&fields, &graph));
    }

    #[test]
    fn prop_schedule_respects_edges(fields in field_sets()) {
        let graph = build_conflict_graph(&fields, usize::MAX).unwrap();
        let schedule = kahns_topological_sort(&graph).unwrap();

        prop_assert!(invariant_completeness(&schedule, &graph));
        prop_assert!(invariant_topological_order(&schedule, &graph));
        for group in &schedule.parallel_groups {
            prop_assert!(invariant_parallel_safety(group, &graph));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_dag_matches_serial_execution(scripts in batch()) {
        let serial_block = block(config(SuspensionStrategy::Coroutine, false));
        let serial_flow = serial_block.get_flow_controller("0xc");
        serial_flow.submit_batch(inputs(&scripts)).unwrap();
        let mut serial = Vec::new();
        serial_flow.run(&mut |output| serial.push(summary(&output))).unwrap();
        serial.sort();

        let dag_block = block(config(SuspensionStrategy::Coroutine, true));
        let task = DagTask::prepare(&dag_block, inputs(&scripts)).unwrap();
        prop_assert!(task.eligible().len() == scripts.len());

        let factory = dag_block.factory().clone();
        let pause = AtomicBool::new(false);
        let outcome = task
            .execute(&factory, factory.env().pools().flow(), &pause)
            .unwrap();
        prop_assert!(outcome.serial.is_empty());
        let mut parallel: Vec<_> = outcome.outputs.iter().map(|(_, o)| summary(o)).collect();
        parallel.sort();

        prop_assert_eq!(parallel, serial);
        prop_assert_eq!(
            written_rows(dag_block.storage().as_ref()),
            written_rows(serial_block.storage().as_ref())
        );
    }
}

// =============================================================================
// HOT KEYS
// =============================================================================

#[test]
fn test_hot_key_batch_chains_in_submission_order() {
    init_tracing();
    let block = block(config(SuspensionStrategy::Coroutine, true));
    let inputs: Vec<CallContext> = (0..450)
        .map(|id| tx(id, "0xc", &[Step::Inc("hot".into())]))
        .collect();

    let task = DagTask::prepare(&block, inputs.clone()).unwrap();
    assert_eq!(task.graph().edge_count(), 449);

    let flow = block.get_flow_controller("0xc");
    flow.submit_batch(inputs).unwrap();
    let mut outputs = Vec::new();
    flow.run(&mut |output| outputs.push(output)).unwrap();

    assert_eq!(outputs.len(), 450);
    for output in &outputs {
        assert_eq!(output.message_type, MessageType::Finished);
        assert_eq!(output.data, (output.context_id + 1).to_string().into_bytes());
    }
    assert_eq!(
        written_rows(block.storage().as_ref()),
        vec![("hot".to_string(), "450".to_string())]
    );
}
