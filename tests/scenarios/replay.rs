//! Test: Replay - resume a failed execution from a step

use crate::helpers::*;
use crate::mock_ci::Script;
use orchestrator::core::{ExecutionStatus, FlowExecution, OrchestratorError};

/// Run flow 1 with step 200 failing
async fn failed_run(h: &Harness) -> FlowExecution {
    let execution = h.run_flow(1).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    execution
}

/// Passed steps before the replayed one are carried; the rest run again
#[tokio::test]
async fn test_replay_resumes_from_failed_step() {
    let h = harness(vec![Script::Pass("token=abc"), Script::Fail]);
    let original = failed_run(&h).await;

    let accepted = h.controller.submit_replay(original.id, 200).await.unwrap();
    assert!(accepted.execution.is_replay);
    assert_eq!(accepted.execution.original_execution_id, Some(original.id));
    assert_eq!(accepted.execution.runtime_variables["token"], "abc");

    let replay = accepted.handle.wait().await.unwrap();
    assert_eq!(replay.status, ExecutionStatus::Passed);
    assert_ne!(replay.id, original.id);

    let records = h.records(replay.id).await;
    assert_eq!(
        statuses(&records),
        vec![
            (100, ExecutionStatus::Passed),
            (200, ExecutionStatus::Passed),
            (300, ExecutionStatus::Passed),
        ]
    );

    let originals = h.records(original.id).await;
    let carried = &records[0];
    assert!(carried.carried);
    assert!(carried.is_replay);
    assert_eq!(carried.pipeline_id, originals[0].pipeline_id);
    assert_eq!(carried.runtime_test_data, originals[0].runtime_test_data);
    assert_ne!(carried.id, originals[0].id);
    assert!(!records[1].carried);

    // Step 100 is not re-run; 200 sees the carried output
    let triggers = h.client.triggers();
    assert_eq!(triggers.len(), 4);
    assert_eq!(triggers[2].project, "qa/payments");
    assert_eq!(triggers[2].variables["token"], "abc");

    // The original is untouched
    let reloaded = h.coordinator().details(original.id).await.unwrap();
    assert_eq!(reloaded.execution.status, ExecutionStatus::Failed);
    assert_eq!(h.records(original.id).await.len(), 2);
}

/// Replaying from the first step carries nothing
#[tokio::test]
async fn test_replay_from_first_step() {
    let h = harness(vec![Script::Pass("token=abc"), Script::Fail]);
    let original = failed_run(&h).await;

    let accepted = h.controller.submit_replay(original.id, 100).await.unwrap();
    assert!(accepted.execution.runtime_variables.is_empty());

    let replay = accepted.handle.wait().await.unwrap();
    assert_eq!(replay.status, ExecutionStatus::Passed);

    let records = h.records(replay.id).await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| !r.carried));
}

#[tokio::test]
async fn test_replay_of_passed_execution_is_rejected() {
    let h = harness(vec![]);
    let passed = h.run_flow(1).await;

    let err = h.controller.submit_replay(passed.id, 200).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState(_)));
}

#[tokio::test]
async fn test_replay_step_outside_flow_is_rejected() {
    let h = harness(vec![Script::Fail]);
    let original = failed_run(&h).await;

    let err = h.controller.submit_replay(original.id, 999).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidArgument(_)));

    // Nothing was written for the rejected replay
    assert_eq!(h.coordinator().recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replay_of_unknown_execution_is_not_found() {
    let h = harness(vec![]);

    let err = h
        .controller
        .submit_replay(uuid::Uuid::new_v4(), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}
