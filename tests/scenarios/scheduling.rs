//! Test: Scheduling - delayed steps and overlapping runs of one execution

use crate::helpers::*;
use crate::mock_ci::ScriptedClient;
use chrono::Duration as ChronoDuration;
use orchestrator::ci::TEST_TAG_VARIABLE;
use orchestrator::core::{ExecutionStatus, OrchestratorError};
use orchestrator::execution::WorkerPool;
use std::time::Duration;

/// A second run of an execution whose step is still running is refused
/// and leaves the first run alone
#[tokio::test]
async fn test_overlapping_run_is_rejected() {
    let (client, gate) = ScriptedClient::gated(vec![]);
    let h = harness_with(client, WorkerPool::new(4, 4));
    let execution = h.coordinator().create_execution(2).await.unwrap();

    let coordinator = h.coordinator().clone();
    let first = tokio::spawn(async move { coordinator.run(execution.id).await });

    // The step record is saved RUNNING before the trigger waits on the gate
    while h.records(execution.id).await.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = h.coordinator().run(execution.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState(_)));
    assert!(err.is_client_error());

    let records = h.records(execution.id).await;
    assert_eq!(statuses(&records), vec![(100, ExecutionStatus::Running)]);
    let stored = h.coordinator().details(execution.id).await.unwrap();
    assert_eq!(stored.execution.status, ExecutionStatus::Running);

    gate.add_permits(1);
    let finished = first.await.unwrap().unwrap();
    assert_eq!(finished.status, ExecutionStatus::Passed);
    assert_eq!(h.client.triggers().len(), 1);

    let records = h.records(execution.id).await;
    assert_eq!(statuses(&records), vec![(100, ExecutionStatus::Passed)]);
}

/// A delayed step is SCHEDULED until its resume time, then runs
#[tokio::test(start_paused = true)]
async fn test_delayed_step_waits_for_resume_time() {
    let h = harness(vec![]);
    let execution = h.coordinator().create_execution(4).await.unwrap();
    let mut subscription = h.hub().subscribe(execution.id);
    let started = tokio::time::Instant::now();
    let accepted = h.controller.dispatch(execution.clone()).await.unwrap();

    loop {
        let line = subscription.recv().await.expect("subscription closed early");
        if line.contains("Step 400 scheduled to start at") {
            break;
        }
    }

    let records = h.records(execution.id).await;
    assert_eq!(
        statuses(&records),
        vec![(100, ExecutionStatus::Passed), (400, ExecutionStatus::Scheduled)]
    );
    let previous_end = records[0].end_time.unwrap();
    assert_eq!(records[1].resume_time, Some(previous_end + ChronoDuration::minutes(1)));
    assert!(records[1].pipeline_id.is_none());
    assert_eq!(h.client.triggers().len(), 1);

    let finished = accepted.handle.wait().await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Passed);
    assert!(started.elapsed() >= Duration::from_secs(59));

    let records = h.records(execution.id).await;
    assert_eq!(
        statuses(&records),
        vec![(100, ExecutionStatus::Passed), (400, ExecutionStatus::Passed)]
    );
    assert!(records[1].resume_time.is_some());

    let triggers = h.client.triggers();
    assert_eq!(triggers.len(), 2);
    assert_eq!(triggers[1].variables[TEST_TAG_VARIABLE], "@later");
}
