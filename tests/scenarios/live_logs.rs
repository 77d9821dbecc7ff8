//! Test: Live Logs - execution lines reach subscribers

use crate::helpers::*;
use crate::mock_ci::Script;
use orchestrator::core::{ExecutionStatus, OrchestratorError};

fn position(lines: &[String], needle: &str) -> usize {
    lines
        .iter()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("no line containing {:?} in {:#?}", needle, lines))
}

/// A subscriber sees the lifecycle of the execution in order
#[tokio::test]
async fn test_lifecycle_lines() {
    let h = harness(vec![]);

    let execution = h.coordinator().create_execution(2).await.unwrap();
    let mut subscription = h.hub().subscribe(execution.id);
    let accepted = h.controller.dispatch(execution.clone()).await.unwrap();
    let finished = accepted.handle.wait().await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Passed);

    let lines = drain(&mut subscription);
    assert_eq!(
        lines[0],
        format!("Connected to flow execution logs: {}", execution.id)
    );

    let started = position(&lines, "Flow execution started - flow 2");
    let triggered = position(&lines, "Triggering pipeline for step 100");
    let completed = position(&lines, "Flow execution completed successfully");
    let closed = position(&lines, "Flow execution logging context closed");
    assert!(started < triggered);
    assert!(triggered < completed);
    assert!(completed < closed);
    assert_eq!(closed, lines.len() - 1);
}

#[tokio::test]
async fn test_failure_line() {
    let h = harness(vec![Script::Fail]);

    let execution = h.coordinator().create_execution(3).await.unwrap();
    let mut subscription = h.hub().subscribe(execution.id);
    let accepted = h.controller.dispatch(execution).await.unwrap();
    accepted.handle.wait().await.unwrap();

    let lines = drain(&mut subscription);
    position(&lines, "Flow execution failed: step 200 failed");
    position(&lines, "Flow execution logging context closed");
}

/// Lines of one execution never reach subscribers of another
#[tokio::test]
async fn test_subscriptions_are_isolated() {
    let h = harness(vec![]);

    let first = h.coordinator().create_execution(2).await.unwrap();
    let other = h.coordinator().create_execution(3).await.unwrap();
    let mut watching_other = h.hub().subscribe(other.id);

    let accepted = h.controller.dispatch(first).await.unwrap();
    accepted.handle.wait().await.unwrap();

    let lines = drain(&mut watching_other);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("Connected to flow execution logs"));
}

#[tokio::test]
async fn test_dropped_subscription_is_removed() {
    let h = harness(vec![]);

    let execution = h.coordinator().create_execution(2).await.unwrap();
    let subscription = h.hub().subscribe(execution.id);
    assert_eq!(h.hub().subscriber_count(execution.id), 1);

    drop(subscription);
    assert_eq!(h.hub().subscriber_count(execution.id), 0);
    assert_eq!(h.hub().active_executions(), 0);

    // Running without listeners is fine
    let accepted = h.controller.dispatch(execution).await.unwrap();
    assert_eq!(
        accepted.handle.wait().await.unwrap().status,
        ExecutionStatus::Passed
    );
}

/// A replay subscribed to between creation and dispatch sees its whole
/// lifecycle
#[tokio::test]
async fn test_replay_lines_from_start() {
    let h = harness(vec![Script::Fail]);
    let original = h.run_flow(3).await;
    assert_eq!(original.status, ExecutionStatus::Failed);

    let replay = h.controller.create_replay(original.id, 200).await.unwrap();
    let mut subscription = h.hub().subscribe(replay.id);
    let accepted = h.controller.dispatch_replay(replay.clone(), 200).await.unwrap();
    assert_eq!(accepted.execution.id, replay.id);
    let finished = accepted.handle.wait().await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Passed);

    let lines = drain(&mut subscription);
    let started = position(&lines, "Flow execution started - flow 3");
    assert!(lines[started].ends_with("(replay)"));
    let completed = position(&lines, "Flow execution completed successfully");
    assert!(started < completed);
    assert_eq!(
        position(&lines, "Flow execution logging context closed"),
        lines.len() - 1
    );
}

/// Only replays can be dispatched as replays
#[tokio::test]
async fn test_dispatch_replay_of_plain_execution_is_rejected() {
    let h = harness(vec![]);

    let execution = h.coordinator().create_execution(3).await.unwrap();
    let err = h.controller.dispatch_replay(execution, 200).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidArgument(_)));
}
