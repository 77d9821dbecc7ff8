//! Test: Variable Propagation - step outputs feed later steps

use crate::helpers::*;
use crate::mock_ci::Script;
use orchestrator::core::ExecutionStatus;

/// Output of step 1 is merged into the configured data of step 2
#[tokio::test]
async fn test_output_reaches_next_step() {
    let h = harness(vec![Script::Pass("token=abc\n")]);

    let execution = h.run_flow(1).await;
    assert_eq!(execution.status, ExecutionStatus::Passed);

    let triggers = h.client.triggers();
    let second = &triggers[1].variables;
    assert_eq!(second["token"], "abc");
    assert_eq!(second["user"], "bob");
    assert_eq!(second["env"], "qa");

    let records = h.records(execution.id).await;
    assert_eq!(records[0].runtime_test_data["token"], "abc");
    assert!(!records[1].configured_test_data.contains_key("TEST_TAG"));
}

/// Runtime values override configured test data of the same name
#[tokio::test]
async fn test_runtime_overrides_configured() {
    let h = harness(vec![Script::Pass("user=alice\nsession=s1")]);

    let execution = h.run_flow(1).await;

    let triggers = h.client.triggers();
    assert_eq!(triggers[1].variables["user"], "alice");
    assert_eq!(triggers[2].variables["session"], "s1");
    assert_eq!(execution.runtime_variables["user"], "alice");
}

/// Outputs accumulate across steps without dropping earlier keys
#[tokio::test]
async fn test_outputs_accumulate() {
    let h = harness(vec![
        Script::Pass("token=abc"),
        Script::Pass("order=42\ntoken=def"),
    ]);

    let execution = h.run_flow(1).await;

    let third = &h.client.triggers()[2].variables;
    assert_eq!(third["order"], "42");
    assert_eq!(third["token"], "def");
    assert_eq!(third["env"], "qa");

    assert_eq!(execution.runtime_variables["order"], "42");
    assert_eq!(execution.runtime_variables["token"], "def");
}

/// A step without an output job still passes with its configured data
#[tokio::test]
async fn test_missing_artifact_falls_back_to_configured() {
    let h = harness(vec![Script::PassWithoutJobs]);

    let execution = h.run_flow(2).await;
    assert_eq!(execution.status, ExecutionStatus::Passed);

    let records = h.records(execution.id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Passed);
    assert_eq!(records[0].runtime_test_data, records[0].configured_test_data);
    assert_eq!(records[0].runtime_test_data["env"], "qa");
}
