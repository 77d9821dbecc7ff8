//! Scenario-based tests for the orchestrator

mod helpers;
mod mock_ci;

mod failure_handling;
mod live_logs;
mod replay;
mod scheduling;
mod variable_propagation;
