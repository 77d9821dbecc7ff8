use anyhow::{Context, Result};
use orchestrator::ci::{
    CiClientConfig, CredentialProvider, EnvCredentialProvider, GitLabClient, MockPipelineClient,
    PipelineClient, StaticCredentialProvider,
};
use orchestrator::cli::commands::{BatchCommand, HistoryCommand, ReplayCommand, RunCommand};
use orchestrator::cli::output::*;
use orchestrator::cli::{Cli, Command};
use orchestrator::core::config::{OrchestratorConfig, Settings, DEFAULT_CONFIG_FILE};
use orchestrator::core::{ExecutionDetails, ExecutionStatus, FlowExecution};
use orchestrator::execution::admission::{parse_flow_ids, ExecutionHandle};
use orchestrator::execution::{AdmissionController, FlowExecutionCoordinator, WorkerPool};
use orchestrator::logs::{LogBroadcastHub, LogSubscription};
use orchestrator::persistence::{
    DefinitionStore, ExecutionRepository, InMemoryDefinitions, InMemoryRepository,
};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

/// Polls before the mock client reports a pipeline finished
const MOCK_POLLS_TO_COMPLETE: u32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    if let Command::Validate(cmd) = &cli.command {
        validate_config(&cli, &config_path, cmd.json)?;
        return Ok(());
    }

    let mut config = OrchestratorConfig::from_file(&config_path)
        .context("Failed to load orchestrator config")?;
    cli.apply_overrides(&mut config.settings);
    config.validate()?;

    let succeeded = if config.settings.mock_mode {
        println!("{} Using mock CI client", INFO);
        let client = Arc::new(MockPipelineClient::new(MOCK_POLLS_TO_COMPLETE));
        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(StaticCredentialProvider::new("mock-token"));
        dispatch(&cli, &config, client, credentials).await?
    } else {
        let client = Arc::new(GitLabClient::new(CiClientConfig::from_settings(&config.settings))?);
        let credentials: Arc<dyn CredentialProvider> = Arc::new(EnvCredentialProvider);
        dispatch(&cli, &config, client, credentials).await?
    };

    if !succeeded {
        std::process::exit(1);
    }

    Ok(())
}

async fn dispatch<C: PipelineClient + 'static>(
    cli: &Cli,
    config: &OrchestratorConfig,
    client: Arc<C>,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<bool> {
    let no_history = match &cli.command {
        Command::Run(cmd) => cmd.no_history,
        Command::Batch(cmd) => cmd.no_history,
        _ => false,
    };

    let repository = open_repository(&config.settings, no_history).await?;
    let definitions: Arc<dyn DefinitionStore> = Arc::new(InMemoryDefinitions::from_config(config));
    let coordinator = FlowExecutionCoordinator::new(
        client,
        definitions,
        repository,
        credentials,
        LogBroadcastHub::new(),
        &config.settings,
    );
    let pool = WorkerPool::new(config.settings.max_workers, config.settings.queue_capacity);
    let controller = AdmissionController::new(coordinator, pool);

    match &cli.command {
        Command::Run(cmd) => run_flow(&controller, cmd).await,
        Command::Batch(cmd) => run_batch(&controller, cmd).await,
        Command::Replay(cmd) => replay_execution(&controller, cmd).await,
        Command::History(cmd) => show_history(controller.coordinator(), cmd).await,
        Command::Validate(_) => Ok(true),
    }
}

async fn open_repository(settings: &Settings, no_history: bool) -> Result<Arc<dyn ExecutionRepository>> {
    if no_history {
        return Ok(Arc::new(InMemoryRepository::new()));
    }
    open_history(settings).await
}

#[cfg(feature = "sqlite")]
async fn open_history(settings: &Settings) -> Result<Arc<dyn ExecutionRepository>> {
    use orchestrator::persistence::SqliteExecutionStore;

    let store = match &settings.database {
        Some(path) => SqliteExecutionStore::new(path).await?,
        None => SqliteExecutionStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_settings: &Settings) -> Result<Arc<dyn ExecutionRepository>> {
    tracing::warn!("Built without sqlite support, execution history is not persisted");
    Ok(Arc::new(InMemoryRepository::new()))
}

fn validate_config(cli: &Cli, path: &str, json: bool) -> Result<()> {
    println!("{} Validating {}...", INFO, style(path).bold());

    let result = OrchestratorConfig::from_file(path).and_then(|mut config| {
        cli.apply_overrides(&mut config.settings);
        config.validate()?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("{} Configuration is valid!", CHECK);
            println!("  Applications: {}", style(config.applications.len()).cyan());
            println!("  Test data sets: {}", style(config.test_data.len()).cyan());
            println!("  Flow steps: {}", style(config.flow_steps.len()).cyan());
            println!("  Flows: {}", style(config.flows.len()).cyan());
            for flow in &config.flows {
                println!(
                    "    {} {} ({} steps)",
                    style(flow.id).bold(),
                    flow.display_name(),
                    flow.steps.len()
                );
            }

            if json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn run_flow<C: PipelineClient + 'static>(
    controller: &AdmissionController<C>,
    cmd: &RunCommand,
) -> Result<bool> {
    let coordinator = controller.coordinator();
    let execution = coordinator.create_execution(cmd.flow).await?;

    println!(
        "{} Starting flow {} (execution {})",
        ROCKET,
        style(cmd.flow).bold(),
        style(&execution.id.to_string()[..8]).dim()
    );

    // Subscribe before dispatch so no lifecycle line is missed
    let subscription = coordinator.hub().subscribe(execution.id);
    let accepted = controller.dispatch(execution).await?;
    let execution = follow(subscription, accepted.handle).await?;

    let details = coordinator.details(execution.id).await?;
    print_details(&details);

    if !cmd.no_history {
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(execution.id).dim()
        );
    }

    Ok(report_outcome(&execution))
}

async fn run_batch<C: PipelineClient + 'static>(
    controller: &AdmissionController<C>,
    cmd: &BatchCommand,
) -> Result<bool> {
    let flow_ids = parse_flow_ids(&cmd.trigger)?;
    let outcome = controller.submit_batch(&flow_ids).await?;

    println!(
        "{} Batch: {} requested, {} accepted, {} rejected",
        INFO,
        style(outcome.total_requested).bold(),
        style(outcome.accepted.len()).green(),
        style(outcome.rejected.len()).red()
    );
    println!("{} Pool: {}", INFO, format_pool_status(&outcome.pool));

    for accepted in &outcome.accepted {
        println!("  {}", format_execution(&accepted.execution));
    }
    for rejection in &outcome.rejected {
        println!("  {}", format_rejection(rejection));
    }
    if outcome.capacity_exceeded() {
        println!(
            "{} {}",
            WARN,
            style("Some flows were rejected because the worker pool is at capacity").yellow()
        );
    }

    let mut succeeded = outcome.all_accepted();
    if outcome.accepted.is_empty() {
        return Ok(false);
    }

    let spinner = create_spinner();
    spinner.set_message(format!("Waiting for {} executions", outcome.accepted.len()));

    for accepted in outcome.accepted {
        match accepted.handle.wait().await {
            Ok(execution) => {
                succeeded &= execution.status == ExecutionStatus::Passed;
                spinner.println(format_execution(&execution));
            }
            Err(e) => {
                succeeded = false;
                spinner.println(format!("{} {}", CROSS, style(e).red()));
            }
        }
    }
    spinner.finish_and_clear();

    Ok(succeeded)
}

async fn replay_execution<C: PipelineClient + 'static>(
    controller: &AdmissionController<C>,
    cmd: &ReplayCommand,
) -> Result<bool> {
    let original_id = parse_execution_id(&cmd.execution)?;
    let replay = controller.create_replay(original_id, cmd.step).await?;
    let subscription = controller.coordinator().hub().subscribe(replay.id);
    let accepted = controller.dispatch_replay(replay, cmd.step).await?;

    println!(
        "{} Replaying execution {} from step {} (replay {})",
        ROCKET,
        style(&original_id.to_string()[..8]).dim(),
        style(cmd.step).bold(),
        style(&accepted.execution.id.to_string()[..8]).dim()
    );

    let execution = follow(subscription, accepted.handle).await?;

    let details = controller.coordinator().details(execution.id).await?;
    print_details(&details);

    Ok(report_outcome(&execution))
}

async fn show_history<C: PipelineClient + 'static>(
    coordinator: &FlowExecutionCoordinator<C>,
    cmd: &HistoryCommand,
) -> Result<bool> {
    if let Some(id) = &cmd.execution {
        let details = coordinator.details(parse_execution_id(id)?).await?;
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&details)?);
        } else {
            print_details(&details);
        }
        return Ok(true);
    }

    let mut executions = match (cmd.flow, cmd.status) {
        (Some(flow_id), status) => {
            let mut executions = coordinator.executions_for_flow(flow_id).await?;
            if let Some(status) = status {
                executions.retain(|e| e.status == status);
            }
            executions
        }
        (None, Some(status)) => coordinator.executions_with_status(status).await?,
        (None, None) => coordinator.recent(cmd.limit).await?,
    };
    if cmd.flow.is_some() || cmd.status.is_some() {
        // Filtered queries come back oldest first
        executions.reverse();
        executions.truncate(cmd.limit);
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(true);
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
    for execution in &executions {
        println!("  {}", format_execution(execution));
    }

    Ok(true)
}

/// Show the latest log line on a spinner until the execution finishes
async fn follow(mut subscription: LogSubscription, handle: ExecutionHandle) -> Result<FlowExecution> {
    let spinner = create_spinner();
    let follower = {
        let spinner = spinner.clone();
        tokio::spawn(async move {
            while let Some(line) = subscription.recv().await {
                spinner.set_message(line);
            }
        })
    };

    let result = handle.wait().await;
    follower.abort();
    spinner.finish_and_clear();

    Ok(result?)
}

fn report_outcome(execution: &FlowExecution) -> bool {
    let duration = execution
        .end_time
        .and_then(|end| end.signed_duration_since(execution.start_time).to_std().ok())
        .map(format_duration)
        .unwrap_or_default();

    if execution.status == ExecutionStatus::Passed {
        println!(
            "\n{} Flow {} completed {} {}",
            CHECK,
            style(execution.flow_id).bold(),
            style("successfully").green(),
            style(duration).dim()
        );
        true
    } else {
        println!(
            "\n{} Flow {} {}",
            CROSS,
            style(execution.flow_id).bold(),
            format_status(execution.status)
        );
        error!(execution_id = %execution.id, "Flow execution did not pass");
        false
    }
}

fn print_details(details: &ExecutionDetails) {
    let execution = &details.execution;
    println!("\n{} Execution Details", INFO);
    println!("  ID: {}", style(execution.id).cyan());
    println!("  Flow: {}", style(execution.flow_id).bold());
    println!("  Status: {}", format_status(execution.status));
    println!("  Started: {}", style(execution.start_time.to_rfc3339()).dim());
    if let Some(end) = execution.end_time {
        println!("  Finished: {}", style(end.to_rfc3339()).dim());
    }
    if let Some(original) = execution.original_execution_id {
        println!("  Replay of: {}", style(original).dim());
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", details.progress() * 100.0)).cyan(),
        details.finished_steps(),
        details.steps.len()
    );

    for step in &details.steps {
        println!("    {}", format_step_progress(step));
    }

    if !execution.runtime_variables.is_empty() {
        println!("  Runtime variables:");
        let mut keys: Vec<_> = execution.runtime_variables.keys().collect();
        keys.sort();
        for key in keys {
            println!(
                "    {} = {}",
                style(key).cyan(),
                style(&execution.runtime_variables[key]).dim()
            );
        }
    }
}

fn parse_execution_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid execution ID: {}", id))
}
