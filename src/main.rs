use anyhow::{Context, Result};
use stagerun::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use stagerun::cli::output::*;
use stagerun::cli::{exit_code, Cli, Command, EXIT_DEFINITION_ERROR, EXIT_FAILED, EXIT_SUCCESS};
use stagerun::core::{condition::Condition, config::WorkflowConfig};
use stagerun::execution::{ExecutionEngine, ExecutionEvent};
use stagerun::persistence::{
    create_summary, ExecutionStatus, ExecutionSummary, PersistenceBackend, SqliteExecutionStore,
};
use stagerun::{DefinitionError, PipelineRun, SecretStoreBuilder, ToolInvoker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "stagerun=debug" } else { "stagerun=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await,
        Command::Validate(cmd) => validate_workflow(cmd),
        Command::List(cmd) => list_workflows(cmd).await.map(|_| EXIT_SUCCESS),
        Command::History(cmd) => show_history(cmd).await.map(|_| EXIT_SUCCESS),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", CROSS, style(&e).red());
            if e.downcast_ref::<DefinitionError>().is_some() {
                EXIT_DEFINITION_ERROR
            } else {
                EXIT_FAILED
            }
        }
    };
    std::process::exit(code);
}

async fn run_workflow(cmd: &RunCommand) -> Result<i32> {
    let config = WorkflowConfig::from_file(&cmd.file)
        .with_context(|| format!("Invalid workflow {}", cmd.file))?;
    let definition = Arc::new(config.to_definition()?);

    let mut invoker = ToolInvoker::default();
    if let Some(dir) = &cmd.working_dir {
        invoker = invoker.with_working_dir(dir);
    }
    invoker.check(&definition)?;

    println!("{} Loaded workflow: {}", INFO, style(&definition.name).bold());

    // Secrets: environment first, file values override
    for name in &cmd.secret {
        if std::env::var(name).map(|v| v.is_empty()).unwrap_or(true) {
            anyhow::bail!("Secret {} is not set in the environment", name);
        }
    }
    let mut secrets = SecretStoreBuilder::new()
        .from_env(definition.secrets.iter())
        .from_env(cmd.secret.iter());
    if let Some(path) = &cmd.secrets_file {
        secrets = secrets
            .from_yaml_file(path)
            .with_context(|| format!("Failed to read secrets file {}", path))?;
    }
    let secrets = secrets.build();
    for name in definition.secrets.iter().filter(|name| !secrets.contains(name)) {
        warn!("Declared secret {} has no value", name);
    }

    let mut run = PipelineRun::new(definition.clone(), cmd.trigger(), &cmd.inputs())?;
    for (key, value) in &run.inputs {
        debug!("Input {} = {}", key, value);
    }

    let strategy = cmd.strategy(Some(&definition.settings));
    let mut engine = ExecutionEngine::new(invoker, secrets, strategy);
    if let Some(secs) = cmd.grace_period {
        engine = engine.with_grace_period(Duration::from_secs(secs));
    }

    let progress = create_progress_bar(definition.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if bar.is_hidden() {
            println!("{}", format_execution_event(&event));
        } else {
            bar.println(format_execution_event(&event));
        }
        match &event {
            ExecutionEvent::StageSucceeded { .. }
            | ExecutionEvent::StageFailed { .. }
            | ExecutionEvent::StageSkipped { .. }
            | ExecutionEvent::StageCancelled { .. } => bar.inc(1),
            ExecutionEvent::StageStarted { stage_id } => bar.set_message(stage_id.clone()),
            _ => {}
        }
    });

    let cancel = engine.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = engine.execute(&mut run).await;
    ctrl_c.abort();
    progress.finish_and_clear();
    let status = result?;

    let summary = create_summary(&run);
    println!("\n{}", separator());
    print_stage_table(&summary);
    println!("{}", separator());

    if !cmd.no_history {
        match SqliteExecutionStore::with_default_path().await {
            Ok(store) => {
                store.save_execution(&summary).await?;
                println!(
                    "{} Run saved to history (ID: {})",
                    INFO,
                    style(&summary.execution_id.to_string()[..8]).dim()
                );
            }
            Err(e) => error!("Could not open history database: {:#}", e),
        }
    }

    let verdict = match status {
        ExecutionStatus::Succeeded => format!("{} {}", CHECK, style("succeeded").green()),
        ExecutionStatus::Cancelled => format!("{} {}", STOP, style("was cancelled").yellow()),
        _ => format!("{} {}", CROSS, style("failed").red()),
    };
    println!("\n{} {}", style(&definition.name).bold(), verdict);

    Ok(exit_code(status))
}

fn print_stage_table(summary: &ExecutionSummary) {
    let width = summary
        .stages
        .iter()
        .map(|s| s.stage_id.len())
        .max()
        .unwrap_or(0);
    for stage in &summary.stages {
        println!("{}", format_stage_line(stage, width));
    }
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating workflow...", INFO);

    let config = match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(&e).red());
            return Ok(EXIT_DEFINITION_ERROR);
        }
    };
    let definition = config.to_definition()?;
    if let Err(e) = ToolInvoker::default().check(&definition) {
        println!("{} Validation failed:", CROSS);
        println!("  {}", style(e).red());
        return Ok(EXIT_DEFINITION_ERROR);
    }

    println!("{} Workflow is valid!", CHECK);
    println!("  Name: {}", style(&definition.name).bold());
    println!("  Stages: {}", style(definition.len()).cyan());
    println!("  Inputs: {}", style(definition.inputs.len()).cyan());
    println!("  Secrets: {}", style(definition.secrets.len()).cyan());
    println!(
        "  Order: {}",
        style(definition.graph().topological_order().join(" → ")).dim()
    );

    // Conditions are evaluated at run time; flag unparseable ones now
    for stage in definition.stages() {
        if let Some(expr) = &stage.condition {
            if let Err(e) = Condition::parse(expr) {
                println!(
                    "  {} {}: {} (the stage will be skipped)",
                    WARN,
                    style(&stage.id).yellow(),
                    e
                );
            }
        }
    }

    if cmd.json {
        let data = serde_json::json!({
            "workflow": config,
            "order": definition.graph().topological_order(),
        });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(EXIT_SUCCESS)
}

async fn list_workflows(cmd: &ListCommand) -> Result<()> {
    let store = SqliteExecutionStore::with_default_path().await?;
    let workflows = store.list_workflows().await?;

    if workflows.is_empty() {
        println!("{} No workflows found in history", INFO);
        return Ok(());
    }

    let mut json_data = Vec::new();
    if !cmd.json {
        println!("{} Workflows in history:", INFO);
    }
    for name in &workflows {
        let executions = store.list_executions(name).await?;
        let count = |status: ExecutionStatus| executions.iter().filter(|e| e.status == status).count();

        if cmd.json {
            json_data.push(serde_json::json!({
                "name": name,
                "execution_count": executions.len(),
                "succeeded": count(ExecutionStatus::Succeeded),
                "failed": count(ExecutionStatus::Failed),
            }));
        } else if cmd.with_counts {
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} cancelled)",
                style(name).bold(),
                style(executions.len()).cyan(),
                style(count(ExecutionStatus::Succeeded)).green(),
                style(count(ExecutionStatus::Failed)).red(),
                style(count(ExecutionStatus::Cancelled)).yellow()
            );
        } else {
            println!("  {}", style(name).bold());
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "workflows": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = SqliteExecutionStore::with_default_path().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_execution_details(&summary, cmd.verbose),
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.workflow {
        Some(name) => store.list_executions(name).await?,
        None => {
            let mut all = Vec::new();
            for name in store.list_workflows().await? {
                all.extend(store.list_executions(&name).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Run history (latest {}):", INFO, executions.len());
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
        if cmd.verbose {
            print_stage_table(summary);
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow_name).bold());
    println!("  Trigger: {} on {}", summary.event, summary.branch);
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({} succeeded, {} failed, {} skipped, {} cancelled of {})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.succeeded_stages,
        summary.failed_stages,
        summary.skipped_stages,
        summary.cancelled_stages,
        summary.total_stages
    );

    if verbose {
        println!("\n  {}", style("Stages:").bold());
        print_stage_table(summary);
    }
}
