use anyhow::{anyhow, bail, Context, Result};
use cirun::cli::commands::{HistoryCommand, ListCommand, LogsCommand, RunCommand, ValidateCommand};
use cirun::cli::output::*;
use cirun::cli::{Cli, Command};
use cirun::core::config::PipelineConfig;
use cirun::execution::{ExecutionEvent, RunCoordinator, ShellRunner};
use cirun::persistence::{self, InMemoryPersistence, PersistenceBackend, RunSummary};
use cirun::{AbortSignal, LocalProvisioner, Run, Verdict};
use std::path::{Path, PathBuf};
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

/// Exit code for usage and configuration errors
const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::from_args();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{} {:#}", CROSS, e);
        std::process::exit(EXIT_USAGE);
    }

    let result = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await,
        Command::Validate(cmd) => validate_pipeline(cmd),
        Command::List(cmd) => list_pipelines(cmd, &cli).await,
        Command::History(cmd) => show_history(cmd, &cli).await,
        Command::Logs(cmd) => show_logs(cmd, &cli).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", CROSS, e);
            EXIT_USAGE
        }
    };
    std::process::exit(code);
}

/// `CIRUN_LOG` overrides the level chosen by `--verbose`
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_env("CIRUN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")
}

async fn open_store(cli: &Cli) -> Result<Box<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let path = cli
            .db
            .clone()
            .unwrap_or_else(persistence::SqliteRunStore::default_path);
        let store = persistence::SqliteRunStore::new(&path).await?;
        Ok(Box::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        if cli.db.is_some() {
            warn!("Built without sqlite support; --db is ignored");
        }
        Ok(Box::new(InMemoryPersistence::new()))
    }
}

/// Directory exported as CI_SOURCE_DIR
fn source_dir(cmd: &RunCommand) -> PathBuf {
    let dir = cmd.source_dir.clone().unwrap_or_else(|| {
        cmd.file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    dir.canonicalize().unwrap_or(dir)
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<i32> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let mut pipeline = config.to_pipeline();

    // Apply variable overrides
    for (key, value) in &cmd.variable {
        pipeline.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let trigger = cmd.trigger_event()?;

    // Set up persistence
    let store: Box<dyn PersistenceBackend> = if cmd.no_history {
        Box::new(InMemoryPersistence::new())
    } else {
        open_store(cli).await?
    };

    let progress = create_progress_bar(pipeline.steps().len());
    let bar = progress.clone();
    let show_output = cli.show_output;

    let provisioner = LocalProvisioner::new().with_source_dir(source_dir(cmd));
    let runner = ShellRunner::for_pipeline(&pipeline);
    let coordinator = RunCoordinator::new(provisioner, runner).with_event_handler(move |event| {
        // println on a hidden bar drops the line; suspend always prints
        if let Some(line) = format_execution_event(&event) {
            bar.suspend(|| println!("{}", line));
        }
        match &event {
            ExecutionEvent::StepStarted { name, .. } => bar.set_message(name.clone()),
            ExecutionEvent::StepSkipped { .. } => bar.inc(1),
            ExecutionEvent::StepFinished { result, .. } => {
                bar.inc(1);
                if show_output && !result.output.is_empty() {
                    bar.suspend(|| println!("{}", format_output(&result.output, 20)));
                }
            }
            _ => {}
        }
    });

    println!();
    let handle = coordinator.trigger(&pipeline, trigger);
    let interrupt = tokio::spawn(cancel_on_ctrl_c(handle.abort_signal()));
    let run = handle.wait().await?;
    interrupt.abort();
    progress.finish_and_clear();

    print_run_report(&run, show_output);

    // Save to history
    if !cmd.no_history {
        persistence::save_run(store.as_ref(), &run).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(short_id(&run.id())).dim()
        );
    }

    Ok(run.exit_code().unwrap_or(EXIT_USAGE))
}

/// First Ctrl-C cancels the run; a second one exits immediately
async fn cancel_on_ctrl_c(abort: AbortSignal) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    if abort.cancel() {
        warn!("Cancellation requested; running always-run steps and tearing down");
        eprintln!("{} Cancelling... press Ctrl-C again to exit immediately", WARN);
    }
    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(cirun::ErrorKind::Cancelled.exit_code());
    }
}

fn print_run_report(run: &Run, show_output: bool) {
    println!();
    for result in run.results() {
        println!("  {}", format_step_result(result));
    }

    match (run.verdict(), run.failure()) {
        (Verdict::Success, _) => println!(
            "\n{} {} completed {}",
            CHECK,
            style(run.pipeline_name()).bold(),
            style("successfully").green()
        ),
        (_, Some(failure)) => {
            println!(
                "\n{} {} {}: {}",
                CROSS,
                style(run.pipeline_name()).bold(),
                style("failed").red(),
                format_error_kind(failure.kind)
            );
            if let Some(step) = &failure.step {
                println!("  Step: {}", style(step).bold());
            }
            println!("  {}", failure.message);

            // The failing step's output, unless it was already shown
            let failed_output = failure
                .step
                .as_deref()
                .and_then(|name| run.result(name))
                .map(|r| r.output.as_str())
                .filter(|o| !o.is_empty());
            if let (Some(output), false) = (failed_output, show_output) {
                println!("\n{}", format_output(output, 20));
            }
        }
        (verdict, None) => println!(
            "\n{} {} {}",
            CROSS,
            style(run.pipeline_name()).bold(),
            format_verdict(verdict)
        ),
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating pipeline...", INFO);

    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            return Ok(EXIT_USAGE);
        }
    };

    println!("{} Pipeline configuration is valid!", CHECK);
    println!("  Name: {}", style(&config.name).bold());
    println!("  Steps: {}", style(config.steps.len()).cyan());
    println!("  Variables: {}", style(config.variables.len()).cyan());
    if let Some(runtime) = &config.environment.runtime {
        println!(
            "  Runtime: {}{}",
            style(&runtime.name).cyan(),
            runtime
                .version
                .as_ref()
                .map(|v| format!("@{}", v))
                .unwrap_or_default()
        );
    }

    for (index, step) in config.steps.iter().enumerate() {
        let mut notes = Vec::new();
        if step.always_run {
            notes.push("always run".to_string());
        }
        if !step.requires.is_empty() {
            notes.push(format!("requires {}", step.requires.join(", ")));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", notes.join("; "))
        };
        println!("    {}. {}{}", index + 1, style(&step.name).bold(), style(notes).dim());
    }

    if cmd.json {
        let json = serde_json::to_string_pretty(&config)?;
        println!("\n{}", json);
    }
    Ok(0)
}

async fn list_pipelines(cmd: &ListCommand, cli: &Cli) -> Result<i32> {
    let store = open_store(cli).await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.len(),
                "succeeded": runs.iter().filter(|r| r.verdict == Verdict::Success).count(),
                "failed": runs.iter().filter(|r| r.verdict == Verdict::Failure).count(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(0);
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(pipeline_name).await?;
            let succeeded = runs.iter().filter(|r| r.verdict == Verdict::Success).count();
            let failed = runs.iter().filter(|r| r.verdict == Verdict::Failure).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(0)
}

/// All runs across pipelines, newest first
async fn all_runs(store: &dyn PersistenceBackend) -> Result<Vec<RunSummary>> {
    let mut runs = Vec::new();
    for pipeline in store.list_pipelines().await? {
        runs.extend(store.list_runs(&pipeline).await?);
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(runs)
}

/// Resolve a full run ID or a unique prefix of one
async fn resolve_run_id(store: &dyn PersistenceBackend, id: &str) -> Result<Uuid> {
    if let Ok(run_id) = Uuid::parse_str(id) {
        return Ok(run_id);
    }

    let matches: Vec<Uuid> = all_runs(store)
        .await?
        .into_iter()
        .map(|r| r.run_id)
        .filter(|run_id| run_id.to_string().starts_with(id))
        .collect();

    match matches.as_slice() {
        [run_id] => Ok(*run_id),
        [] => Err(anyhow!("No run matches ID '{}'", id)),
        _ => bail!("Run ID '{}' is ambiguous ({} matches)", id, matches.len()),
    }
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<i32> {
    let store = open_store(cli).await?;

    // If a specific run is requested
    if let Some(id) = &cmd.run_id {
        let run_id = resolve_run_id(store.as_ref(), id).await?;
        match store.load_run(run_id).await? {
            Some(summary) => {
                let steps = store.load_step_results(run_id).await?;
                print_run_details(&summary, &steps, cmd.details || cmd.json)?;
            }
            None => println!("{} Run not found", WARN),
        }
        return Ok(0);
    }

    let runs: Vec<RunSummary> = match &cmd.pipeline {
        Some(pipeline_name) => store.list_runs(pipeline_name).await?,
        None => all_runs(store.as_ref()).await?,
    }
    .into_iter()
    .take(cmd.limit)
    .collect();

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(0);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(0)
}

fn print_run_details(
    summary: &RunSummary,
    steps: &[cirun::StepResult],
    details: bool,
) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Trigger: {}@{} ({})", summary.branch, summary.commit, summary.event);
    println!("  Verdict: {}", format_verdict(summary.verdict));
    if let Some(kind) = summary.failure_kind {
        println!("  Failure: {}", format_error_kind(kind));
        if let Some(step) = &summary.failure_step {
            println!("  Failed step: {}", style(step).bold());
        }
        if let Some(message) = &summary.failure_message {
            println!("  Message: {}", message);
        }
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!("  Steps: {}/{} attempted", summary.attempted_steps, summary.total_steps);
    for step in steps {
        println!("    {}", format_step_result(step));
    }

    if details {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

async fn show_logs(cmd: &LogsCommand, cli: &Cli) -> Result<i32> {
    let store = open_store(cli).await?;
    let run_id = resolve_run_id(store.as_ref(), &cmd.run_id).await?;

    let steps = store.load_step_results(run_id).await?;
    let selected: Vec<_> = steps
        .iter()
        .filter(|s| cmd.step.as_deref().map_or(true, |name| s.name == name))
        .collect();

    if selected.is_empty() {
        match &cmd.step {
            Some(name) => println!("{} Step '{}' was not attempted in run {}", WARN, name, run_id),
            None => println!("{} No step output recorded for run {}", WARN, run_id),
        }
        return Ok(0);
    }

    for step in selected {
        println!("{} [{}] {}", INFO, step.index + 1, format_step_result(step));
        if step.output_truncated {
            println!("{}", style("(earlier output was truncated)").dim());
        }
        print!("{}", step.output);
        if !step.output.is_empty() && !step.output.ends_with('\n') {
            println!();
        }
    }

    Ok(0)
}
