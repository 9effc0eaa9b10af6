//! CLI output formatting

use crate::{
    core::{ErrorKind, StepResult, Verdict},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over the steps of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a verdict for display
pub fn format_verdict(verdict: Verdict) -> String {
    match verdict {
        Verdict::Pending => style("PENDING").dim().to_string(),
        Verdict::Running => style("RUNNING").yellow().to_string(),
        Verdict::Success => style("SUCCESS").green().to_string(),
        Verdict::Failure => style("FAILURE").red().to_string(),
    }
}

pub fn format_error_kind(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::Cancelled | ErrorKind::Timeout => style(kind).yellow().to_string(),
        _ => style(kind).red().to_string(),
    }
}

/// Short form of a run ID
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a run summary as one history line
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = match summary.verdict {
        Verdict::Success => CHECK,
        Verdict::Failure => CROSS,
        Verdict::Running => SPINNER,
        Verdict::Pending => INFO,
    };

    let failure = match (&summary.failure_kind, &summary.failure_step) {
        (Some(kind), Some(step)) => format!(" - {} in {}", format_error_kind(*kind), style(step).bold()),
        (Some(kind), None) => format!(" - {}", format_error_kind(*kind)),
        _ => String::new(),
    };

    format!(
        "{} {} - {} - {}@{} - {} ({}/{}){}",
        icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.pipeline_name).bold(),
        summary.branch,
        style(&summary.commit).dim(),
        format_verdict(summary.verdict),
        summary.attempted_steps,
        summary.total_steps,
        failure
    )
}

/// Format one step result as a report line
pub fn format_step_result(result: &StepResult) -> String {
    let duration = format_duration(Duration::from_millis(result.duration_ms));
    match (result.error_kind(), result.error_message()) {
        (Some(kind), Some(message)) => format!(
            "{} {} {} {}: {}",
            CROSS,
            style(&result.name).red(),
            style(duration).dim(),
            format_error_kind(kind),
            message
        ),
        _ => format!("{} {} {}", CHECK, style(&result.name).green(), style(duration).dim()),
    }
}

/// Format an execution event for display; `None` for events that stay silent
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            trigger,
            total_steps,
        } => format!(
            "{} Starting {} ({}) for {}@{} [{}], {} steps",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim(),
            trigger.branch,
            style(&trigger.commit).dim(),
            trigger.kind,
            total_steps
        ),
        ExecutionEvent::EnvironmentReady {
            working_dir,
            capabilities,
            ..
        } => format!(
            "{} Environment ready in {} ({})",
            INFO,
            style(working_dir.display()).dim(),
            if capabilities.is_empty() {
                "no capabilities".to_string()
            } else {
                capabilities.join(", ")
            }
        ),
        ExecutionEvent::ProvisionFailed { error, .. } => {
            format!("{} Provisioning failed: {}", CROSS, style(error).red())
        }
        ExecutionEvent::StepStarted {
            name, always_run, ..
        } => {
            if *always_run {
                format!("{} {} {}", SPINNER, style(name).cyan(), style("(always run)").dim())
            } else {
                format!("{} {}", SPINNER, style(name).cyan())
            }
        }
        ExecutionEvent::StepSkipped { name, .. } => {
            format!("{} {} {}", SKIP, style(name).dim(), style("skipped").dim())
        }
        ExecutionEvent::StepFinished { result, .. } => format_step_result(result),
        ExecutionEvent::RunAborted { reason, .. } => {
            format!("{} {}", WARN, style(reason).yellow())
        }
        ExecutionEvent::EnvironmentTornDown { error: Some(error), .. } => {
            format!("{} Teardown failed: {}", WARN, style(error).yellow())
        }
        ExecutionEvent::EnvironmentTornDown { error: None, .. } => return None,
        ExecutionEvent::RunCompleted { .. } => return None,
    };
    Some(line)
}

/// Keep the last `max_lines` lines of step output
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        lines.join("\n")
    } else {
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            lines[lines.len() - max_lines..].join("\n")
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
