//! CLI command definitions

use crate::core::{EventKind, TriggerEvent};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Branch or ref being validated
    #[arg(long)]
    pub branch: Option<String>,

    /// Commit identifier
    #[arg(long)]
    pub commit: Option<String>,

    /// Event kind (push, pull_request, manual, schedule)
    #[arg(long)]
    pub event: Option<EventKind>,

    /// JSON trigger event file; flags override its fields
    #[arg(long)]
    pub event_file: Option<PathBuf>,

    /// Variable overrides (key=value)
    #[arg(long = "var", alias = "variable", value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Directory exported to steps as CI_SOURCE_DIR (default: the pipeline file's directory)
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Build the trigger event from the event file and flags
    pub fn trigger_event(&self) -> Result<TriggerEvent> {
        let mut event = match &self.event_file {
            Some(path) => TriggerEvent::from_file(path)?,
            None => TriggerEvent::manual(),
        };

        if let Some(branch) = &self.branch {
            event.branch = branch.clone();
        }
        if let Some(commit) = &self.commit {
            event.commit = commit.clone();
        }
        if let Some(kind) = self.event {
            event.kind = kind;
        }

        Ok(event)
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines in history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run (full ID or unique prefix)
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Show captured step output of a past run
#[derive(Debug, Args, Clone)]
pub struct LogsCommand {
    /// Run ID (full ID or unique prefix)
    pub run_id: String,

    /// Only show this step
    #[arg(long)]
    pub step: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
