//! Trigger events - the external input that starts a run

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Kind of event that triggered a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    #[default]
    Manual,
    Schedule,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Manual => "manual",
            EventKind::Schedule => "schedule",
        };
        f.write_str(label)
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pr" => Ok(EventKind::PullRequest),
            "manual" => Ok(EventKind::Manual),
            "schedule" => Ok(EventKind::Schedule),
            other => Err(format!("Unknown event kind: {}", other)),
        }
    }
}

/// Event record that starts a run, e.g. from a source-control webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Branch or ref being validated
    #[serde(alias = "branchOrRef", alias = "ref")]
    pub branch: String,

    /// Commit identifier
    pub commit: String,

    /// Event kind
    #[serde(default, alias = "eventKind")]
    pub kind: EventKind,
}

impl TriggerEvent {
    pub fn new(branch: impl Into<String>, commit: impl Into<String>, kind: EventKind) -> Self {
        Self {
            branch: branch.into(),
            commit: commit.into(),
            kind,
        }
    }

    /// A manual trigger with no source-control metadata
    pub fn manual() -> Self {
        Self::new("local", "HEAD", EventKind::Manual)
    }

    /// Parse an event record from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid trigger event JSON")
    }

    /// Load an event record from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Template variables exposed to step commands
    pub fn variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("branch".to_string(), self.branch.clone());
        vars.insert("commit".to_string(), self.commit.clone());
        vars.insert("event".to_string(), self.kind.to_string());
        vars
    }
}
