//! Step domain model

use crate::core::config::StepConfig;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use std::time::Duration;

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Position in the declared step list
    pub index: usize,

    /// Step name, unique within the pipeline
    pub name: String,

    /// Shell command
    pub command: String,

    /// Runs even after an earlier required step failed or the run was aborted
    pub always_run: bool,

    /// Capability tags the environment must provide
    pub requires: BTreeSet<String>,

    /// Per-step time limit
    pub timeout: Duration,
}

impl Step {
    /// Create a step from a step config
    pub fn from_config(index: usize, config: &StepConfig, defaults: &StepDefaults) -> Self {
        Step {
            index,
            name: config.name.clone(),
            command: config.command.clone(),
            always_run: config.always_run,
            requires: config.requires.iter().cloned().collect(),
            timeout: Duration::from_secs(config.timeout_seconds.unwrap_or(defaults.timeout_secs)),
        }
    }

    /// Return a copy with `{{ name }}` placeholders in the command substituted
    pub fn rendered(&self, variables: &HashMap<String, String>) -> Step {
        Step {
            command: render_template(&self.command, variables),
            ..self.clone()
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Replace `{{ variable }}` placeholders; unknown placeholders are kept verbatim
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 300, // 5 minutes
        }
    }
}
