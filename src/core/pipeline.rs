//! Pipeline domain model

use crate::core::{
    config::{EnvironmentSpec, PipelineConfig},
    step::{Step, StepDefaults},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default per-step captured output limit (1 MiB)
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

/// A parsed, immutable pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Variables available to step commands
    pub variables: HashMap<String, String>,

    /// Environment every run provisions
    pub environment: EnvironmentSpec,

    /// Limit for a whole run
    pub run_timeout: Option<Duration>,

    /// Per-step captured output limit in bytes
    pub output_limit: usize,

    /// Steps in declared order
    steps: Arc<[Step]>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let defaults = StepDefaults {
            timeout_secs: config
                .default_timeout_secs
                .unwrap_or(StepDefaults::default().timeout_secs),
        };

        let steps: Arc<[Step]> = config
            .steps
            .iter()
            .enumerate()
            .map(|(index, step_config)| Step::from_config(index, step_config, &defaults))
            .collect();

        Pipeline {
            name: config.name.clone(),
            variables: config
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            environment: config.environment.clone(),
            run_timeout: config.run_timeout_secs.map(Duration::from_secs),
            output_limit: config.output_limit_bytes.unwrap_or(DEFAULT_OUTPUT_LIMIT),
            steps,
        }
    }

    /// Build a pipeline directly from steps, with a bare environment
    pub fn from_steps(name: impl Into<String>, steps: Vec<Step>) -> Self {
        let steps: Arc<[Step]> = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| Step { index, ..step })
            .collect();

        Pipeline {
            name: name.into(),
            variables: HashMap::new(),
            environment: EnvironmentSpec::default(),
            run_timeout: None,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            steps,
        }
    }

    /// Steps in declared order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Render every step command with the given variables layered over the pipeline's own
    pub fn render_steps(&self, extra: &HashMap<String, String>) -> Arc<[Step]> {
        let mut variables = self.variables.clone();
        variables.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.steps.iter().map(|step| step.rendered(&variables)).collect()
    }
}
