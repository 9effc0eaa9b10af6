//! Pipeline configuration from YAML

use crate::core::Pipeline;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Variables available to step commands as `{{ name }}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,

    /// Execution environment to provision for every run
    #[serde(default)]
    pub environment: EnvironmentSpec,

    /// Default timeout for steps (in seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,

    /// Limit for the whole run (in seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    /// Per-step captured output limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_limit_bytes: Option<usize>,

    /// Pipeline steps, in execution order
    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step name
    pub name: String,

    /// Shell command, run with `sh -c`
    pub command: String,

    /// Run even after an earlier failure (cleanup, log collection)
    #[serde(default, alias = "alwaysRun")]
    pub always_run: bool,

    /// Capability tags required from the environment
    #[serde(default)]
    pub requires: Vec<String>,

    /// Timeout for this step (overrides the pipeline default)
    #[serde(
        default,
        alias = "timeoutSeconds",
        alias = "timeout_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_seconds: Option<u64>,
}

/// What the provisioner must build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Language runtime the steps expect on PATH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeSpec>,

    /// System packages the steps may depend on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageSpec>,

    /// Directory under which per-run working directories are created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for every step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Runtime identity and version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Executable name, e.g. `python3`
    pub name: String,

    /// Version string that must appear in `<name> --version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A system package, either a bare name or a name with the binary that proves it is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageSpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        probe: Option<String>,
    },
}

impl PackageSpec {
    /// Capability tag provided by this package
    pub fn name(&self) -> &str {
        match self {
            PackageSpec::Name(name) => name,
            PackageSpec::Detailed { name, .. } => name,
        }
    }

    /// Executable looked up on PATH to detect the package
    pub fn probe(&self) -> &str {
        match self {
            PackageSpec::Name(name) => name,
            PackageSpec::Detailed { name, probe } => probe.as_deref().unwrap_or(name),
        }
    }
}

fn capability_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+\-]*(@[A-Za-z0-9._+\-]+)?$")
            .expect("capability pattern is valid")
    })
}

/// Check that a capability tag is well-formed (`name` or `name@version`)
pub fn is_valid_capability(tag: &str) -> bool {
    capability_regex().is_match(tag)
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        // Check that all step names are unique
        let mut seen_names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                anyhow::bail!("Step names must not be empty");
            }
            if !seen_names.insert(&step.name) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }
            if step.command.trim().is_empty() {
                anyhow::bail!("Step '{}' has an empty command", step.name);
            }
            if step.timeout_seconds == Some(0) {
                anyhow::bail!("Step '{}' timeout must be at least 1 second", step.name);
            }
            for tag in &step.requires {
                if !is_valid_capability(tag) {
                    anyhow::bail!("Step '{}' requires invalid capability '{}'", step.name, tag);
                }
            }
        }

        if self.default_timeout_secs == Some(0) {
            anyhow::bail!("default_timeout_secs must be at least 1 second");
        }
        if self.run_timeout_secs == Some(0) {
            anyhow::bail!("run_timeout_secs must be at least 1 second");
        }
        if self.output_limit_bytes == Some(0) {
            anyhow::bail!("output_limit_bytes must be positive");
        }

        if let Some(runtime) = &self.environment.runtime {
            if runtime.name.trim().is_empty() {
                anyhow::bail!("Environment runtime name must not be empty");
            }
        }
        for package in &self.environment.packages {
            if !is_valid_capability(package.name()) {
                anyhow::bail!("Invalid package name '{}'", package.name());
            }
        }

        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
