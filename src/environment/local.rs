//! Local provisioner - a fresh directory on this machine per run

use crate::core::config::{EnvironmentSpec, RuntimeSpec};
use crate::environment::{Environment, ProvisionError, Provisioner};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Timeout for `<runtime> --version`
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Provisions environments as per-run directories on the local machine
#[derive(Debug, Clone, Default)]
pub struct LocalProvisioner {
    /// Directory exported to steps as `CI_SOURCE_DIR`
    source_dir: Option<PathBuf>,
}

impl LocalProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_dir(mut self, source_dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(source_dir.into());
        self
    }

    /// PATH the steps will see: the configured override or our own
    fn search_path(spec: &EnvironmentSpec) -> OsString {
        spec.env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default()
    }

    async fn check_runtime(
        runtime: &RuntimeSpec,
        search_path: &OsString,
        cwd: &Path,
    ) -> Result<(), ProvisionError> {
        let executable = which::which_in(&runtime.name, Some(search_path), cwd).map_err(|_| {
            ProvisionError::RuntimeNotFound {
                name: runtime.name.clone(),
            }
        })?;
        debug!("Runtime {} resolved to {}", runtime.name, executable.display());

        let Some(expected) = &runtime.version else {
            return Ok(());
        };

        let reported = probe_version(&runtime.name, &executable).await?;
        if !version_matches(&reported, expected) {
            return Err(ProvisionError::RuntimeVersionMismatch {
                name: runtime.name.clone(),
                expected: expected.clone(),
                found: reported.trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Whether `reported` names `expected` as a whole version or a version prefix.
/// `3.11` matches `Python 3.11.4`; `3.1` does not.
fn version_matches(reported: &str, expected: &str) -> bool {
    let pattern = format!(r"(^|[^0-9.]){}($|[^0-9])", regex::escape(expected));
    Regex::new(&pattern)
        .map(|re| re.is_match(reported))
        .unwrap_or(false)
}

/// Run `<executable> --version` and return its combined output
async fn probe_version(name: &str, executable: &Path) -> Result<String, ProvisionError> {
    let output = timeout(
        VERSION_PROBE_TIMEOUT,
        Command::new(executable)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ProvisionError::RuntimeProbe {
        name: name.to_string(),
        message: format!("timed out after {}s", VERSION_PROBE_TIMEOUT.as_secs()),
    })?
    .map_err(|e| ProvisionError::RuntimeProbe {
        name: name.to_string(),
        message: e.to_string(),
    })?;

    // Some runtimes print their version on stderr
    let mut reported = String::from_utf8_lossy(&output.stdout).into_owned();
    reported.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(reported)
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<Environment, ProvisionError> {
        let base = spec.working_dir.clone().unwrap_or_else(std::env::temp_dir);

        tokio::fs::create_dir_all(&base)
            .await
            .map_err(|source| ProvisionError::Workspace {
                path: base.clone(),
                source,
            })?;

        let workspace = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&base)
            .map_err(|source| ProvisionError::Workspace {
                path: base.clone(),
                source,
            })?;

        let search_path = Self::search_path(spec);
        let mut capabilities = BTreeSet::new();

        if let Some(runtime) = &spec.runtime {
            // The workspace is dropped (and removed) if the runtime check fails
            Self::check_runtime(runtime, &search_path, workspace.path()).await?;
            capabilities.insert(runtime.name.clone());
            if let Some(version) = &runtime.version {
                capabilities.insert(format!("{}@{}", runtime.name, version));
            }
        }

        for package in &spec.packages {
            if which::which_in(package.probe(), Some(&search_path), workspace.path()).is_ok() {
                capabilities.insert(package.name().to_string());
            } else {
                warn!(
                    "Package '{}' not found (probe: {}); steps requiring it will not run",
                    package.name(),
                    package.probe()
                );
            }
        }

        let working_dir = workspace.path().display().to_string();
        info!("Provisioned environment in {}", working_dir);

        let mut environment = Environment::owned(workspace, capabilities)
            .with_search_path(search_path)
            .with_variables(spec.env.clone())
            .with_variables([("CI_WORKSPACE", working_dir)]);

        for package in &spec.packages {
            environment = environment.with_probe(package.name(), package.probe());
        }
        if let Some(runtime) = &spec.runtime {
            environment = environment.with_runtime(runtime.clone());
        }
        if let Some(source_dir) = &self.source_dir {
            environment =
                environment.with_variables([("CI_SOURCE_DIR", source_dir.display().to_string())]);
        }

        Ok(environment)
    }

    async fn teardown(&self, environment: Environment) -> Result<(), ProvisionError> {
        let Some(workspace) = environment.into_workspace() else {
            return Ok(());
        };

        let path = workspace.path().to_path_buf();
        debug!("Removing working directory {}", path.display());
        workspace
            .close()
            .map_err(|source| ProvisionError::Teardown { path, source })
    }
}
