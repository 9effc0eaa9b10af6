//! Execution environments and the provisioners that build them

pub mod error;
pub mod local;

use crate::core::config::{EnvironmentSpec, RuntimeSpec};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub use error::ProvisionError;
pub use local::LocalProvisioner;

/// Trait for provisioning - allows for different implementations
///
/// `teardown` takes the environment by value, so an environment can be torn
/// down at most once.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Build an environment for one run
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<Environment, ProvisionError>;

    /// Release everything `provision` allocated
    async fn teardown(&self, environment: Environment) -> Result<(), ProvisionError>;
}

/// The provisioned execution context of a single run
#[derive(Debug)]
pub struct Environment {
    working_dir: PathBuf,

    /// Directory owned by this environment, removed on teardown
    workspace: Option<TempDir>,

    runtime: Option<RuntimeSpec>,

    /// Capabilities established at provisioning time
    capabilities: BTreeSet<String>,

    /// Capability tag -> executable proving it
    probes: BTreeMap<String, String>,

    variables: BTreeMap<String, String>,

    /// PATH used to detect capabilities installed after provisioning
    search_path: Option<OsString>,
}

impl Environment {
    /// An environment over an existing directory with a fixed capability set
    pub fn new(working_dir: impl Into<PathBuf>, capabilities: impl IntoIterator<Item = String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            workspace: None,
            runtime: None,
            capabilities: capabilities.into_iter().collect(),
            probes: BTreeMap::new(),
            variables: BTreeMap::new(),
            search_path: None,
        }
    }

    /// An environment owning its working directory
    pub fn owned(workspace: TempDir, capabilities: impl IntoIterator<Item = String>) -> Self {
        let mut environment = Self::new(workspace.path(), capabilities);
        environment.workspace = Some(workspace);
        environment
    }

    pub fn with_runtime(mut self, runtime: RuntimeSpec) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Detect plain capability tags on this PATH when not provisioned up front
    pub fn with_search_path(mut self, search_path: OsString) -> Self {
        self.search_path = Some(search_path);
        self
    }

    /// Detect `tag` by looking up `executable` on the search path
    pub fn with_probe(mut self, tag: impl Into<String>, executable: impl Into<String>) -> Self {
        self.probes.insert(tag.into(), executable.into());
        self
    }

    pub fn with_variables<I, K, V>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variables
            .extend(variables.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn runtime(&self) -> Option<&RuntimeSpec> {
        self.runtime.as_ref()
    }

    /// Capabilities established at provisioning time
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// Variables exported to every step
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Check a capability against the current state of the environment
    pub fn has_capability(&self, tag: &str) -> bool {
        if self.capabilities.contains(tag) {
            return true;
        }
        // Versioned tags are only ever established by provisioning
        if tag.contains('@') {
            return false;
        }
        match &self.search_path {
            Some(search_path) => {
                let executable = self.probes.get(tag).map(String::as_str).unwrap_or(tag);
                which::which_in(executable, Some(search_path), &self.working_dir).is_ok()
            }
            None => false,
        }
    }

    /// Required tags the environment does not provide, in order
    pub fn missing_capabilities<'a, I>(&self, requires: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        requires
            .into_iter()
            .filter(|tag| !self.has_capability(tag))
            .cloned()
            .collect()
    }

    /// Give up ownership of the working directory, if any
    pub fn into_workspace(self) -> Option<TempDir> {
        self.workspace
    }
}
