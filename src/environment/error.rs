//! Provisioning error types

use std::path::PathBuf;
use thiserror::Error;

/// Error types for environment provisioning and teardown
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Cannot create working directory under {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Runtime '{name}' not found on PATH")]
    RuntimeNotFound { name: String },

    #[error("Runtime '{name}' reports '{found}', expected version {expected}")]
    RuntimeVersionMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Failed to probe runtime '{name}': {message}")]
    RuntimeProbe { name: String, message: String },

    #[error("Failed to tear down {path}: {source}")]
    Teardown {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
