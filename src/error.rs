//! Error types for the Flotilla operator

use thiserror::Error;

/// Main error type for Flotilla operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs or plugin wiring
    #[error("validation error: {0}")]
    Validation(String),

    /// A resource another resource links to does not exist
    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    /// Plugin configuration error (missing program, schema violation)
    #[error("plugin configuration error: {0}")]
    PluginConfig(String),

    /// Plugin script execution error
    #[error("plugin execution error: {0}")]
    PluginExecution(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a dependency-missing error with the given message
    pub fn dependency_missing(msg: impl Into<String>) -> Self {
        Self::DependencyMissing(msg.into())
    }

    /// Create a plugin configuration error with the given message
    pub fn plugin_config(msg: impl Into<String>) -> Self {
        Self::PluginConfig(msg.into())
    }

    /// Create a plugin execution error with the given message
    pub fn plugin_execution(msg: impl Into<String>) -> Self {
        Self::PluginExecution(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

/// Absorb a Kubernetes NotFound error, turning it into `Ok(None)`
///
/// Optional resources (an existing Service, a workload object, a PVC) are
/// loaded with this helper: absence is a recoverable signal, not an error.
pub fn ignore_not_found<T>(
    result: std::result::Result<T, kube::Error>,
) -> std::result::Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Absorb a Kubernetes NotFound error on a write, turning it into `Ok(())`
///
/// Deleting an already-gone dependent during cleanup is a success.
pub fn ignore_not_found_on_delete<T>(
    result: std::result::Result<T, kube::Error>,
) -> std::result::Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}
