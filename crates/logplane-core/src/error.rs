//! Error types shared by the logplane crates.

use thiserror::Error;

/// Result type alias for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Failures talking to the workload container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container {0} is not reachable")]
    Unreachable(String),

    #[error("path error at {path}: {reason}")]
    Path { path: String, reason: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service not defined in any layer: {0}")]
    UnknownService(String),

    #[error("supervisor state error: {0}")]
    Supervisor(String),

    #[error("{op} on {path} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        path: String,
        timeout: std::time::Duration,
    },
}

/// Problems with the operator-supplied configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("more than one container available ({0}); set container_name to pick one")]
    AmbiguousContainer(String),

    #[error("configured container {0} does not exist")]
    UnknownContainer(String),

    #[error("no workload container available")]
    NoContainer,
}

/// Why a single `.rule` file was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("unreadable rule file: {0}")]
    Io(String),

    #[error("malformed rule file: {0}")]
    Parse(String),

    #[error("missing or empty `{0}`")]
    MissingField(&'static str),

    #[error("expr does not contain the %%juju_topology%% placeholder")]
    MissingPlaceholder,
}
