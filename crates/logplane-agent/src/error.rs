//! Structured agent failures surfaced to the host process.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use logplane_core::ContainerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// Network fetch of the agent binary failed.
    Fetch,
    /// SHA-256 mismatch on a downloaded or cached artefact.
    Integrity,
    /// Pushing a file into the workload container failed.
    ContainerPush,
    /// The Promtail config could not be rendered.
    Render,
    /// The container supervisor rejected a layer or service command.
    Supervisor,
    /// Persisting consumer state failed.
    State,
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentErrorKind::Fetch => "fetch",
            AgentErrorKind::Integrity => "integrity",
            AgentErrorKind::ContainerPush => "container_push",
            AgentErrorKind::Render => "render",
            AgentErrorKind::Supervisor => "supervisor",
            AgentErrorKind::State => "state",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} error: {detail}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub detail: String,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn push(e: ContainerError) -> Self {
        Self::new(AgentErrorKind::ContainerPush, e.to_string())
    }

    pub fn render(e: serde_yaml::Error) -> Self {
        Self::new(AgentErrorKind::Render, format!("rendering config: {e}"))
    }

    pub fn supervisor(e: ContainerError) -> Self {
        Self::new(AgentErrorKind::Supervisor, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failures_carry_their_own_kind() {
        let yaml = serde_yaml::from_str::<u32>("not a number").unwrap_err();
        let err = AgentError::render(yaml);
        assert_eq!(err.kind, AgentErrorKind::Render);
        assert!(err.detail.starts_with("rendering config: "));
        assert!(err.to_string().starts_with("render error: "));
    }
}
