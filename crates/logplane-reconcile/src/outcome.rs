//! What a pass reports back to the host.

use std::fmt;

use serde::{Deserialize, Serialize};

use logplane_agent::{AgentError, AgentErrorKind};

/// Prefix of the Blocked message set when the Loki ruler rejects rules.
pub const RULER_ERROR_PREFIX: &str = "ruler rejected rules";

/// Unit status shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Status {
    Active,
    Waiting(String),
    Blocked(String),
}

impl Status {
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Active)
    }

    /// A Blocked status caused by the ruler probe.
    pub fn is_ruler_error(&self) -> bool {
        matches!(self, Status::Blocked(msg) if msg.starts_with(RULER_ERROR_PREFIX))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => f.write_str("active"),
            Status::Waiting(msg) => write!(f, "waiting: {msg}"),
            Status::Blocked(msg) => write!(f, "blocked: {msg}"),
        }
    }
}

/// Notifications for the host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    AlertRulesChanged {
        error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The endpoint registry went from empty to non-empty.
    EndpointsJoined,
    /// The endpoint registry went from non-empty to empty.
    EndpointsDeparted,
    AgentError {
        kind: AgentErrorKind,
        detail: String,
    },
}

impl From<AgentError> for Signal {
    fn from(e: AgentError) -> Self {
        Signal::AgentError {
            kind: e.kind,
            detail: e.detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub status: Status,
    pub signals: Vec<Signal>,
    pub config_changed: bool,
    pub restarted: bool,
    /// Container paths written during the pass.
    pub files_written: Vec<String>,
    pub relation_writes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loki_version: Option<String>,
    /// Rules error standing after this pass, whether or not it was signalled now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_error: Option<String>,
}

impl ReconcileOutcome {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            signals: Vec::new(),
            config_changed: false,
            restarted: false,
            files_written: Vec::new(),
            relation_writes: 0,
            loki_version: None,
            rules_error: None,
        }
    }

    /// Nothing on disk or in relation data was touched.
    pub fn is_quiet(&self) -> bool {
        self.files_written.is_empty() && self.relation_writes == 0 && !self.restarted
    }
}
