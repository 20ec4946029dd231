//! logplane-core: shared types for the log-ingestion control plane.
//!
//! Both roles (the Loki-side provider and the workload-side consumer) are
//! written against the types in this crate:
//!
//! - **`topology`**: producer identity stamped into labels and expressions
//! - **`rules`**: alert rules, groups, and the on-disk `.rule` loader
//! - **`relation`**: relation data bags and their JSON payload schemas
//! - **`container`**: the workload container contract and a
//!   filesystem-backed implementation
//! - **`config`**: `logplane.toml` parsing
//! - **`bundle`**: test bundles published next to alert rules

pub mod bundle;
pub mod config;
pub mod container;
pub mod error;
pub mod relation;
pub mod rules;
pub mod topology;

pub use config::{AgentMode, LogplaneConfig, Role};
pub use container::{Container, Layer, LocalContainer, LogTarget, ServiceSpec, select_container};
pub use error::{ConfigError, ContainerError, ContainerResult, RuleError};
pub use relation::{DataBag, Relation, RelationPayload, RelationWriter, Scope};
pub use rules::{AlertGroup, AlertRule, AlertRules, LoadedRules, RuleLoader};
pub use topology::{TOPOLOGY_PLACEHOLDER, Topology};
