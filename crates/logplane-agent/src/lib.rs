//! logplane-agent: the log shipper inside the workload container.
//!
//! # Components
//!
//! - **`binary`**: Promtail acquisition: operator resource → local cache →
//!   download, with SHA-256 verification of both the zip and the binary
//! - **`render`**: deterministic Promtail config YAML
//! - **`supervisor`**: pushes config and binary, declares the service
//!   layer, restarts or stops the service; or, in native mode, declares
//!   `loki` log targets on the container supervisor instead
//!
//! ```text
//! AgentSupervisor::reconcile
//!   ├── clients empty?      → stop service, done
//!   ├── BinaryProvisioner   → Resource | Workload | Cache | Download
//!   ├── render_config       → pull, compare, push on change
//!   └── layer + restart     → only when something changed
//! ```

pub mod binary;
pub mod error;
pub mod render;
pub mod supervisor;

pub use binary::{BinarySource, BinarySpec, BinaryState, BinaryProvisioner, Fetcher, HttpFetcher, Provisioned};
pub use error::{AgentError, AgentErrorKind};
pub use render::{PromtailLayout, RenderInputs, render_config};
pub use supervisor::{AgentReport, AgentSupervisor};
