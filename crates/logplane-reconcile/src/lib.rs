//! logplane-reconcile: the single idempotent pass run on every host event.
//!
//! ```text
//! Event + HostSnapshot
//!   └── Reconciler::reconcile
//!         ├── consumer: rules → registry → agent → publish
//!         └── provider: bundles → ruler files → probe → publish
//!   → ReconcileOutcome { status, signals, ... }
//! ```
//!
//! The pass never returns an error: every failure becomes a `Status` and,
//! where the host should hear about it, a `Signal`.

pub mod error;
pub mod event;
pub mod outcome;
pub mod reconciler;
pub mod snapshot;

pub use error::{ReconcileError, ReconcileResult};
pub use event::Event;
pub use outcome::{ReconcileOutcome, Signal, Status};
pub use reconciler::Reconciler;
pub use snapshot::{ContainerHost, HostSnapshot, RecordedWrite, RecordingWriter};
