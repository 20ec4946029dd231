//! logplane-health: probes against the local Loki HTTP API.
//!
//! After ruler files are rewritten the provider asks Loki whether it
//! accepted them:
//!
//! ```text
//! GET /loki/api/v1/rules
//!   200                                  → Healthy
//!   404 + "no rule groups found"         → Healthy (nothing loaded yet)
//!   any other 4xx/5xx                    → RuleError (Blocked status)
//!   connect / timeout failure            → Transient (retry next pass)
//! ```
//!
//! `GET /loki/api/v1/status/buildinfo` is used for optional version
//! discovery.

pub mod probe;

pub use probe::{BuildInfo, ProbeError, RulerProbe, classify_ruler_response, fetch_build_info, probe_ruler};
