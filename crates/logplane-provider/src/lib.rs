//! logplane-provider: the serving side of the logging relation.
//!
//! # Components
//!
//! - **`engine`**: `ProviderEngine`: computes and publishes the push URL,
//!   decodes peer rule bundles, exposes the `alerts()` view
//! - **`ruler`**: writes one Loki ruler file per peer bundle into the
//!   tenant directory and removes everything else

pub mod engine;
pub mod error;
pub mod ruler;

pub use engine::{AlertsEntry, BundleSet, PeerBundle, ProviderEngine};
pub use error::{ProviderError, ProviderResult};
pub use ruler::{RuleSyncReport, rule_file_name};
