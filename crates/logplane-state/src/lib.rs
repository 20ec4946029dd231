//! logplane-state: persistence that outlives a single reconcile pass.
//!
//! Backed by [redb](https://docs.rs/redb). Only one thing is durable across
//! process restarts: the consumer's `EndpointRegistry`, stored as a single
//! JSON blob in the key-value table. Everything else is re-derived from
//! relation data and the workload filesystem on every pass.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use registry::{Endpoint, EndpointRegistry, REGISTRY_KEY};
pub use store::StateStore;
