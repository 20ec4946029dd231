//! Error types for the provider engine.

use logplane_core::ContainerError;
use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("failed to encode {what}: {reason}")]
    Encode { what: String, reason: String },
}
