//! Error types for the Veil runtime data model

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, VeilError>;

/// Errors raised while handling compiled artifacts and their metadata
#[derive(Debug, Error)]
pub enum VeilError {
    /// Artifact or descriptor could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Artifact contents are internally inconsistent
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Target name did not match any supported backend
    #[error("Unknown target: {0} (expected `evm` or `wasm`)")]
    UnknownTarget(String),

    /// Other errors not covered by specific variants
    #[error("{0}")]
    Other(String),
}

impl VeilError {
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn invalid_artifact(msg: impl Into<String>) -> Self {
        Self::InvalidArtifact(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<serde_json::Error> for VeilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
