//! Top-level error kinds surfaced by the submission pipeline.
//!
//! Finalization-side failures never appear here: they are captured on the
//! record (`lastError`) and retried by the queue, because the original
//! submitter may have disconnected long before finalization runs.

use crate::chain::ChainError;

/// Errors surfaced synchronously to an API caller.
#[derive(Debug, thiserror::Error)]
pub enum RefractorError {
    /// Malformed input: bad encoding, invalid signer key, invalid callback
    /// URL, expired `maxTime`, ambiguous request shape. HTTP 400.
    #[error("{0}")]
    Validation(String),
    /// Recognized but deliberately unsupported input, e.g. a fee-bump
    /// envelope. HTTP 406.
    #[error("{0}")]
    UnsupportedFeature(String),
    /// A blockchain the registry knows but no handler implements. HTTP 501.
    #[error("Blockchain not implemented: {0}")]
    Unimplemented(String),
    /// Same hash, conflicting immutable fields. HTTP 409.
    #[error("Hash collision on {0}: immutable fields differ from the stored record")]
    HashCollision(String),
    /// Unknown transaction hash. HTTP 404.
    #[error("Transaction not found")]
    NotFound,
    /// Storage or chain RPC unavailable. HTTP 503.
    #[error("Backend unavailable: {0}")]
    TransientBackend(String),
    /// Unexpected internal failure. HTTP 500.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChainError> for RefractorError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidInput(msg) => RefractorError::Validation(msg),
            ChainError::UnsupportedEncoding(enc) => {
                RefractorError::Validation(format!("Unsupported encoding: {}", enc))
            }
            ChainError::UnsupportedFeature(msg) => RefractorError::UnsupportedFeature(msg),
            ChainError::TransientBackend(msg) => RefractorError::TransientBackend(msg),
        }
    }
}
