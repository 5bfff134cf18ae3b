//! Error taxonomy for the indexing and bridging pipeline.
//!
//! The classification drives retry behavior:
//!
//! - [`IndexerError::Transient`] — retried with bounded exponential backoff.
//! - [`IndexerError::VerificationMismatch`] — permanent, expected rejection;
//!   the mint job is failed and never retried.
//! - [`IndexerError::NonceConflict`] — resolved by re-submitting at the same
//!   nonce, never by allocating a new one.
//! - [`IndexerError::FatalDecode`] — fails the enclosing block job; the queue
//!   retries it through the backoff budget, then dead-letters the block and
//!   halts that chain.
//! - [`IndexerError::Permanent`] — requires operator resolution.

use alloy::primitives::B256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    /// RPC or store timeouts, connection resets. Safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Recomputed content hash does not match recorded provenance, or the
    /// provenance lookup could not confirm existence.
    #[error("verification mismatch for {hash_id}: {reason}")]
    VerificationMismatch { hash_id: B256, reason: String },

    /// A nonce operation that would skip or reuse a sequence value.
    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    /// Corrupted or incompatible event payload for a known topic.
    #[error("fatal decode error: {0}")]
    FatalDecode(String),

    /// Broadcast-and-rejected transactions and other failures that need an
    /// operator.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl IndexerError {
    /// Whether the retry/backoff policy applies.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexerError::Transient(_))
    }

    pub fn transient(context: impl std::fmt::Display) -> Self {
        IndexerError::Transient(context.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(IndexerError::transient("connection reset").is_transient());
        assert!(!IndexerError::FatalDecode("bad topic".into()).is_transient());
        assert!(!IndexerError::Permanent("reverted".into()).is_transient());
        assert!(!IndexerError::VerificationMismatch {
            hash_id: B256::ZERO,
            reason: "sha mismatch".into(),
        }
        .is_transient());
    }
}
