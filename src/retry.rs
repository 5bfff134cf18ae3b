//! Retry policy shared by the block queue and the mint pipeline.
//!
//! Provides the exponential backoff curve, the per-attempt gas bump used when
//! replacing a mint transaction at the same nonce, and submission-error
//! classification.

use std::time::Duration;

/// Bounded exponential backoff with gas bumping for same-nonce replacement.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts before a job is dead-lettered.
    pub max_retries: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Gas price bump percentage per replacement attempt.
    pub gas_bump_percent: u32,
    /// Maximum gas price multiplier relative to the original.
    pub max_gas_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            gas_bump_percent: 20,
            max_gas_multiplier: 3.0,
        }
    }
}

impl RetryConfig {
    /// Backoff duration for a given attempt (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether another attempt is allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Gas price for a replacement attempt at the same nonce.
    pub fn gas_price_for_attempt(&self, base_gas_price: u128, attempt: u32) -> u128 {
        if attempt == 0 {
            return base_gas_price;
        }

        let multiplier = 1.0 + (self.gas_bump_percent as f64 / 100.0) * (attempt as f64);
        let capped_multiplier = multiplier.min(self.max_gas_multiplier);

        (base_gas_price as f64 * capped_multiplier) as u128
    }
}

/// Classification of a transaction submission error.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues) — retry as-is.
    Transient,
    /// Replacement underpriced — retry with bumped gas at the same nonce.
    Underpriced,
    /// Nonce already consumed on-chain — the transaction landed earlier.
    NonceTooLow,
    /// Permanent failure (reverted, invalid params) — do not retry.
    Permanent,
    /// Unknown error — retried with backoff like a transient one.
    Unknown,
}

/// Classify a submission error message for retry decisions.
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("nonce too low") || error_lower.contains("already known") {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
