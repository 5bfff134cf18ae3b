//! Two-chain block indexer and lock-and-mint bridge for inscribed tokens.
//!
//! The pipeline per chain: a follower polls the head and enqueues blocks, an
//! ordered queue hands them to the processing service one at a time, and the
//! processing service decodes contract logs into domain events and applies
//! them to the store. Bridge deposits observed on L1 additionally run through
//! the mint service, which verifies the locked content and submits the
//! wrapped-token mint on L2 under a serialized nonce.

pub mod api;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod processing;
pub mod queue;
pub mod retry;
pub mod store;
pub mod types;

pub use error::{IndexerError, Result};
