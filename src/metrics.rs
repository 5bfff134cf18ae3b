//! Prometheus metrics for the indexer and bridge pipeline.
//!
//! Exposed on the admin server's /metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    // Block processing metrics
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "indexer_blocks_processed_total",
        "Total number of blocks processed",
        &["chain"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "indexer_latest_block",
        "Latest block number processed",
        &["chain"]
    ).unwrap();

    pub static ref BLOCK_RETRIES: CounterVec = register_counter_vec!(
        "indexer_block_retries_total",
        "Total number of block job retries",
        &["chain"]
    ).unwrap();

    pub static ref DEAD_BLOCKS: GaugeVec = register_gauge_vec!(
        "indexer_dead_blocks",
        "Number of dead-lettered block jobs awaiting operator action",
        &["chain"]
    ).unwrap();

    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "indexer_queue_depth",
        "Number of block jobs pending processing",
        &["chain"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_DECODED: CounterVec = register_counter_vec!(
        "indexer_events_decoded_total",
        "Total number of events decoded and applied",
        &["chain", "kind"]
    ).unwrap();

    pub static ref DECODE_SKIPS: CounterVec = register_counter_vec!(
        "indexer_decode_skips_total",
        "Logs skipped because their topic was unknown or undecodable",
        &["chain"]
    ).unwrap();

    // Bridge metrics
    pub static ref MINTS: CounterVec = register_counter_vec!(
        "indexer_mints_total",
        "Mint jobs by terminal outcome",
        &["outcome"]
    ).unwrap();

    pub static ref VERIFICATION_FAILURES: CounterVec = register_counter_vec!(
        "indexer_verification_failures_total",
        "Bridge deposits rejected by content verification",
        &["reason"]
    ).unwrap();

    pub static ref MINT_SUBMISSION_RETRIES: CounterVec = register_counter_vec!(
        "indexer_mint_submission_retries_total",
        "Mint transaction re-submissions at the same nonce",
        &["class"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "indexer_up",
        "Whether the indexer is up and running"
    ).unwrap();
}

/// Record a block processed.
pub fn record_block_processed(chain: &str, block_number: u64) {
    BLOCKS_PROCESSED.with_label_values(&[chain]).inc();
    LATEST_BLOCK
        .with_label_values(&[chain])
        .set(block_number as f64);
}

/// Record a decoded event being applied.
pub fn record_event(chain: &str, kind: &str) {
    EVENTS_DECODED.with_label_values(&[chain, kind]).inc();
}

/// Record a skipped log.
pub fn record_decode_skip(chain: &str) {
    DECODE_SKIPS.with_label_values(&[chain]).inc();
}

/// Record a block job retry.
pub fn record_block_retry(chain: &str) {
    BLOCK_RETRIES.with_label_values(&[chain]).inc();
}

/// Update the dead-letter gauge for a chain.
pub fn set_dead_blocks(chain: &str, count: usize) {
    DEAD_BLOCKS.with_label_values(&[chain]).set(count as f64);
}

/// Update the pending-jobs gauge for a chain.
pub fn set_queue_depth(chain: &str, count: usize) {
    QUEUE_DEPTH.with_label_values(&[chain]).set(count as f64);
}

/// Record a mint job reaching a terminal state.
pub fn record_mint_outcome(outcome: &str) {
    MINTS.with_label_values(&[outcome]).inc();
}

/// Record a verification rejection.
pub fn record_verification_failure(reason: &str) {
    VERIFICATION_FAILURES.with_label_values(&[reason]).inc();
}

/// Record a mint re-submission, labeled by error class.
pub fn record_mint_retry(class: &str) {
    MINT_SUBMISSION_RETRIES.with_label_values(&[class]).inc();
}
