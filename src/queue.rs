//! Ordered, resumable per-chain block queue.
//!
//! Blocks are processed strictly in ascending order, one at a time. A block
//! that keeps failing is dead-lettered and halts its chain's queue at that
//! height until an operator resolves it; later blocks stay pending so no
//! event is ever applied out of order.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

use crate::error::{IndexerError, Result};
use crate::metrics;
use crate::retry::RetryConfig;
use crate::types::{BlockJob, BlockStatus, Chain};

/// Processes one block's logs. Implemented by the processing service; tests
/// substitute scripted processors.
#[async_trait]
pub trait BlockProcessor: Send + Sync {
    /// `reindex` marks an operator-forced re-run of an already-seen block.
    async fn process_block(&self, chain: Chain, block_number: u64, reindex: bool) -> Result<()>;
}

#[derive(Default)]
struct QueueState {
    jobs: BTreeMap<u64, BlockJob>,
    paused: bool,
}

/// Point-in-time queue snapshot for the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub chain: Chain,
    pub paused: bool,
    pub pending: usize,
    pub done: usize,
    pub active: Option<u64>,
    pub dead_blocks: Vec<u64>,
}

pub struct BlockQueue {
    chain: Chain,
    retry: RetryConfig,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl BlockQueue {
    pub fn new(chain: Chain, retry: RetryConfig) -> Self {
        Self {
            chain,
            retry,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Add a block to the queue. Re-enqueuing a block that already has a job
    /// in any state is a no-op.
    pub async fn enqueue(&self, block_number: u64) {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&block_number) {
            return;
        }
        state.jobs.insert(
            block_number,
            BlockJob {
                chain: self.chain,
                block_number,
                status: BlockStatus::Pending,
                attempts: 0,
            },
        );
        self.update_gauges(&state);
        drop(state);
        self.notify.notify_one();
    }

    /// Stop handing out work. Jobs already mid-flight finish.
    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        state.paused = true;
        info!(chain = %self.chain, "Block queue paused");
    }

    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        state.paused = false;
        drop(state);
        info!(chain = %self.chain, "Block queue resumed");
        self.notify.notify_one();
    }

    /// Clear a dead-lettered block so the queue can move past it. Called by
    /// the admin API after a manual reindex of that block.
    pub async fn resolve(&self, block_number: u64) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&block_number) {
            if job.status == BlockStatus::Dead {
                info!(chain = %self.chain, block_number, "Dead block resolved");
            }
            job.status = BlockStatus::Done;
        }
        self.update_gauges(&state);
        drop(state);
        self.notify.notify_one();
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        let mut pending = 0;
        let mut done = 0;
        let mut active = None;
        let mut dead_blocks = Vec::new();
        for job in state.jobs.values() {
            match job.status {
                BlockStatus::Pending => pending += 1,
                BlockStatus::Done => done += 1,
                BlockStatus::Active | BlockStatus::Retrying => active = Some(job.block_number),
                BlockStatus::Dead => dead_blocks.push(job.block_number),
            }
        }
        QueueStatus {
            chain: self.chain,
            paused: state.paused,
            pending,
            done,
            active,
            dead_blocks,
        }
    }

    /// Claim the next runnable block. Returns `None` while paused, empty, or
    /// halted behind a dead block.
    async fn take_next(&self) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.paused {
            return None;
        }

        let mut claim = None;
        for job in state.jobs.values() {
            match job.status {
                BlockStatus::Done => continue,
                // The chain is halted at the dead block.
                BlockStatus::Dead => return None,
                BlockStatus::Pending => {
                    claim = Some(job.block_number);
                    break;
                }
                // A job is mid-flight; strict ordering forbids starting
                // another.
                BlockStatus::Active | BlockStatus::Retrying => return None,
            }
        }

        let block_number = claim?;
        if let Some(job) = state.jobs.get_mut(&block_number) {
            job.status = BlockStatus::Active;
        }
        self.update_gauges(&state);
        Some(block_number)
    }

    async fn mark(&self, block_number: u64, status: BlockStatus) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&block_number) {
            job.status = status;
        }
        self.update_gauges(&state);
    }

    /// Record a failed attempt on the job itself and return the running
    /// total. Keeping the count on the job means the retry budget survives
    /// the worker letting go of a claim (pause during backoff).
    async fn record_retry(&self, block_number: u64) -> u32 {
        let mut state = self.state.lock().await;
        let attempts = match state.jobs.get_mut(&block_number) {
            Some(job) => {
                job.status = BlockStatus::Retrying;
                job.attempts += 1;
                job.attempts
            }
            None => 0,
        };
        self.update_gauges(&state);
        attempts
    }

    /// Return a retrying claim to the pending set. A job the operator
    /// resolved while the backoff was in flight stays resolved.
    async fn release_retry(&self, block_number: u64) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&block_number) {
            if job.status == BlockStatus::Retrying {
                job.status = BlockStatus::Pending;
            }
        }
        self.update_gauges(&state);
    }

    fn update_gauges(&self, state: &QueueState) {
        let pending = state
            .jobs
            .values()
            .filter(|j| j.status == BlockStatus::Pending)
            .count();
        let dead = state
            .jobs
            .values()
            .filter(|j| j.status == BlockStatus::Dead)
            .count();
        metrics::set_queue_depth(self.chain.as_str(), pending);
        metrics::set_dead_blocks(self.chain.as_str(), dead);
    }

    /// Worker loop: claim blocks in order and process each with bounded
    /// retries. Runs until the task is cancelled.
    pub async fn run(self: Arc<Self>, processor: Arc<dyn BlockProcessor>) {
        loop {
            let Some(block_number) = self.take_next().await else {
                self.notify.notified().await;
                continue;
            };

            self.process_with_retries(&*processor, block_number).await;
        }
    }

    async fn process_with_retries(&self, processor: &dyn BlockProcessor, block_number: u64) {
        loop {
            match processor.process_block(self.chain, block_number, false).await {
                Ok(()) => {
                    self.mark(block_number, BlockStatus::Done).await;
                    return;
                }
                Err(e) => {
                    let attempts = self.record_retry(block_number).await;
                    // A corrupt RPC response can masquerade as a decode
                    // failure, so fatal decodes get the same bounded retries
                    // as transient errors before dead-lettering.
                    let retryable =
                        e.is_transient() || matches!(e, IndexerError::FatalDecode(_));
                    if !retryable || !self.retry.should_retry(attempts) {
                        error!(chain = %self.chain, block_number, attempts, error = %e,
                            "Block dead-lettered, halting chain queue");
                        self.mark(block_number, BlockStatus::Dead).await;
                        return;
                    }
                    warn!(chain = %self.chain, block_number, attempts, error = %e,
                        "Block processing failed, retrying");
                    metrics::record_block_retry(self.chain.as_str());
                    tokio::time::sleep(self.retry.backoff_for_attempt(attempts - 1)).await;
                    self.release_retry(block_number).await;
                    // Reclaim; a pause or an admin resolve may have happened
                    // during the backoff.
                    match self.take_next().await {
                        Some(block) if block == block_number => {}
                        Some(other) => {
                            // Never strand a block claimed by mistake.
                            self.mark(other, BlockStatus::Pending).await;
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    }
}
