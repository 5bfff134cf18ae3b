//! Persistent store port.
//!
//! The pipeline treats persistence as an opaque keyed read/write collaborator.
//! Every write is an upsert that is safe to repeat, which is what makes block
//! re-processing idempotent. The production implementation is Postgres via
//! sqlx; the in-memory implementation backs tests and local development.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Bid, Chain, EventRecord, InscriptionRecord, Listing, MintJob};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait Store: Send + Sync {
    // Inscriptions
    async fn get_inscription(&self, hash_id: B256) -> Result<Option<InscriptionRecord>>;
    async fn upsert_inscription(&self, record: &InscriptionRecord) -> Result<()>;
    async fn set_owner(&self, hash_id: B256, owner: Address, prev_owner: Address) -> Result<()>;
    async fn set_locked(&self, hash_id: B256, locked: bool) -> Result<()>;

    // Marketplace
    async fn get_listing(&self, hash_id: B256) -> Result<Option<Listing>>;
    async fn upsert_listing(&self, listing: &Listing) -> Result<()>;
    async fn remove_listing(&self, hash_id: B256) -> Result<()>;
    async fn get_bid(&self, hash_id: B256) -> Result<Option<Bid>>;
    async fn upsert_bid(&self, bid: &Bid) -> Result<()>;
    async fn remove_bid(&self, hash_id: B256) -> Result<()>;

    // Users and points
    async fn upsert_user(&self, address: Address) -> Result<()>;
    /// Credit points, keyed by the emitting (tx_hash, log_index) so a
    /// re-processed block never double-credits.
    async fn add_points(
        &self,
        address: Address,
        amount: U256,
        tx_hash: B256,
        log_index: u64,
    ) -> Result<()>;
    async fn points_balance(&self, address: Address) -> Result<U256>;

    // Event feed
    async fn record_event(&self, event: &EventRecord) -> Result<()>;
    async fn get_event(&self, tx_hash: B256, log_index: u64) -> Result<Option<EventRecord>>;

    // Mint jobs
    async fn get_mint_job(&self, hash_id: B256) -> Result<Option<MintJob>>;
    async fn put_mint_job(&self, job: &MintJob) -> Result<()>;

    // Per-chain cursor
    async fn last_processed_block(&self, chain: Chain) -> Result<Option<u64>>;
    async fn set_last_processed_block(&self, chain: Chain, block_number: u64) -> Result<()>;
}
