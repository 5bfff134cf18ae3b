//! In-memory store used by the test suite and local development.

use std::collections::{HashMap, HashSet};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{IndexerError, Result};
use crate::store::Store;
use crate::types::{Bid, Chain, EventRecord, InscriptionRecord, Listing, MintJob};

#[derive(Default)]
struct Inner {
    inscriptions: HashMap<B256, InscriptionRecord>,
    listings: HashMap<B256, Listing>,
    bids: HashMap<B256, Bid>,
    users: HashSet<Address>,
    points: HashMap<Address, U256>,
    points_seen: HashSet<(B256, u64)>,
    events: HashMap<(B256, u64), EventRecord>,
    mint_jobs: HashMap<B256, MintJob>,
    cursors: HashMap<Chain, u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_inscription(&self, hash_id: B256) -> Result<Option<InscriptionRecord>> {
        Ok(self.inner.read().await.inscriptions.get(&hash_id).cloned())
    }

    async fn upsert_inscription(&self, record: &InscriptionRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .inscriptions
            .insert(record.hash_id, record.clone());
        Ok(())
    }

    async fn set_owner(&self, hash_id: B256, owner: Address, prev_owner: Address) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner.inscriptions.get_mut(&hash_id).ok_or_else(|| {
            IndexerError::Transient(format!("unknown inscription {hash_id} in set_owner"))
        })?;
        record.owner = owner;
        record.prev_owner = Some(prev_owner);
        Ok(())
    }

    async fn set_locked(&self, hash_id: B256, locked: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.inscriptions.get_mut(&hash_id) {
            record.locked = locked;
        }
        Ok(())
    }

    async fn get_listing(&self, hash_id: B256) -> Result<Option<Listing>> {
        Ok(self.inner.read().await.listings.get(&hash_id).cloned())
    }

    async fn upsert_listing(&self, listing: &Listing) -> Result<()> {
        self.inner
            .write()
            .await
            .listings
            .insert(listing.hash_id, listing.clone());
        Ok(())
    }

    async fn remove_listing(&self, hash_id: B256) -> Result<()> {
        self.inner.write().await.listings.remove(&hash_id);
        Ok(())
    }

    async fn get_bid(&self, hash_id: B256) -> Result<Option<Bid>> {
        Ok(self.inner.read().await.bids.get(&hash_id).cloned())
    }

    async fn upsert_bid(&self, bid: &Bid) -> Result<()> {
        self.inner.write().await.bids.insert(bid.hash_id, bid.clone());
        Ok(())
    }

    async fn remove_bid(&self, hash_id: B256) -> Result<()> {
        self.inner.write().await.bids.remove(&hash_id);
        Ok(())
    }

    async fn upsert_user(&self, address: Address) -> Result<()> {
        self.inner.write().await.users.insert(address);
        Ok(())
    }

    async fn add_points(
        &self,
        address: Address,
        amount: U256,
        tx_hash: B256,
        log_index: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.points_seen.insert((tx_hash, log_index)) {
            return Ok(());
        }
        let balance = inner.points.entry(address).or_default();
        *balance += amount;
        Ok(())
    }

    async fn points_balance(&self, address: Address) -> Result<U256> {
        Ok(self
            .inner
            .read()
            .await
            .points
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn record_event(&self, event: &EventRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .events
            .insert((event.tx_hash, event.log_index), event.clone());
        Ok(())
    }

    async fn get_event(&self, tx_hash: B256, log_index: u64) -> Result<Option<EventRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .get(&(tx_hash, log_index))
            .cloned())
    }

    async fn get_mint_job(&self, hash_id: B256) -> Result<Option<MintJob>> {
        Ok(self.inner.read().await.mint_jobs.get(&hash_id).cloned())
    }

    async fn put_mint_job(&self, job: &MintJob) -> Result<()> {
        self.inner
            .write()
            .await
            .mint_jobs
            .insert(job.hash_id, job.clone());
        Ok(())
    }

    async fn last_processed_block(&self, chain: Chain) -> Result<Option<u64>> {
        Ok(self.inner.read().await.cursors.get(&chain).copied())
    }

    async fn set_last_processed_block(&self, chain: Chain, block_number: u64) -> Result<()> {
        self.inner.write().await.cursors.insert(chain, block_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn points_are_idempotent_per_log() {
        let store = MemoryStore::new();
        let user = Address::repeat_byte(0x01);
        let tx = B256::repeat_byte(0x02);

        store
            .add_points(user, U256::from(10), tx, 0)
            .await
            .unwrap();
        store
            .add_points(user, U256::from(10), tx, 0)
            .await
            .unwrap();
        store
            .add_points(user, U256::from(5), tx, 1)
            .await
            .unwrap();

        assert_eq!(store.points_balance(user).await.unwrap(), U256::from(15));
    }

    #[tokio::test]
    async fn cursor_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.last_processed_block(Chain::L1).await.unwrap(), None);
        store.set_last_processed_block(Chain::L1, 42).await.unwrap();
        assert_eq!(
            store.last_processed_block(Chain::L1).await.unwrap(),
            Some(42)
        );
        assert_eq!(store.last_processed_block(Chain::L2).await.unwrap(), None);
    }
}
