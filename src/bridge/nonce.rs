//! Nonce serialization for the minter account.
//!
//! All mint submissions share one signing account, so nonce allocation is a
//! critical section: each allocation hands out the next sequence value and
//! records it as in-flight. A nonce can be returned to the pool only while it
//! is the highest allocated one and nothing was ever broadcast with it;
//! anything else would either skip a value (stalling every later
//! transaction) or double-spend one.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chain::ChainClient;
use crate::error::{IndexerError, Result};

struct NonceState {
    /// On-chain transaction count at initialization; everything below this is
    /// confirmed.
    confirmed: u64,
    /// Next nonce to hand out.
    next: u64,
    /// Allocated but unconfirmed nonces, mapped to whether a transaction was
    /// ever broadcast with them.
    in_flight: BTreeMap<u64, bool>,
}

/// Serialized nonce allocator for the minter account.
pub struct NonceManager {
    client: Arc<dyn ChainClient>,
    signer: Address,
    /// Lazily initialized from the chain on first allocation.
    state: Mutex<Option<NonceState>>,
}

impl NonceManager {
    pub fn new(client: Arc<dyn ChainClient>, signer: Address) -> Self {
        Self {
            client,
            signer,
            state: Mutex::new(None),
        }
    }

    /// Allocate the next nonce. The first call fetches the confirmed
    /// transaction count from the chain as the baseline.
    pub async fn allocate(&self) -> Result<u64> {
        let mut guard = self.state.lock().await;

        if guard.is_none() {
            let confirmed = self.client.transaction_count(self.signer).await?;
            debug!(signer = %self.signer, confirmed, "Nonce baseline initialized");
            *guard = Some(NonceState {
                confirmed,
                next: confirmed,
                in_flight: BTreeMap::new(),
            });
        }

        let state = guard.as_mut().ok_or_else(|| {
            IndexerError::NonceConflict("nonce state missing after initialization".to_string())
        })?;

        let nonce = state.next;
        state.next += 1;
        state.in_flight.insert(nonce, false);
        debug!(nonce, "Nonce allocated");
        Ok(nonce)
    }

    /// Record that a transaction carrying this nonce reached the network.
    /// After this the nonce can never be released, only confirmed.
    pub async fn mark_broadcast(&self, nonce: u64) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| IndexerError::NonceConflict("nonce state not initialized".to_string()))?;

        match state.in_flight.get_mut(&nonce) {
            Some(broadcast) => {
                *broadcast = true;
                Ok(())
            }
            None => Err(IndexerError::NonceConflict(format!(
                "nonce {nonce} is not in flight"
            ))),
        }
    }

    /// Return a never-broadcast nonce to the pool. Only the highest allocated
    /// nonce is releasable; releasing anything lower would leave a gap in the
    /// sequence.
    pub async fn release(&self, nonce: u64) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| IndexerError::NonceConflict("nonce state not initialized".to_string()))?;

        match state.in_flight.get(&nonce) {
            None => {
                return Err(IndexerError::NonceConflict(format!(
                    "nonce {nonce} is not in flight"
                )))
            }
            Some(true) => {
                return Err(IndexerError::NonceConflict(format!(
                    "nonce {nonce} was broadcast and cannot be released"
                )))
            }
            Some(false) => {}
        }

        if nonce + 1 != state.next {
            return Err(IndexerError::NonceConflict(format!(
                "nonce {nonce} is not the highest allocated ({})",
                state.next - 1
            )));
        }

        state.in_flight.remove(&nonce);
        state.next = nonce;
        debug!(nonce, "Nonce released");
        Ok(())
    }

    /// Mark a nonce as consumed on-chain. A mined transaction consumes its
    /// nonce whether it succeeded or reverted.
    pub async fn confirm(&self, nonce: u64) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| IndexerError::NonceConflict("nonce state not initialized".to_string()))?;

        if state.in_flight.remove(&nonce).is_none() {
            return Err(IndexerError::NonceConflict(format!(
                "nonce {nonce} is not in flight"
            )));
        }
        if nonce >= state.confirmed {
            state.confirmed = nonce + 1;
        }
        debug!(nonce, confirmed = state.confirmed, "Nonce confirmed");
        Ok(())
    }

    /// Number of allocated, unconfirmed nonces.
    pub async fn in_flight(&self) -> usize {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|state| state.in_flight.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MintRequest;
    use crate::types::{Chain, RawLog};
    use alloy::primitives::B256;
    use async_trait::async_trait;

    struct FixedCountClient(u64);

    #[async_trait]
    impl ChainClient for FixedCountClient {
        fn chain(&self) -> Chain {
            Chain::L2
        }
        async fn latest_block_number(&self) -> Result<u64> {
            Ok(0)
        }
        async fn logs_for_block(&self, _block_number: u64) -> Result<Vec<RawLog>> {
            Ok(vec![])
        }
        async fn transaction_count(&self, _address: Address) -> Result<u64> {
            Ok(self.0)
        }
        async fn gas_price(&self) -> Result<u128> {
            Ok(1_000_000_000)
        }
        async fn transaction_input(&self, _tx_hash: B256) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn submit_mint(&self, _request: &MintRequest) -> Result<B256> {
            Ok(B256::ZERO)
        }
        async fn receipt_status(&self, _tx_hash: B256) -> Result<Option<bool>> {
            Ok(None)
        }
    }

    fn manager(baseline: u64) -> NonceManager {
        NonceManager::new(Arc::new(FixedCountClient(baseline)), Address::ZERO)
    }

    #[tokio::test]
    async fn allocations_are_sequential_from_baseline() {
        let nonces = manager(7);
        assert_eq!(nonces.allocate().await.unwrap(), 7);
        assert_eq!(nonces.allocate().await.unwrap(), 8);
        assert_eq!(nonces.allocate().await.unwrap(), 9);
        assert_eq!(nonces.in_flight().await, 3);
    }

    #[tokio::test]
    async fn concurrent_allocations_are_distinct_and_gap_free() {
        let nonces = Arc::new(manager(0));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let nonces = Arc::clone(&nonces);
            handles.push(tokio::spawn(async move { nonces.allocate().await }));
        }

        let mut allocated = Vec::new();
        for handle in handles {
            allocated.push(handle.await.unwrap().unwrap());
        }
        allocated.sort_unstable();
        assert_eq!(allocated, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn only_highest_unbroadcast_nonce_is_releasable() {
        let nonces = manager(0);
        let a = nonces.allocate().await.unwrap();
        let b = nonces.allocate().await.unwrap();

        // Releasing the lower one would leave a gap.
        match nonces.release(a).await {
            Err(IndexerError::NonceConflict(_)) => {}
            other => panic!("expected NonceConflict, got {other:?}"),
        }

        nonces.release(b).await.unwrap();
        // The released value is handed out again.
        assert_eq!(nonces.allocate().await.unwrap(), b);
    }

    #[tokio::test]
    async fn broadcast_nonce_cannot_be_released() {
        let nonces = manager(0);
        let nonce = nonces.allocate().await.unwrap();
        nonces.mark_broadcast(nonce).await.unwrap();

        match nonces.release(nonce).await {
            Err(IndexerError::NonceConflict(_)) => {}
            other => panic!("expected NonceConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirm_clears_in_flight() {
        let nonces = manager(3);
        let nonce = nonces.allocate().await.unwrap();
        nonces.mark_broadcast(nonce).await.unwrap();
        nonces.confirm(nonce).await.unwrap();
        assert_eq!(nonces.in_flight().await, 0);
        // Sequence continues after the confirmed value.
        assert_eq!(nonces.allocate().await.unwrap(), 4);
    }
}
