//! Block processing: fetch, decode, apply.
//!
//! One block at a time, events applied in log-index order. Every store write
//! is an upsert keyed by (tx_hash, log_index) or by hash_id, so re-processing
//! a block (crash recovery, admin reindex) converges to the same state.

use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bridge::content::decode_content;
use crate::bridge::{MintService, ProvenanceLookup};
use crate::chain::ChainClient;
use crate::error::Result;
use crate::events::{decode_log, ContractSet};
use crate::metrics;
use crate::queue::{BlockProcessor, BlockQueue};
use crate::store::Store;
use crate::types::{
    Bid, BridgeDeposit, Chain, DecodedEvent, EventKind, EventRecord, InscriptionRecord, Listing,
    MintJob,
};

/// Consumes observed bridge deposits. Implemented by the mint service.
#[async_trait]
pub trait DepositHandler: Send + Sync {
    async fn handle_deposit(&self, deposit: &BridgeDeposit) -> Result<MintJob>;
}

#[async_trait]
impl<P: ProvenanceLookup> DepositHandler for MintService<P> {
    async fn handle_deposit(&self, deposit: &BridgeDeposit) -> Result<MintJob> {
        MintService::handle_deposit(self, deposit).await
    }
}

pub struct ProcessingService {
    store: Arc<dyn Store>,
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    contracts: ContractSet,
    deposits: Arc<dyn DepositHandler>,
}

impl ProcessingService {
    pub fn new(
        store: Arc<dyn Store>,
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        contracts: ContractSet,
        deposits: Arc<dyn DepositHandler>,
    ) -> Self {
        Self {
            store,
            l1,
            l2,
            contracts,
            deposits,
        }
    }

    fn client(&self, chain: Chain) -> &Arc<dyn ChainClient> {
        match chain {
            Chain::L1 => &self.l1,
            Chain::L2 => &self.l2,
        }
    }

    async fn apply_event(&self, event: &DecodedEvent) -> Result<()> {
        match &event.kind {
            EventKind::Transfer { hash_id, from, to } => {
                self.store.upsert_user(*to).await?;
                if *from == Address::ZERO {
                    self.create_inscription(event, *hash_id, *to).await?;
                } else if self.store.get_inscription(*hash_id).await?.is_some() {
                    self.store.set_owner(*hash_id, *to, *from).await?;
                } else {
                    warn!(chain = %event.chain, %hash_id,
                        "Transfer for unknown inscription, skipping ownership update");
                }
            }
            EventKind::Sale { hash_id, .. } => {
                // Ownership moves via the Transfer emitted in the same
                // transaction; the sale clears the listing.
                self.store.remove_listing(*hash_id).await?;
            }
            EventKind::Listing {
                hash_id,
                seller,
                min_value,
                to_address,
                listed,
            } => {
                if *listed {
                    self.store
                        .upsert_listing(&Listing {
                            hash_id: *hash_id,
                            seller: *seller,
                            min_value: *min_value,
                            to_address: *to_address,
                            tx_hash: event.tx_hash,
                        })
                        .await?;
                } else {
                    self.store.remove_listing(*hash_id).await?;
                }
            }
            EventKind::Bid {
                hash_id,
                bidder,
                value,
                entered,
            } => {
                if *entered {
                    self.store.upsert_user(*bidder).await?;
                    self.store
                        .upsert_bid(&Bid {
                            hash_id: *hash_id,
                            bidder: *bidder,
                            value: *value,
                            tx_hash: event.tx_hash,
                        })
                        .await?;
                } else {
                    self.store.remove_bid(*hash_id).await?;
                }
            }
            EventKind::BridgeDeposit(deposit) => {
                self.store.set_locked(deposit.hash_id, true).await?;
                let job = self.deposits.handle_deposit(deposit).await?;
                debug!(hash_id = %deposit.hash_id, status = job.status.as_str(),
                    "Deposit handled");
            }
            EventKind::BridgeWithdraw { hash_id, owner } => {
                // Burn on L2 releases the L1 lock.
                self.store.set_locked(*hash_id, false).await?;
                if self.store.get_inscription(*hash_id).await?.is_some() {
                    self.store.set_owner(*hash_id, *owner, *owner).await?;
                }
            }
            EventKind::Points { address, amount } => {
                self.store.upsert_user(*address).await?;
                self.store
                    .add_points(*address, *amount, event.tx_hash, event.log_index)
                    .await?;
            }
        }

        self.store.record_event(&to_record(event)).await?;
        metrics::record_event(event.chain.as_str(), event.kind.label());
        Ok(())
    }

    /// First transfer from the zero address creates the inscription record,
    /// with the content hash recomputed from the origin calldata.
    async fn create_inscription(
        &self,
        event: &DecodedEvent,
        hash_id: alloy::primitives::B256,
        to: Address,
    ) -> Result<()> {
        if self.store.get_inscription(hash_id).await?.is_some() {
            return Ok(());
        }

        let Some(input) = self.client(event.chain).transaction_input(hash_id).await? else {
            warn!(chain = %event.chain, %hash_id,
                "Creation transfer with no origin transaction, skipping");
            return Ok(());
        };

        let sha = match decode_content(&input) {
            Ok(content) => content.sha,
            Err(reason) => {
                warn!(chain = %event.chain, %hash_id, reason,
                    "Creation calldata is not inscribable content, skipping");
                return Ok(());
            }
        };

        self.store
            .upsert_inscription(&InscriptionRecord {
                hash_id,
                sha,
                creator: to,
                owner: to,
                prev_owner: None,
                locked: false,
            })
            .await?;
        debug!(chain = %event.chain, %hash_id, owner = %to, "Inscription created");
        Ok(())
    }
}

fn to_record(event: &DecodedEvent) -> EventRecord {
    let (hash_id, from, to, value) = match &event.kind {
        EventKind::Transfer { hash_id, from, to } => {
            (Some(*hash_id), Some(*from), Some(*to), None)
        }
        EventKind::Sale {
            hash_id,
            from,
            to,
            value,
        } => (Some(*hash_id), Some(*from), Some(*to), Some(*value)),
        EventKind::Listing {
            hash_id,
            seller,
            min_value,
            to_address,
            ..
        } => (Some(*hash_id), Some(*seller), *to_address, Some(*min_value)),
        EventKind::Bid {
            hash_id,
            bidder,
            value,
            ..
        } => (Some(*hash_id), Some(*bidder), None, Some(*value)),
        EventKind::BridgeDeposit(deposit) => (
            Some(deposit.hash_id),
            Some(deposit.origin_owner),
            None,
            None,
        ),
        EventKind::BridgeWithdraw { hash_id, owner } => {
            (Some(*hash_id), Some(*owner), None, None)
        }
        EventKind::Points { address, amount } => (None, Some(*address), None, Some(*amount)),
    };

    EventRecord {
        chain: event.chain,
        block_number: event.block_number,
        tx_hash: event.tx_hash,
        log_index: event.log_index,
        kind: event.kind.label().to_string(),
        hash_id,
        from,
        to,
        value,
    }
}

#[async_trait]
impl BlockProcessor for ProcessingService {
    async fn process_block(&self, chain: Chain, block_number: u64, reindex: bool) -> Result<()> {
        let logs = self.client(chain).logs_for_block(block_number).await?;

        let mut events = Vec::new();
        for log in &logs {
            match decode_log(&self.contracts, chain, log)? {
                Some(event) => events.push(event),
                None => metrics::record_decode_skip(chain.as_str()),
            }
        }
        events.sort_by_key(|event| event.log_index);

        for event in &events {
            self.apply_event(event).await?;
        }

        // The cursor only ever moves forward; a reindex of an old block must
        // not rewind the follower.
        let cursor = self.store.last_processed_block(chain).await?;
        if cursor.map_or(true, |last| block_number > last) {
            self.store
                .set_last_processed_block(chain, block_number)
                .await?;
        }

        metrics::record_block_processed(chain.as_str(), block_number);
        info!(chain = %chain, block_number, events = events.len(), reindex, "Block processed");
        Ok(())
    }
}

/// Follower loop: poll the chain head and enqueue every block after the
/// cursor. Runs until the task is cancelled.
pub async fn run_follower(
    queue: Arc<BlockQueue>,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    poll_interval: std::time::Duration,
) {
    let chain = queue.chain();
    loop {
        match follow_once(&queue, &client, &store, chain).await {
            Ok(enqueued) if enqueued > 0 => {
                debug!(chain = %chain, enqueued, "Enqueued new blocks");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(chain = %chain, error = %e, "Follower poll failed");
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn follow_once(
    queue: &BlockQueue,
    client: &Arc<dyn ChainClient>,
    store: &Arc<dyn Store>,
    chain: Chain,
) -> Result<usize> {
    let latest = client.latest_block_number().await?;
    let next = match store.last_processed_block(chain).await? {
        Some(cursor) => cursor + 1,
        // First run: start at the head rather than replaying history.
        None => latest,
    };

    let mut enqueued = 0;
    for block_number in next..=latest {
        queue.enqueue(block_number).await;
        enqueued += 1;
    }
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::content::compute_sha;
    use crate::chain::MintRequest;
    use crate::error::IndexerError;
    use crate::events;
    use crate::store::MemoryStore;
    use crate::types::{MintStatus, RawLog};
    use alloy::primitives::{B256, U256};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MockChain {
        chain: Chain,
        logs: HashMap<u64, Vec<RawLog>>,
        inputs: HashMap<B256, Vec<u8>>,
    }

    #[async_trait]
    impl ChainClient for MockChain {
        fn chain(&self) -> Chain {
            self.chain
        }
        async fn latest_block_number(&self) -> Result<u64> {
            Ok(self.logs.keys().max().copied().unwrap_or(0))
        }
        async fn logs_for_block(&self, block_number: u64) -> Result<Vec<RawLog>> {
            Ok(self.logs.get(&block_number).cloned().unwrap_or_default())
        }
        async fn transaction_count(&self, _address: Address) -> Result<u64> {
            Ok(0)
        }
        async fn gas_price(&self) -> Result<u128> {
            Ok(1_000_000_000)
        }
        async fn transaction_input(&self, tx_hash: B256) -> Result<Option<Vec<u8>>> {
            Ok(self.inputs.get(&tx_hash).cloned())
        }
        async fn submit_mint(&self, _request: &MintRequest) -> Result<B256> {
            Err(IndexerError::Permanent("no signer".to_string()))
        }
        async fn receipt_status(&self, _tx_hash: B256) -> Result<Option<bool>> {
            Ok(None)
        }
    }

    struct RecordingDeposits {
        seen: StdMutex<Vec<BridgeDeposit>>,
    }

    #[async_trait]
    impl DepositHandler for RecordingDeposits {
        async fn handle_deposit(&self, deposit: &BridgeDeposit) -> Result<MintJob> {
            self.seen.lock().unwrap().push(deposit.clone());
            let mut job = MintJob::new(deposit.hash_id);
            job.status = MintStatus::Confirmed;
            Ok(job)
        }
    }

    fn test_contracts() -> ContractSet {
        ContractSet {
            market_l1: Address::repeat_byte(0x11),
            bridge_l1: Address::repeat_byte(0x22),
            points_l1: Address::repeat_byte(0x33),
            market_l2: Address::repeat_byte(0x44),
            bridge_l2: Address::repeat_byte(0x55),
        }
    }

    fn address_topic(address: Address) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[12..32].copy_from_slice(address.as_slice());
        B256::from(bytes)
    }

    fn transfer_log(
        contracts: &ContractSet,
        block: u64,
        log_index: u64,
        hash_id: B256,
        from: Address,
        to: Address,
    ) -> RawLog {
        RawLog {
            address: contracts.market_l1,
            topics: vec![
                *events::TOKEN_TRANSFERRED,
                hash_id,
                address_topic(from),
                address_topic(to),
            ],
            data: vec![],
            block_number: block,
            tx_hash: hash_id,
            log_index,
        }
    }

    struct Fixture {
        service: ProcessingService,
        store: Arc<MemoryStore>,
        deposits: Arc<RecordingDeposits>,
    }

    fn fixture(l1_logs: HashMap<u64, Vec<RawLog>>, inputs: HashMap<B256, Vec<u8>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let deposits = Arc::new(RecordingDeposits {
            seen: StdMutex::new(vec![]),
        });
        let l1 = Arc::new(MockChain {
            chain: Chain::L1,
            logs: l1_logs,
            inputs,
        });
        let l2 = Arc::new(MockChain {
            chain: Chain::L2,
            logs: HashMap::new(),
            inputs: HashMap::new(),
        });
        let service = ProcessingService::new(
            Arc::clone(&store) as Arc<dyn Store>,
            l1,
            l2,
            test_contracts(),
            Arc::clone(&deposits) as Arc<dyn DepositHandler>,
        );
        Fixture {
            service,
            store,
            deposits,
        }
    }

    #[tokio::test]
    async fn creation_transfer_builds_the_inscription_record() {
        let contracts = test_contracts();
        let uri = "data:,first";
        let hash_id = B256::repeat_byte(0x01);
        let owner = Address::repeat_byte(0xa1);

        let logs = HashMap::from([(
            10u64,
            vec![transfer_log(&contracts, 10, 0, hash_id, Address::ZERO, owner)],
        )]);
        let inputs = HashMap::from([(hash_id, uri.as_bytes().to_vec())]);
        let f = fixture(logs, inputs);

        f.service.process_block(Chain::L1, 10, false).await.unwrap();

        let record = f.store.get_inscription(hash_id).await.unwrap().unwrap();
        assert_eq!(record.creator, owner);
        assert_eq!(record.owner, owner);
        assert_eq!(record.sha, compute_sha(uri.as_bytes()));
        assert!(!record.locked);
    }

    #[tokio::test]
    async fn events_apply_in_log_index_order() {
        let contracts = test_contracts();
        let uri = "data:,ordered";
        let hash_id = B256::repeat_byte(0x02);
        let a = Address::repeat_byte(0xa1);
        let b = Address::repeat_byte(0xb2);

        // Creation at index 0, transfer away at index 1, delivered reversed.
        let logs = HashMap::from([(
            20u64,
            vec![
                transfer_log(&contracts, 20, 1, hash_id, a, b),
                transfer_log(&contracts, 20, 0, hash_id, Address::ZERO, a),
            ],
        )]);
        let inputs = HashMap::from([(hash_id, uri.as_bytes().to_vec())]);
        let f = fixture(logs, inputs);

        f.service.process_block(Chain::L1, 20, false).await.unwrap();

        let record = f.store.get_inscription(hash_id).await.unwrap().unwrap();
        assert_eq!(record.owner, b);
        assert_eq!(record.prev_owner, Some(a));
    }

    #[tokio::test]
    async fn reprocessing_a_block_is_idempotent() {
        let contracts = test_contracts();
        let hash_id = B256::repeat_byte(0x03);
        let user = Address::repeat_byte(0xc3);

        let points_log = RawLog {
            address: contracts.points_l1,
            topics: vec![*events::POINTS_ADDED, address_topic(user)],
            data: U256::from(25u64).to_be_bytes::<32>().to_vec(),
            block_number: 30,
            tx_hash: hash_id,
            log_index: 0,
        };
        let logs = HashMap::from([(30u64, vec![points_log])]);
        let f = fixture(logs, HashMap::new());

        f.service.process_block(Chain::L1, 30, false).await.unwrap();
        f.service.process_block(Chain::L1, 30, true).await.unwrap();

        assert_eq!(
            f.store.points_balance(user).await.unwrap(),
            U256::from(25u64)
        );
    }

    #[tokio::test]
    async fn deposit_routes_to_the_handler_and_locks_the_record() {
        let contracts = test_contracts();
        let uri = "data:,locked";
        let hash_id = B256::repeat_byte(0x04);
        let owner = Address::repeat_byte(0xd4);
        let sha = compute_sha(uri.as_bytes());

        let creation = transfer_log(&contracts, 40, 0, hash_id, Address::ZERO, owner);
        let lock = RawLog {
            address: contracts.bridge_l1,
            topics: vec![*events::TOKEN_LOCKED, hash_id, address_topic(owner)],
            data: sha.to_vec(),
            block_number: 40,
            tx_hash: B256::repeat_byte(0x40),
            log_index: 1,
        };
        let logs = HashMap::from([(40u64, vec![creation, lock])]);
        let inputs = HashMap::from([(hash_id, uri.as_bytes().to_vec())]);
        let f = fixture(logs, inputs);

        f.service.process_block(Chain::L1, 40, false).await.unwrap();

        let seen = f.deposits.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].hash_id, hash_id);
        assert_eq!(seen[0].sha, sha);
        drop(seen);

        let record = f.store.get_inscription(hash_id).await.unwrap().unwrap();
        assert!(record.locked);
    }

    #[tokio::test]
    async fn cursor_never_rewinds() {
        let f = fixture(HashMap::new(), HashMap::new());

        f.service.process_block(Chain::L1, 50, false).await.unwrap();
        assert_eq!(
            f.store.last_processed_block(Chain::L1).await.unwrap(),
            Some(50)
        );

        // Reindex of an older block leaves the cursor alone.
        f.service.process_block(Chain::L1, 10, true).await.unwrap();
        assert_eq!(
            f.store.last_processed_block(Chain::L1).await.unwrap(),
            Some(50)
        );
    }

    #[tokio::test]
    async fn malformed_known_event_fails_the_block() {
        let contracts = test_contracts();
        let bad = RawLog {
            address: contracts.bridge_l1,
            topics: vec![
                *events::TOKEN_LOCKED,
                B256::repeat_byte(0x05),
                address_topic(Address::repeat_byte(0xe5)),
            ],
            data: vec![0u8; 8],
            block_number: 60,
            tx_hash: B256::repeat_byte(0x60),
            log_index: 0,
        };
        let logs = HashMap::from([(60u64, vec![bad])]);
        let f = fixture(logs, HashMap::new());

        match f.service.process_block(Chain::L1, 60, false).await {
            Err(IndexerError::FatalDecode(_)) => {}
            other => panic!("expected FatalDecode, got {other:?}"),
        }
        // The cursor did not advance past the failed block.
        assert_eq!(f.store.last_processed_block(Chain::L1).await.unwrap(), None);
    }
}
