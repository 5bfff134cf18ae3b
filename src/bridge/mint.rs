//! Mint orchestration for bridge deposits.
//!
//! Drives one deposit through verify, nonce allocation and submission, with
//! every stage checkpointed as a [`MintJob`] in the store. The job record is
//! what makes the pipeline idempotent: a re-processed block finds the
//! existing job and leaves it alone.
//!
//! Resumability rule: `Verifying` and `Noncing` jobs predate any broadcast
//! and are safe to restart from the top. `Submitted` and the terminal states
//! are returned as-is; re-running them could double-mint.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::content::{BoundedContentCache, DecodedContent};
use crate::bridge::nonce::NonceManager;
use crate::bridge::verify::{ProvenanceLookup, Verdict, Verifier};
use crate::chain::{ChainClient, MintRequest};
use crate::error::Result;
use crate::metrics;
use crate::retry::{classify_error, ErrorClass, RetryConfig};
use crate::store::Store;
use crate::types::{BridgeDeposit, MintJob, MintStatus};

const CONTENT_CACHE_CAPACITY: usize = 256;

fn class_label(class: &ErrorClass) -> &'static str {
    match class {
        ErrorClass::Transient => "transient",
        ErrorClass::Underpriced => "underpriced",
        ErrorClass::NonceTooLow => "nonce-too-low",
        ErrorClass::Permanent => "permanent",
        ErrorClass::Unknown => "unknown",
    }
}

/// Outcome of the verification stage.
enum Verified {
    Content(DecodedContent),
    Rejected(String),
}

pub struct MintService<P> {
    store: Arc<dyn Store>,
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    verifier: Verifier<P>,
    nonces: Arc<NonceManager>,
    retry: RetryConfig,
    content_cache: Mutex<BoundedContentCache>,
}

impl<P: ProvenanceLookup> MintService<P> {
    pub fn new(
        store: Arc<dyn Store>,
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        verifier: Verifier<P>,
        nonces: Arc<NonceManager>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            l1,
            l2,
            verifier,
            nonces,
            retry,
            content_cache: Mutex::new(BoundedContentCache::new(CONTENT_CACHE_CAPACITY)),
        }
    }

    /// Handle one observed deposit. Returns the job in whatever state it
    /// reached; transient infrastructure failures propagate as errors so the
    /// enclosing block job retries.
    pub async fn handle_deposit(&self, deposit: &BridgeDeposit) -> Result<MintJob> {
        if let Some(existing) = self.store.get_mint_job(deposit.hash_id).await? {
            match existing.status {
                // Pre-broadcast stages left behind by a crash; restart them.
                MintStatus::Verifying | MintStatus::Noncing => {
                    debug!(hash_id = %deposit.hash_id, status = existing.status.as_str(),
                        "Resuming stale mint job");
                }
                _ => {
                    debug!(hash_id = %deposit.hash_id, status = existing.status.as_str(),
                        "Mint job already exists, skipping");
                    return Ok(existing);
                }
            }
        }

        let mut job = MintJob::new(deposit.hash_id);
        self.store.put_mint_job(&job).await?;

        let content = match self.verify_deposit(deposit).await? {
            Verified::Content(content) => content,
            Verified::Rejected(reason) => {
                warn!(hash_id = %deposit.hash_id, reason, "Deposit rejected by verification");
                let label = if reason.contains("provenance") {
                    "provenance"
                } else {
                    "content"
                };
                metrics::record_verification_failure(label);
                return self.fail_job(job, reason).await;
            }
        };

        let nonce = self.nonces.allocate().await?;
        job.status = MintStatus::Noncing;
        job.nonce = Some(nonce);
        self.store.put_mint_job(&job).await?;

        let tx_hash = match self.submit_with_retries(deposit, &content, nonce, &mut job).await? {
            Some(tx_hash) => tx_hash,
            // Terminal failure already recorded on the job.
            None => return Ok(job),
        };

        self.nonces.mark_broadcast(nonce).await?;
        job.status = MintStatus::Submitted;
        job.l2_tx_hash = Some(tx_hash);
        self.store.put_mint_job(&job).await?;
        info!(hash_id = %deposit.hash_id, %tx_hash, nonce, "Mint transaction submitted");

        self.await_receipt(deposit, nonce, tx_hash, job).await
    }

    /// Verify the deposit against its origin transaction, caching decoded
    /// content across re-processing.
    async fn verify_deposit(&self, deposit: &BridgeDeposit) -> Result<Verified> {
        if let Some(content) = self.content_cache.lock().await.get(&deposit.hash_id) {
            return Ok(Verified::Content(content.clone()));
        }

        let Some(input) = self.l1.transaction_input(deposit.hash_id).await? else {
            return Ok(Verified::Rejected(format!(
                "origin transaction {} not found",
                deposit.hash_id
            )));
        };

        match self.verifier.verify(deposit, &input).await {
            Verdict::Ok(content) => {
                self.content_cache
                    .lock()
                    .await
                    .insert(deposit.hash_id, content.clone());
                Ok(Verified::Content(content))
            }
            Verdict::Mismatch { reason } => Ok(Verified::Rejected(reason)),
        }
    }

    /// Submit the mint, retrying transient failures at the same nonce with a
    /// bumped gas price. Returns `None` after recording a terminal failure.
    async fn submit_with_retries(
        &self,
        deposit: &BridgeDeposit,
        content: &DecodedContent,
        nonce: u64,
        job: &mut MintJob,
    ) -> Result<Option<alloy::primitives::B256>> {
        let mut attempt = 0u32;
        let mut base_gas: Option<u128> = None;

        loop {
            let gas_price = base_gas.map(|base| self.retry.gas_price_for_attempt(base, attempt));
            let request = MintRequest {
                hash_id: deposit.hash_id,
                to: deposit.origin_owner,
                token_uri: content.uri.clone(),
                nonce,
                gas_price,
            };

            job.attempts = attempt + 1;
            let error = match self.l2.submit_mint(&request).await {
                Ok(tx_hash) => return Ok(Some(tx_hash)),
                Err(error) => error,
            };

            let class = classify_error(&error.to_string());
            warn!(hash_id = %deposit.hash_id, nonce, attempt,
                class = class_label(&class), error = %error, "Mint submission failed");

            match class {
                ErrorClass::Permanent => {
                    // Nothing reached the network; the nonce goes back.
                    self.nonces.release(nonce).await?;
                    job.nonce = None;
                    *job = self
                        .fail_job(job.clone(), format!("submission rejected: {error}"))
                        .await?;
                    return Ok(None);
                }
                ErrorClass::NonceTooLow => {
                    // The nonce was consumed on-chain by something we did not
                    // track. Needs an operator; never re-allocate here.
                    self.nonces.confirm(nonce).await?;
                    *job = self
                        .fail_job(
                            job.clone(),
                            format!("nonce {nonce} already consumed on-chain: {error}"),
                        )
                        .await?;
                    return Ok(None);
                }
                ErrorClass::Underpriced => {
                    if base_gas.is_none() {
                        base_gas = Some(self.l2.gas_price().await?);
                    }
                }
                ErrorClass::Transient | ErrorClass::Unknown => {}
            }

            attempt += 1;
            if !self.retry.should_retry(attempt) {
                self.nonces.release(nonce).await?;
                job.nonce = None;
                *job = self
                    .fail_job(
                        job.clone(),
                        format!("submission retries exhausted: {error}"),
                    )
                    .await?;
                return Ok(None);
            }

            metrics::record_mint_retry(class_label(&class));
            tokio::time::sleep(self.retry.backoff_for_attempt(attempt - 1)).await;
        }
    }

    /// Poll for the receipt with bounded backoff. A still-pending transaction
    /// after the poll budget leaves the job `Submitted` for the next pass.
    async fn await_receipt(
        &self,
        deposit: &BridgeDeposit,
        nonce: u64,
        tx_hash: alloy::primitives::B256,
        mut job: MintJob,
    ) -> Result<MintJob> {
        let mut poll = 0u32;
        loop {
            match self.l2.receipt_status(tx_hash).await {
                Ok(Some(true)) => {
                    self.nonces.confirm(nonce).await?;
                    if let Some(record) = self.store.get_inscription(deposit.hash_id).await? {
                        self.store
                            .set_owner(deposit.hash_id, deposit.origin_owner, record.owner)
                            .await?;
                    }
                    job.status = MintStatus::Confirmed;
                    self.store.put_mint_job(&job).await?;
                    metrics::record_mint_outcome("confirmed");
                    info!(hash_id = %deposit.hash_id, %tx_hash, "Mint confirmed");
                    return Ok(job);
                }
                Ok(Some(false)) => {
                    // A reverted transaction still consumes its nonce.
                    self.nonces.confirm(nonce).await?;
                    return self
                        .fail_job(job, format!("mint transaction {tx_hash} reverted"))
                        .await;
                }
                Ok(None) => {}
                Err(error) if error.is_transient() => {
                    debug!(%tx_hash, error = %error, "Receipt poll failed, will retry");
                }
                Err(error) => return Err(error),
            }

            poll += 1;
            if !self.retry.should_retry(poll) {
                warn!(hash_id = %deposit.hash_id, %tx_hash,
                    "Receipt still pending after poll budget, leaving job submitted");
                return Ok(job);
            }
            tokio::time::sleep(self.retry.backoff_for_attempt(poll - 1)).await;
        }
    }

    async fn fail_job(&self, mut job: MintJob, reason: String) -> Result<MintJob> {
        job.status = MintStatus::Failed;
        job.failure_reason = Some(reason);
        self.store.put_mint_job(&job).await?;
        metrics::record_mint_outcome("failed");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::content::compute_sha;
    use crate::error::IndexerError;
    use crate::store::MemoryStore;
    use crate::types::{Chain, RawLog};
    use alloy::primitives::{Address, B256};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct AlwaysExists;

    #[async_trait]
    impl ProvenanceLookup for AlwaysExists {
        async fn exists(&self, _sha: B256) -> bool {
            true
        }
    }

    /// L1 mock serving origin transaction calldata by hash.
    struct MockL1 {
        inputs: HashMap<B256, Vec<u8>>,
    }

    #[async_trait]
    impl ChainClient for MockL1 {
        fn chain(&self) -> Chain {
            Chain::L1
        }
        async fn latest_block_number(&self) -> Result<u64> {
            Ok(0)
        }
        async fn logs_for_block(&self, _block_number: u64) -> Result<Vec<RawLog>> {
            Ok(vec![])
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
            Err(IndexerError::Permanent("not a minting chain".to_string()))
        }
        async fn receipt_status(&self, _tx_hash: B256) -> Result<Option<bool>> {
            Ok(None)
        }
    }

    /// L2 mock: scripted submit errors, then success; receipts always succeed.
    struct MockL2 {
        submit_errors: StdMutex<Vec<IndexerError>>,
        submitted: StdMutex<Vec<MintRequest>>,
        receipt: Option<bool>,
    }

    impl MockL2 {
        fn succeeding() -> Self {
            Self {
                submit_errors: StdMutex::new(vec![]),
                submitted: StdMutex::new(vec![]),
                receipt: Some(true),
            }
        }
    }

    #[async_trait]
    impl ChainClient for MockL2 {
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
            Ok(5)
        }
        async fn gas_price(&self) -> Result<u128> {
            Ok(1_000_000_000)
        }
        async fn transaction_input(&self, _tx_hash: B256) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn submit_mint(&self, request: &MintRequest) -> Result<B256> {
            if let Some(error) = self.submit_errors.lock().unwrap().pop() {
                return Err(error);
            }
            self.submitted.lock().unwrap().push(request.clone());
            Ok(B256::repeat_byte(0xbb))
        }
        async fn receipt_status(&self, _tx_hash: B256) -> Result<Option<bool>> {
            Ok(self.receipt)
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(2),
            ..RetryConfig::default()
        }
    }

    fn deposit_for(uri: &str) -> BridgeDeposit {
        BridgeDeposit {
            hash_id: B256::repeat_byte(0x01),
            sha: compute_sha(uri.as_bytes()),
            origin_owner: Address::repeat_byte(0x02),
            l1_tx_hash: B256::repeat_byte(0x01),
        }
    }

    fn service(
        l1: MockL1,
        l2: MockL2,
    ) -> (MintService<AlwaysExists>, Arc<MemoryStore>, Arc<MockL2>) {
        let store = Arc::new(MemoryStore::new());
        let l2 = Arc::new(l2);
        let nonces = Arc::new(NonceManager::new(
            Arc::clone(&l2) as Arc<dyn ChainClient>,
            Address::ZERO,
        ));
        let service = MintService::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(l1),
            Arc::clone(&l2) as Arc<dyn ChainClient>,
            Verifier::new(AlwaysExists),
            nonces,
            fast_retry(),
        );
        (service, store, l2)
    }

    #[tokio::test]
    async fn happy_path_confirms_mint() {
        let uri = "data:,hello";
        let deposit = deposit_for(uri);
        let l1 = MockL1 {
            inputs: HashMap::from([(deposit.hash_id, uri.as_bytes().to_vec())]),
        };
        let (service, store, l2) = service(l1, MockL2::succeeding());

        let job = service.handle_deposit(&deposit).await.unwrap();
        assert_eq!(job.status, MintStatus::Confirmed);
        assert_eq!(job.nonce, Some(5));

        let submitted = l2.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].to, deposit.origin_owner);
        assert_eq!(submitted[0].token_uri, uri);

        let stored = store.get_mint_job(deposit.hash_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MintStatus::Confirmed);
    }

    #[tokio::test]
    async fn mismatch_fails_without_touching_nonces() {
        let deposit = deposit_for("data:,hello");
        let l1 = MockL1 {
            inputs: HashMap::from([(deposit.hash_id, b"data:,tampered".to_vec())]),
        };
        let (service, _store, l2) = service(l1, MockL2::succeeding());

        let job = service.handle_deposit(&deposit).await.unwrap();
        assert_eq!(job.status, MintStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("content hash mismatch"));
        assert!(l2.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_origin_transaction_fails_permanently() {
        let deposit = deposit_for("data:,hello");
        let l1 = MockL1 {
            inputs: HashMap::new(),
        };
        let (service, _store, l2) = service(l1, MockL2::succeeding());

        let job = service.handle_deposit(&deposit).await.unwrap();
        assert_eq!(job.status, MintStatus::Failed);
        assert!(l2.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_deposit_is_a_no_op() {
        let uri = "data:,hello";
        let deposit = deposit_for(uri);
        let l1 = MockL1 {
            inputs: HashMap::from([(deposit.hash_id, uri.as_bytes().to_vec())]),
        };
        let (service, _store, l2) = service(l1, MockL2::succeeding());

        let first = service.handle_deposit(&deposit).await.unwrap();
        let second = service.handle_deposit(&deposit).await.unwrap();
        assert_eq!(first.status, MintStatus::Confirmed);
        assert_eq!(second.status, MintStatus::Confirmed);
        assert_eq!(l2.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_submit_errors_retry_at_same_nonce() {
        let uri = "data:,hello";
        let deposit = deposit_for(uri);
        let l1 = MockL1 {
            inputs: HashMap::from([(deposit.hash_id, uri.as_bytes().to_vec())]),
        };
        let l2 = MockL2 {
            submit_errors: StdMutex::new(vec![
                IndexerError::Transient("connection timeout".to_string()),
                IndexerError::Transient("connection timeout".to_string()),
            ]),
            submitted: StdMutex::new(vec![]),
            receipt: Some(true),
        };
        let (service, _store, l2) = service(l1, l2);

        let job = service.handle_deposit(&deposit).await.unwrap();
        assert_eq!(job.status, MintStatus::Confirmed);
        // Both failures and the final success carried the same nonce.
        assert_eq!(job.nonce, Some(5));
        assert_eq!(l2.submitted.lock().unwrap()[0].nonce, 5);
    }

    #[tokio::test]
    async fn exhausted_submissions_release_the_nonce() {
        let uri = "data:,hello";
        let deposit = deposit_for(uri);
        let l1 = MockL1 {
            inputs: HashMap::from([(deposit.hash_id, uri.as_bytes().to_vec())]),
        };
        let l2 = MockL2 {
            submit_errors: StdMutex::new(
                (0..4)
                    .map(|_| IndexerError::Transient("connection timeout".to_string()))
                    .collect(),
            ),
            submitted: StdMutex::new(vec![]),
            receipt: Some(true),
        };
        let (service, store, l2) = service(l1, l2);

        let job = service.handle_deposit(&deposit).await.unwrap();
        assert_eq!(job.status, MintStatus::Failed);
        assert!(l2.submitted.lock().unwrap().is_empty());

        let stored = store.get_mint_job(deposit.hash_id).await.unwrap().unwrap();
        assert!(stored
            .failure_reason
            .unwrap()
            .contains("retries exhausted"));
    }

    #[tokio::test]
    async fn reverted_mint_fails_and_keeps_the_nonce_consumed() {
        let uri = "data:,hello";
        let deposit = deposit_for(uri);
        let l1 = MockL1 {
            inputs: HashMap::from([(deposit.hash_id, uri.as_bytes().to_vec())]),
        };
        let l2 = MockL2 {
            submit_errors: StdMutex::new(vec![]),
            submitted: StdMutex::new(vec![]),
            receipt: Some(false),
        };
        let (service, _store, _l2) = service(l1, l2);

        let job = service.handle_deposit(&deposit).await.unwrap();
        assert_eq!(job.status, MintStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("reverted"));
    }
}
