//! Alloy-based EVM client for both chains.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::chain::{ChainClient, MintRequest};
use crate::config::ChainEndpoint;
use crate::error::{IndexerError, Result};
use crate::types::{Chain, RawLog};

sol! {
    #[sol(rpc)]
    contract InscriptionBridge {
        /// Mint the wrapped token for a verified L1 lock.
        function mintLocked(bytes32 hashId, address to, string calldata tokenUri) external;
    }
}

/// HTTP chain client. One instance per chain; the L2 instance carries the
/// minter signer.
pub struct EvmClient {
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
    chain: Chain,
    chain_id: u64,
    /// Contract addresses whose logs we fetch.
    watch_addresses: Vec<Address>,
    /// Bridge contract receiving mint transactions (L2 only).
    bridge_address: Address,
    signer: Option<PrivateKeySigner>,
}

impl EvmClient {
    pub fn new(
        endpoint: &ChainEndpoint,
        chain: Chain,
        watch_addresses: Vec<Address>,
        bridge_address: Address,
        signer: Option<PrivateKeySigner>,
    ) -> Result<Self> {
        let url = endpoint
            .rpc_url
            .parse()
            .map_err(|e| IndexerError::Permanent(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        info!(
            chain = %chain,
            chain_id = endpoint.chain_id,
            has_signer = signer.is_some(),
            "Chain client initialized"
        );

        Ok(Self {
            provider,
            rpc_url: endpoint.rpc_url.clone(),
            chain,
            chain_id: endpoint.chain_id,
            watch_addresses,
            bridge_address,
            signer,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the minter account, when a signer is configured.
    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn latest_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(IndexerError::transient)
    }

    async fn logs_for_block(&self, block_number: u64) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(self.watch_addresses.clone())
            .from_block(block_number)
            .to_block(block_number);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(IndexerError::transient)?;

        let mut raw = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log.transaction_hash.ok_or_else(|| {
                IndexerError::Transient("log missing transaction hash".to_string())
            })?;
            let log_index = log
                .log_index
                .ok_or_else(|| IndexerError::Transient("log missing log index".to_string()))?;

            raw.push(RawLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.to_vec(),
                block_number: log.block_number.unwrap_or(block_number),
                tx_hash,
                log_index,
            });
        }

        debug!(chain = %self.chain, block_number, logs = raw.len(), "Fetched block logs");
        Ok(raw)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(IndexerError::transient)
    }

    async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .map_err(IndexerError::transient)
    }

    async fn transaction_input(&self, tx_hash: B256) -> Result<Option<Vec<u8>>> {
        let tx = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(IndexerError::transient)?;
        // Calldata lives in the typed envelope, behind the consensus trait.
        Ok(tx.map(|tx| alloy::consensus::Transaction::input(&tx.inner).to_vec()))
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<B256> {
        let signer = self.signer.clone().ok_or_else(|| {
            IndexerError::Permanent("mint submission requires a signer".to_string())
        })?;

        let wallet = EthereumWallet::from(signer);
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| IndexerError::Permanent(format!("invalid RPC URL: {e}")))?;
        // The recommended fillers (nonce, gas, chain id) are prerequisites
        // for the wallet filler; without them every submission fails
        // client-side with a "missing properties" error before any RPC call.
        // Explicit .nonce()/.gas_price() on the call still take precedence.
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(url);

        let contract = InscriptionBridge::new(self.bridge_address, &provider);

        debug!(
            hash_id = %request.hash_id,
            to = %request.to,
            nonce = request.nonce,
            gas_price = ?request.gas_price,
            "Submitting mint transaction"
        );

        let mut call = contract
            .mintLocked(request.hash_id, request.to, request.token_uri.clone())
            .nonce(request.nonce);
        if let Some(gas_price) = request.gas_price {
            call = call.gas_price(gas_price);
        }

        let pending = call
            .send()
            .await
            .map_err(|e| IndexerError::Transient(format!("failed to send mint: {e}")))?;

        Ok(*pending.tx_hash())
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(IndexerError::transient)?;
        Ok(receipt.map(|r| r.status()))
    }
}
