//! Chain RPC port.
//!
//! The pipeline talks to both chains through [`ChainClient`]; the production
//! implementation is the alloy HTTP client in [`evm`], tests use a scriptable
//! mock.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chain, RawLog};

pub mod evm;

pub use evm::EvmClient;

/// Parameters for an L2 mint transaction.
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub hash_id: B256,
    /// Recipient of the wrapped token (the L1 depositor).
    pub to: Address,
    /// Metadata reference built from the decoded content.
    pub token_uri: String,
    /// Allocated nonce; replacements reuse the same value.
    pub nonce: u64,
    /// Explicit gas price for replacement transactions, None for the node's
    /// suggested price.
    pub gas_price: Option<u128>,
}

/// RPC operations the pipeline needs from a chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> Chain;

    /// Latest block number seen by the node.
    async fn latest_block_number(&self) -> Result<u64>;

    /// All watched-contract logs for one block.
    async fn logs_for_block(&self, block_number: u64) -> Result<Vec<RawLog>>;

    /// Confirmed transaction count for an account (the on-chain nonce
    /// baseline).
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Node's suggested gas price, used as the base for replacement bumps.
    async fn gas_price(&self) -> Result<u128>;

    /// Raw input bytes of a transaction, or None when the node has no record
    /// of it.
    async fn transaction_input(&self, tx_hash: B256) -> Result<Option<Vec<u8>>>;

    /// Sign and broadcast a mint transaction; returns the transaction hash
    /// without waiting for inclusion.
    async fn submit_mint(&self, request: &MintRequest) -> Result<B256>;

    /// Receipt status for a transaction: `Some(true)` success, `Some(false)`
    /// reverted, `None` not yet mined.
    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>>;
}
