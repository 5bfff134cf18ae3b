//! Domain types shared across the indexer and bridge pipeline.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Which chain a block, event or job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    L1,
    L2,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::L1 => "l1",
            Chain::L2 => "l2",
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1" => Ok(Chain::L1),
            "l2" => Ok(Chain::L2),
            other => Err(format!("unknown chain: {other}")),
        }
    }
}

/// Raw log as returned by a chain client, before decoding.
///
/// Kept independent of any provider's log type so mock clients in tests can
/// construct them directly.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// A classified event decoded from a contract log.
///
/// Immutable once decoded; ordering key is `(block_number, log_index)`.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub chain: Chain,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub kind: EventKind,
}

/// Event classification with the decoded payload for each kind.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Ownership transfer of an inscribed token.
    Transfer {
        hash_id: B256,
        from: Address,
        to: Address,
    },
    /// Completed sale. Emitted after the transfer in the same transaction.
    Sale {
        hash_id: B256,
        from: Address,
        to: Address,
        value: U256,
    },
    /// Token offered for sale, or the offer withdrawn (`listed == false`).
    Listing {
        hash_id: B256,
        seller: Address,
        min_value: U256,
        to_address: Option<Address>,
        listed: bool,
    },
    /// Bid entered or withdrawn (`entered == false`).
    Bid {
        hash_id: B256,
        bidder: Address,
        value: U256,
        entered: bool,
    },
    /// Token locked in the L1 bridge vault; triggers the mint pipeline.
    BridgeDeposit(BridgeDeposit),
    /// Wrapped token burned on L2 (burn-and-unlock direction).
    BridgeWithdraw { hash_id: B256, owner: Address },
    /// Points credited by the L1 points contract.
    Points { address: Address, amount: U256 },
}

impl EventKind {
    /// Stable label used for the event feed and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Transfer { .. } => "transfer",
            EventKind::Sale { .. } => "sale",
            EventKind::Listing { .. } => "listing",
            EventKind::Bid { .. } => "bid",
            EventKind::BridgeDeposit(_) => "bridge-deposit",
            EventKind::BridgeWithdraw { .. } => "bridge-withdraw",
            EventKind::Points { .. } => "points",
        }
    }
}

/// A lock event on the L1 bridge, consumed exactly once by the mint service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeDeposit {
    /// Identifier of the inscribed token (its origin transaction hash).
    pub hash_id: B256,
    /// Content hash of the locked payload as reported by the bridge contract.
    pub sha: B256,
    /// Owner who locked the token on L1.
    pub origin_owner: Address,
    /// Transaction in which the lock was observed.
    pub l1_tx_hash: B256,
}

/// Lifecycle of a mint job.
///
/// `Confirmed` and `Failed` are terminal; no transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MintStatus {
    Verifying,
    Noncing,
    Submitted,
    Confirmed,
    Failed,
}

impl MintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MintStatus::Verifying => "verifying",
            MintStatus::Noncing => "noncing",
            MintStatus::Submitted => "submitted",
            MintStatus::Confirmed => "confirmed",
            MintStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MintStatus::Confirmed | MintStatus::Failed)
    }
}

impl std::str::FromStr for MintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verifying" => Ok(MintStatus::Verifying),
            "noncing" => Ok(MintStatus::Noncing),
            "submitted" => Ok(MintStatus::Submitted),
            "confirmed" => Ok(MintStatus::Confirmed),
            "failed" => Ok(MintStatus::Failed),
            other => Err(format!("unknown mint status: {other}")),
        }
    }
}

/// One mint attempt for a bridge deposit. At most one job per hash_id.
#[derive(Debug, Clone)]
pub struct MintJob {
    pub hash_id: B256,
    pub status: MintStatus,
    pub nonce: Option<u64>,
    pub l2_tx_hash: Option<B256>,
    pub attempts: u32,
    pub failure_reason: Option<String>,
}

impl MintJob {
    pub fn new(hash_id: B256) -> Self {
        Self {
            hash_id,
            status: MintStatus::Verifying,
            nonce: None,
            l2_tx_hash: None,
            attempts: 0,
            failure_reason: None,
        }
    }
}

/// Status of a block job in the processing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Pending,
    Active,
    Retrying,
    Dead,
    Done,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Pending => "pending",
            BlockStatus::Active => "active",
            BlockStatus::Retrying => "retrying",
            BlockStatus::Dead => "dead",
            BlockStatus::Done => "done",
        }
    }
}

/// A block job in the per-chain queue. Retained after completion so a
/// re-enqueue of an already-done block is a detectable no-op.
#[derive(Debug, Clone)]
pub struct BlockJob {
    pub chain: Chain,
    pub block_number: u64,
    pub status: BlockStatus,
    pub attempts: u32,
}

/// Canonical record of an inscribed token in the store.
#[derive(Debug, Clone)]
pub struct InscriptionRecord {
    pub hash_id: B256,
    /// Content hash of the canonical payload, set at creation. Provenance
    /// verification compares against this value.
    pub sha: B256,
    pub creator: Address,
    pub owner: Address,
    pub prev_owner: Option<Address>,
    /// True while the token is held by the L1 bridge vault.
    pub locked: bool,
}

/// Marketplace listing keyed by hash_id.
#[derive(Debug, Clone)]
pub struct Listing {
    pub hash_id: B256,
    pub seller: Address,
    pub min_value: U256,
    /// Private listing target, when the offer is restricted to one buyer.
    pub to_address: Option<Address>,
    pub tx_hash: B256,
}

/// Marketplace bid keyed by hash_id. Only the highest live bid is kept.
#[derive(Debug, Clone)]
pub struct Bid {
    pub hash_id: B256,
    pub bidder: Address,
    pub value: U256,
    pub tx_hash: B256,
}

/// Row in the event feed, keyed by (tx_hash, log_index) so re-processing a
/// block upserts instead of duplicating.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub chain: Chain,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub kind: String,
    pub hash_id: Option<B256>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_round_trips_through_str() {
        for chain in [Chain::L1, Chain::L2] {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
        assert!("l3".parse::<Chain>().is_err());
    }

    #[test]
    fn mint_status_terminality() {
        assert!(MintStatus::Confirmed.is_terminal());
        assert!(MintStatus::Failed.is_terminal());
        assert!(!MintStatus::Verifying.is_terminal());
        assert!(!MintStatus::Noncing.is_terminal());
        assert!(!MintStatus::Submitted.is_terminal());
    }

    #[test]
    fn mint_status_round_trips_through_str() {
        for status in [
            MintStatus::Verifying,
            MintStatus::Noncing,
            MintStatus::Submitted,
            MintStatus::Confirmed,
            MintStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MintStatus>().unwrap(), status);
        }
    }
}
