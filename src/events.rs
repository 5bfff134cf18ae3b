//! Contract log decoding and classification.
//!
//! Each known contract event is matched by its topic-0 signature hash and
//! decoded by hand from the indexed topics and the ABI-encoded data words,
//! then classified into an [`EventKind`].
//!
//! An unknown topic or address is not an error (the log is skipped by the
//! caller); a malformed payload for a *known* topic indicates a corrupted or
//! incompatible ABI and is fatal for the enclosing block job.

use alloy::primitives::{keccak256, Address, B256, U256};
use lazy_static::lazy_static;
use std::str::FromStr;

use crate::config::ContractsConfig;
use crate::error::{IndexerError, Result};
use crate::types::{BridgeDeposit, Chain, DecodedEvent, EventKind, RawLog};

lazy_static! {
    /// TokenTransferred(bytes32 indexed hashId, address indexed from, address indexed to)
    pub static ref TOKEN_TRANSFERRED: B256 =
        keccak256(b"TokenTransferred(bytes32,address,address)");

    /// TokenBought(bytes32 indexed hashId, address indexed from, address indexed to, uint256 value)
    pub static ref TOKEN_BOUGHT: B256 =
        keccak256(b"TokenBought(bytes32,address,address,uint256)");

    /// TokenOffered(bytes32 indexed hashId, address indexed toAddress, uint256 minValue, address seller)
    pub static ref TOKEN_OFFERED: B256 =
        keccak256(b"TokenOffered(bytes32,address,uint256,address)");

    /// TokenNoLongerForSale(bytes32 indexed hashId)
    pub static ref TOKEN_NO_LONGER_FOR_SALE: B256 =
        keccak256(b"TokenNoLongerForSale(bytes32)");

    /// TokenBidEntered(bytes32 indexed hashId, address indexed bidder, uint256 value)
    pub static ref TOKEN_BID_ENTERED: B256 =
        keccak256(b"TokenBidEntered(bytes32,address,uint256)");

    /// TokenBidWithdrawn(bytes32 indexed hashId, address indexed bidder, uint256 value)
    pub static ref TOKEN_BID_WITHDRAWN: B256 =
        keccak256(b"TokenBidWithdrawn(bytes32,address,uint256)");

    /// TokenLocked(bytes32 indexed hashId, address indexed owner, bytes32 sha)
    pub static ref TOKEN_LOCKED: B256 =
        keccak256(b"TokenLocked(bytes32,address,bytes32)");

    /// TokenBurned(bytes32 indexed hashId, address indexed owner)
    pub static ref TOKEN_BURNED: B256 =
        keccak256(b"TokenBurned(bytes32,address)");

    /// PointsAdded(address indexed user, uint256 amount)
    pub static ref POINTS_ADDED: B256 =
        keccak256(b"PointsAdded(address,uint256)");
}

/// Parsed contract addresses, split by chain for log filtering.
#[derive(Debug, Clone)]
pub struct ContractSet {
    pub market_l1: Address,
    pub bridge_l1: Address,
    pub points_l1: Address,
    pub market_l2: Address,
    pub bridge_l2: Address,
}

impl ContractSet {
    pub fn from_config(config: &ContractsConfig) -> Result<Self> {
        let parse = |name: &str, value: &str| {
            Address::from_str(value)
                .map_err(|e| IndexerError::Permanent(format!("invalid {name} address: {e}")))
        };
        Ok(Self {
            market_l1: parse("market_l1", &config.market_l1)?,
            bridge_l1: parse("bridge_l1", &config.bridge_l1)?,
            points_l1: parse("points_l1", &config.points_l1)?,
            market_l2: parse("market_l2", &config.market_l2)?,
            bridge_l2: parse("bridge_l2", &config.bridge_l2)?,
        })
    }

    /// Addresses the indexer watches on the given chain.
    pub fn addresses(&self, chain: Chain) -> Vec<Address> {
        match chain {
            Chain::L1 => vec![self.market_l1, self.bridge_l1, self.points_l1],
            Chain::L2 => vec![self.market_l2, self.bridge_l2],
        }
    }

    pub fn is_known(&self, chain: Chain, address: Address) -> bool {
        self.addresses(chain).contains(&address)
    }
}

/// Decode a raw log into a classified event.
///
/// Returns `Ok(None)` for unknown addresses or topics (skip), and
/// `Err(FatalDecode)` when a known topic carries a malformed payload.
pub fn decode_log(contracts: &ContractSet, chain: Chain, log: &RawLog) -> Result<Option<DecodedEvent>> {
    if !contracts.is_known(chain, log.address) {
        return Ok(None);
    }

    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };

    let kind = if *topic0 == *TOKEN_TRANSFERRED {
        require_topics(log, 4)?;
        Some(EventKind::Transfer {
            hash_id: log.topics[1],
            from: topic_address(&log.topics[2]),
            to: topic_address(&log.topics[3]),
        })
    } else if *topic0 == *TOKEN_BOUGHT {
        require_topics(log, 4)?;
        Some(EventKind::Sale {
            hash_id: log.topics[1],
            from: topic_address(&log.topics[2]),
            to: topic_address(&log.topics[3]),
            value: data_word_u256(log, 0)?,
        })
    } else if *topic0 == *TOKEN_OFFERED {
        require_topics(log, 3)?;
        let to_address = topic_address(&log.topics[2]);
        Some(EventKind::Listing {
            hash_id: log.topics[1],
            seller: data_word_address(log, 1)?,
            min_value: data_word_u256(log, 0)?,
            to_address: (to_address != Address::ZERO).then_some(to_address),
            listed: true,
        })
    } else if *topic0 == *TOKEN_NO_LONGER_FOR_SALE {
        require_topics(log, 2)?;
        Some(EventKind::Listing {
            hash_id: log.topics[1],
            seller: Address::ZERO,
            min_value: U256::ZERO,
            to_address: None,
            listed: false,
        })
    } else if *topic0 == *TOKEN_BID_ENTERED {
        require_topics(log, 3)?;
        Some(EventKind::Bid {
            hash_id: log.topics[1],
            bidder: topic_address(&log.topics[2]),
            value: data_word_u256(log, 0)?,
            entered: true,
        })
    } else if *topic0 == *TOKEN_BID_WITHDRAWN {
        require_topics(log, 3)?;
        Some(EventKind::Bid {
            hash_id: log.topics[1],
            bidder: topic_address(&log.topics[2]),
            value: data_word_u256(log, 0)?,
            entered: false,
        })
    } else if *topic0 == *TOKEN_LOCKED {
        require_topics(log, 3)?;
        Some(EventKind::BridgeDeposit(BridgeDeposit {
            hash_id: log.topics[1],
            origin_owner: topic_address(&log.topics[2]),
            sha: data_word_b256(log, 0)?,
            l1_tx_hash: log.tx_hash,
        }))
    } else if *topic0 == *TOKEN_BURNED {
        require_topics(log, 3)?;
        Some(EventKind::BridgeWithdraw {
            hash_id: log.topics[1],
            owner: topic_address(&log.topics[2]),
        })
    } else if *topic0 == *POINTS_ADDED {
        require_topics(log, 2)?;
        Some(EventKind::Points {
            address: topic_address(&log.topics[1]),
            amount: data_word_u256(log, 0)?,
        })
    } else {
        None
    };

    Ok(kind.map(|kind| DecodedEvent {
        chain,
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
        kind,
    }))
}

/// An address indexed as a topic is right-aligned in 32 bytes.
fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic.as_slice()[12..32])
}

fn require_topics(log: &RawLog, count: usize) -> Result<()> {
    if log.topics.len() != count {
        return Err(IndexerError::FatalDecode(format!(
            "expected {count} topics, got {} (tx {}, log {})",
            log.topics.len(),
            log.tx_hash,
            log.log_index
        )));
    }
    Ok(())
}

fn data_word(log: &RawLog, index: usize) -> Result<&[u8]> {
    let start = index * 32;
    let end = start + 32;
    if log.data.len() < end {
        return Err(IndexerError::FatalDecode(format!(
            "data too short: need {} bytes, got {} (tx {}, log {})",
            end,
            log.data.len(),
            log.tx_hash,
            log.log_index
        )));
    }
    Ok(&log.data[start..end])
}

fn data_word_u256(log: &RawLog, index: usize) -> Result<U256> {
    Ok(U256::from_be_slice(data_word(log, index)?))
}

fn data_word_b256(log: &RawLog, index: usize) -> Result<B256> {
    Ok(B256::from_slice(data_word(log, index)?))
}

fn data_word_address(log: &RawLog, index: usize) -> Result<Address> {
    Ok(Address::from_slice(&data_word(log, index)?[12..32]))
}
