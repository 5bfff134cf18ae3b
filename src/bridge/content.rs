//! Inscribed content decoding.
//!
//! An inscribed token's content lives in the calldata of its origin
//! transaction as a UTF-8 data URI. The content hash that verification
//! compares against is SHA-256 over the full URI string, not over the decoded
//! media bytes.

use alloy::primitives::B256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

/// Content decoded from an origin transaction's calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedContent {
    /// SHA-256 of the full data URI string.
    pub sha: B256,
    /// Media type from the URI header, `text/plain` when omitted.
    pub mime: String,
    /// Decoded media bytes.
    pub data: Vec<u8>,
    /// The original data URI, reused verbatim as the mint's token URI.
    pub uri: String,
}

/// SHA-256 over raw bytes.
pub fn compute_sha(input: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(input))
}

/// Decode a data URI from raw calldata.
///
/// Returns the rejection reason on failure; the caller turns that into a
/// verification verdict.
pub fn decode_content(input: &[u8]) -> Result<DecodedContent, String> {
    let uri = std::str::from_utf8(input).map_err(|_| "calldata is not UTF-8".to_string())?;

    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| "calldata is not a data URI".to_string())?;

    let (header, body) = rest
        .split_once(',')
        .ok_or_else(|| "data URI has no payload separator".to_string())?;

    let (mime_part, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime = if mime_part.is_empty() {
        "text/plain".to_string()
    } else {
        mime_part.to_string()
    };

    let data = if is_base64 {
        BASE64
            .decode(body)
            .map_err(|e| format!("invalid base64 payload: {e}"))?
    } else {
        body.as_bytes().to_vec()
    };

    Ok(DecodedContent {
        sha: compute_sha(uri.as_bytes()),
        mime,
        data,
        uri: uri.to_string(),
    })
}

/// Insertion-order bounded cache for decoded content, keyed by hash_id.
///
/// Re-processing a block re-verifies its deposits; the cache saves the
/// origin-transaction fetch and decode on those paths.
pub struct BoundedContentCache {
    entries: HashMap<B256, DecodedContent>,
    order: VecDeque<B256>,
    capacity: usize,
}

impl BoundedContentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn get(&self, hash_id: &B256) -> Option<&DecodedContent> {
        self.entries.get(hash_id)
    }

    pub fn insert(&mut self, hash_id: B256, content: DecodedContent) {
        if self.entries.insert(hash_id, content).is_none() {
            self.order.push_back(hash_id);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
