//! Content verification for bridge deposits.
//!
//! A deposit is minted only when three facts line up: the origin
//! transaction's calldata decodes as a data URI, its SHA-256 matches the hash
//! the bridge contract recorded at lock time, and the provenance service
//! confirms an inscription with that hash exists. Any lookup failure counts
//! as non-existence; a deposit is never minted on a guess.

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bridge::content::{decode_content, DecodedContent};
use crate::error::{IndexerError, Result};
use crate::types::BridgeDeposit;

/// Outcome of verifying one deposit.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Content checks out; carries the decoded content for the mint.
    Ok(DecodedContent),
    /// Expected, permanent rejection. The mint job fails and is not retried.
    Mismatch { reason: String },
}

/// Provenance existence check for a content hash.
#[async_trait]
pub trait ProvenanceLookup: Send + Sync {
    /// Whether an inscription with this content hash exists. Must return
    /// `false` on any lookup failure.
    async fn exists(&self, sha: B256) -> bool;
}

#[derive(Deserialize)]
struct ExistsResponse {
    result: bool,
}

/// Provenance lookup backed by the HTTP provenance API.
pub struct HttpProvenanceLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvenanceLookup {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IndexerError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProvenanceLookup for HttpProvenanceLookup {
    async fn exists(&self, sha: B256) -> bool {
        let url = format!(
            "{}/exists/0x{}",
            self.base_url.trim_end_matches('/'),
            hex::encode(sha.as_slice())
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%sha, error = %e, "Provenance lookup failed, treating as non-existent");
                return false;
            }
        };

        if !response.status().is_success() {
            warn!(%sha, status = %response.status(), "Provenance lookup non-success status");
            return false;
        }

        match response.json::<ExistsResponse>().await {
            Ok(body) => body.result,
            Err(e) => {
                warn!(%sha, error = %e, "Provenance response unparseable, treating as non-existent");
                false
            }
        }
    }
}

/// Production lookup selection: the HTTP provenance API when configured,
/// otherwise provenance checking is disabled and the recorded sha alone
/// decides.
pub enum ProvenanceClient {
    Http(HttpProvenanceLookup),
    Disabled,
}

impl ProvenanceClient {
    pub fn from_url(base_url: Option<&str>) -> Result<Self> {
        match base_url {
            Some(url) => Ok(Self::Http(HttpProvenanceLookup::new(url)?)),
            None => Ok(Self::Disabled),
        }
    }
}

#[async_trait]
impl ProvenanceLookup for ProvenanceClient {
    async fn exists(&self, sha: B256) -> bool {
        match self {
            Self::Http(lookup) => lookup.exists(sha).await,
            Self::Disabled => true,
        }
    }
}

/// Verifies a deposit's content against the lock event and provenance.
pub struct Verifier<P> {
    lookup: P,
}

impl<P: ProvenanceLookup> Verifier<P> {
    pub fn new(lookup: P) -> Self {
        Self { lookup }
    }

    /// Verify one deposit given the origin transaction's raw calldata.
    pub async fn verify(&self, deposit: &BridgeDeposit, input: &[u8]) -> Verdict {
        let content = match decode_content(input) {
            Ok(content) => content,
            Err(reason) => return Verdict::Mismatch { reason },
        };

        if content.sha != deposit.sha {
            return Verdict::Mismatch {
                reason: format!(
                    "content hash mismatch: computed {}, lock event recorded {}",
                    content.sha, deposit.sha
                ),
            };
        }

        if !self.lookup.exists(deposit.sha).await {
            return Verdict::Mismatch {
                reason: "provenance lookup could not confirm the inscription".to_string(),
            };
        }

        debug!(hash_id = %deposit.hash_id, sha = %deposit.sha, "Deposit content verified");
        Verdict::Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::content::compute_sha;
    use alloy::primitives::Address;

    struct FixedLookup(bool);

    #[async_trait]
    impl ProvenanceLookup for FixedLookup {
        async fn exists(&self, _sha: B256) -> bool {
            self.0
        }
    }

    fn deposit_for(uri: &str) -> BridgeDeposit {
        BridgeDeposit {
            hash_id: B256::repeat_byte(0x01),
            sha: compute_sha(uri.as_bytes()),
            origin_owner: Address::repeat_byte(0x02),
            l1_tx_hash: B256::repeat_byte(0x03),
        }
    }

    #[tokio::test]
    async fn accepts_matching_content() {
        let uri = "data:,hello";
        let verifier = Verifier::new(FixedLookup(true));
        match verifier.verify(&deposit_for(uri), uri.as_bytes()).await {
            Verdict::Ok(content) => assert_eq!(content.uri, uri),
            Verdict::Mismatch { reason } => panic!("unexpected mismatch: {reason}"),
        }
    }

    #[tokio::test]
    async fn rejects_hash_mismatch() {
        let verifier = Verifier::new(FixedLookup(true));
        let deposit = deposit_for("data:,hello");
        match verifier.verify(&deposit, b"data:,tampered").await {
            Verdict::Mismatch { reason } => assert!(reason.contains("content hash mismatch")),
            Verdict::Ok(_) => panic!("tampered content must not verify"),
        }
    }

    #[tokio::test]
    async fn rejects_undecodable_content() {
        let verifier = Verifier::new(FixedLookup(true));
        let deposit = deposit_for("data:,hello");
        match verifier.verify(&deposit, &[0xff, 0xfe]).await {
            Verdict::Mismatch { .. } => {}
            Verdict::Ok(_) => panic!("non-UTF-8 calldata must not verify"),
        }
    }

    #[tokio::test]
    async fn rejects_when_provenance_denies() {
        let uri = "data:,hello";
        let verifier = Verifier::new(FixedLookup(false));
        match verifier.verify(&deposit_for(uri), uri.as_bytes()).await {
            Verdict::Mismatch { reason } => assert!(reason.contains("provenance")),
            Verdict::Ok(_) => panic!("unconfirmed provenance must not verify"),
        }
    }
}
