//! Lock-and-mint bridge engine.
//!
//! A `TokenLocked` event on L1 flows through three stages: content
//! verification against the origin transaction, nonce allocation for the
//! minter account, and submission of the L2 mint transaction. Each stage is
//! checkpointed in the store so a crash or re-processed block never produces
//! a second mint for the same token.

pub mod content;
pub mod mint;
pub mod nonce;
pub mod verify;

pub use content::{decode_content, DecodedContent};
pub use mint::MintService;
pub use nonce::NonceManager;
pub use verify::{HttpProvenanceLookup, ProvenanceClient, ProvenanceLookup, Verdict, Verifier};
