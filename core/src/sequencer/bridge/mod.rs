//! Public Token Bridge
//!
//! The bridge contract is a remote service. The sequencer reaches it through
//! three seams:
//!
//! ```text
//! ┌──────────────┐  LedgerSubmitter     ┌──────────────────────────────┐
//! │              │─────────────────────▶│                              │
//! │  Sequencer   │  ConfirmationSource  │  Bridge (HTTP gateway or     │
//! │              │─────────────────────▶│  in-memory MockBridge)       │
//! │ prerequisites│  PublicToken         │                              │
//! │              │─────────────────────▶│  mint / approve              │
//! └──────────────┘                      └──────────────────────────────┘
//! ```

pub mod client;
pub mod mock;

use async_trait::async_trait;

use cloak_note::{AccountId, SubmissionId};

use super::error::SubmitError;

pub use client::{BridgeClient, BridgeClientConfig};
pub use mock::{MockBridge, MockOutcome, SubmitFault};

/// Public-balance operations used before a chain starts
///
/// Amounts are raw token units (note value times the bridge scaling factor).
/// Both calls return a submission to be awaited like any other.
#[async_trait]
pub trait PublicToken: Send + Sync {
    async fn mint(&self, to: &AccountId, amount: u128) -> Result<SubmissionId, SubmitError>;

    async fn approve(
        &self,
        owner: &AccountId,
        spender: &AccountId,
        amount: u128,
    ) -> Result<SubmissionId, SubmitError>;
}
