//! Cloak Core
//!
//! Sequencing engine for chains of confidential join-split transfers.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Sequencer ──▶ NoteLedger (resolve inputs)                           │
//! │      │                                                               │
//! │      ├──▶ ProofConstructor ──▶ LedgerSubmitter ──▶ ConfirmationWaiter│
//! │      │                                                               │
//! │      └──▶ NoteLedger (spend inputs, confirm outputs)                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod demo;
pub mod sequencer;
