//! Cloak Note SDK
//!
//! Value types shared by the sequencing engine, the bridge adapters and the
//! proof constructor.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Join-Split                            │
//! │                                                              │
//! │   inputs: [Note, ..]  ──▶  proof  ──▶  outputs: [Note, ..]   │
//! │                              │                               │
//! │                              ▼                               │
//! │                    public_value (± tokens)                   │
//! │                                                              │
//! │   Σ inputs - Σ outputs == public_value                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod account;
pub mod note;
pub mod transaction;

pub use account::{AccountId, ParseIdError};
pub use note::{Note, NoteId, NoteState, NoteValue, OutputSpec};
pub use transaction::{SubmissionId, TransactionId, TransactionState};
