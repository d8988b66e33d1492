//! Notes
//!
//! A Note holds value privately. The engine knows the amount for accounting,
//! observers of the public ledger only ever see its identity hash.
//!
//! ```text
//! Pending ──(producing tx confirmed)──▶ Confirmed ──(consuming tx confirmed)──▶ Spent
//! ```

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::transaction::TransactionId;

crate::hash_id! {
    /// Content hash identifying a note, assigned by the proof constructor
    NoteId
}

/// Note value in token units before scaling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteValue(pub u64);

impl NoteValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NoteValue {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteState {
    /// Produced by a submitted transaction that has not finalized yet
    Pending,
    /// Producing transaction finalized; spendable
    Confirmed,
    /// Consumed by a later confirmed transaction
    Spent,
}

/// A requested output: who receives it and how much
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputSpec {
    pub owner: AccountId,
    pub value: NoteValue,
}

impl OutputSpec {
    pub fn new(owner: AccountId, value: u64) -> Self {
        Self {
            owner,
            value: NoteValue(value),
        }
    }
}

impl From<(AccountId, u64)> for OutputSpec {
    fn from((owner, value): (AccountId, u64)) -> Self {
        Self::new(owner, value)
    }
}

/// A note as recorded by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub owner: AccountId,
    pub value: NoteValue,
    pub state: NoteState,
    /// Transaction whose outputs created this note
    pub produced_by: TransactionId,
    /// Transaction that consumed this note, once spent
    #[serde(default)]
    pub spent_by: Option<TransactionId>,
}

impl Note {
    pub fn pending(id: NoteId, output: OutputSpec, produced_by: TransactionId) -> Self {
        Self {
            id,
            owner: output.owner,
            value: output.value,
            state: NoteState::Pending,
            produced_by,
            spent_by: None,
        }
    }
}
