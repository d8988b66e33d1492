//! Transfers and Chains
//!
//! A [`Transfer`] is one logical join-split instruction. A [`Chain`] is an
//! ordered list of them where later steps may consume outputs of earlier ones.
//!
//! ```text
//!   step 0: [] ──────────────────▶ [o0, o1, o2, o3]   public_value = -500
//!   step 1: [Output{0,0}, Output{0,2}] ──▶ [o0, o1]   public_value = 0
//!   step 2: [Output{0,1}, Output{0,3}] ──▶ [o0, o1]   public_value = 89
//! ```
//!
//! References only point backwards. They are resolved to concrete note ids
//! once the producing step has committed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use cloak_note::{AccountId, NoteId, NoteValue, OutputSpec, TransactionState};

use super::error::{ChainError, ValidationError};
use super::report::{ChainReport, StepState};

/// Input reference of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoteRef {
    /// Note already present in the ledger
    Note { id: NoteId },
    /// `index`-th output of an earlier step in the same chain
    Output { step: usize, index: usize },
}

impl NoteRef {
    pub fn note(id: NoteId) -> Self {
        Self::Note { id }
    }

    pub fn output(step: usize, index: usize) -> Self {
        Self::Output { step, index }
    }
}

impl From<NoteId> for NoteRef {
    fn from(id: NoteId) -> Self {
        Self::note(id)
    }
}

/// One join-split instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Account authorizing the transfer and paying any deposit
    pub sender: AccountId,
    pub inputs: Vec<NoteRef>,
    pub outputs: Vec<OutputSpec>,
    /// Value released to (positive) or drawn from (negative) the public balance
    pub public_value: i64,
}

impl Transfer {
    pub fn new(sender: AccountId) -> Self {
        Self {
            sender,
            inputs: Vec::new(),
            outputs: Vec::new(),
            public_value: 0,
        }
    }

    pub fn input(mut self, input: impl Into<NoteRef>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn output(mut self, owner: AccountId, value: u64) -> Self {
        self.outputs.push(OutputSpec::new(owner, value));
        self
    }

    pub fn public_value(mut self, public_value: i64) -> Self {
        self.public_value = public_value;
        self
    }

    /// Public tokens the sender must have approved for the bridge
    pub fn deposit(&self) -> u64 {
        if self.public_value < 0 {
            self.public_value.unsigned_abs()
        } else {
            0
        }
    }
}

/// Check `sum(inputs) - sum(outputs) == public_value`.
///
/// Sums are taken in `i128`, so no combination of `u64` values can overflow.
pub fn check_balance(
    inputs: &[NoteValue],
    outputs: &[OutputSpec],
    public_value: i64,
) -> Result<(), ValidationError> {
    let total_in: i128 = inputs.iter().map(|v| i128::from(v.as_u64())).sum();
    let total_out: i128 = outputs.iter().map(|o| i128::from(o.value.as_u64())).sum();

    if total_in - total_out == i128::from(public_value) {
        return Ok(());
    }
    let narrow = |v: i128| u64::try_from(v).map_err(|_| ValidationError::ValueOverflow);
    Err(ValidationError::UnbalancedTransfer {
        inputs: narrow(total_in)?,
        outputs: narrow(total_out)?,
        public_value,
    })
}

/// Ordered, statically checked list of transfers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    steps: Vec<Transfer>,
}

impl Chain {
    /// Build a chain, rejecting forward references, out-of-range output
    /// indices, and any input consumed twice.
    pub fn new(steps: Vec<Transfer>) -> Result<Self, ChainError> {
        let mut consumed: HashSet<NoteRef> = HashSet::new();

        for (step, transfer) in steps.iter().enumerate() {
            for input in &transfer.inputs {
                if let NoteRef::Output { step: referenced, index } = *input {
                    if referenced >= step {
                        return Err(ChainError::ForwardReference { step, referenced });
                    }
                    if index >= steps[referenced].outputs.len() {
                        return Err(ChainError::OutputOutOfRange {
                            step,
                            referenced,
                            index,
                        });
                    }
                }
                if !consumed.insert(*input) {
                    return Err(ChainError::DuplicateInput { step });
                }
            }
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Transfer] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Chain of the steps `report` did not commit.
    ///
    /// References to committed steps become concrete note ids; references
    /// among the remaining steps are renumbered.
    pub fn resume(&self, report: &ChainReport) -> Result<Self, ChainError> {
        if report.steps.len() != self.steps.len() {
            return Err(ChainError::ReportMismatch);
        }

        let committed: Vec<bool> = report
            .steps
            .iter()
            .map(|s| matches!(s.state, StepState::Committed))
            .collect();
        let first_open = committed.iter().position(|done| !done).unwrap_or(self.steps.len());
        if committed[first_open..].iter().any(|done| *done) {
            return Err(ChainError::ReportMismatch);
        }
        // A submission may still land; rebuilding its step could pay twice
        let unresolved = report.steps[first_open..].iter().find(|s| {
            s.transaction
                .as_ref()
                .is_some_and(|tx| tx.state == TransactionState::Submitted)
        });
        if let Some(step) = unresolved {
            return Err(ChainError::UnresolvedSubmission { step: step.step });
        }

        let mut remaining = Vec::with_capacity(self.steps.len() - first_open);
        for transfer in &self.steps[first_open..] {
            let mut transfer = transfer.clone();
            for input in transfer.inputs.iter_mut() {
                let NoteRef::Output { step, index } = *input else {
                    continue;
                };
                if step < first_open {
                    let id = report.steps[step]
                        .outputs
                        .get(index)
                        .copied()
                        .ok_or(ChainError::ReportMismatch)?;
                    *input = NoteRef::note(id);
                } else {
                    *input = NoteRef::output(step - first_open, index);
                }
            }
            remaining.push(transfer);
        }

        Self::new(remaining)
    }
}
