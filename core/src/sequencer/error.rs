//! Error taxonomy for the sequencing engine
//!
//! Every failure a chain step can hit is one of these. Local validation and
//! construction errors never reach the network. Submission, confirmation and
//! ledger errors halt the chain at the step that raised them.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use cloak_note::{NoteId, SubmissionId, TransactionId};

/// Note ledger consistency errors
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum LedgerError {
    #[error("note identity {0} already present in ledger")]
    DuplicateIdentity(NoteId),

    #[error("transaction {0} already registered outputs")]
    TransactionAlreadyRegistered(TransactionId),

    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("unknown note {0}")]
    UnknownNote(NoteId),

    #[error("note {0} is not confirmed")]
    NoteNotConfirmed(NoteId),

    #[error("note {0} already spent (double-spend attempt)")]
    NoteAlreadySpent(NoteId),

    #[error("note {0} listed more than once in a single spend")]
    DuplicateInput(NoteId),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Local validation failures; never sent on-chain
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationError {
    #[error(
        "unbalanced transfer: inputs {inputs} - outputs {outputs} != public value {public_value}"
    )]
    UnbalancedTransfer {
        inputs: u64,
        outputs: u64,
        public_value: i64,
    },

    #[error("input note {0} is not confirmed")]
    InputNotReady(NoteId),

    #[error("input note {0} is already spent")]
    InputSpent(NoteId),

    #[error("unknown note {0}")]
    UnknownNote(NoteId),

    #[error("output {index} of step {step} has not been committed")]
    UnresolvedReference { step: usize, index: usize },

    #[error("note values overflow")]
    ValueOverflow,
}

/// Proof bundle postcondition violations; the bundle is never submitted
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum ConstructionError {
    #[error("proof constructor failed: {0}")]
    Prover(String),

    #[error("bundle carries {got} note identities for {expected} outputs")]
    OutputCountMismatch { expected: usize, got: usize },

    #[error("bundle repeats note identity {0}")]
    DuplicateNoteIdentity(NoteId),

    #[error("bundle note identity {0} already exists in the ledger")]
    IdentityInLedger(NoteId),

    #[error("bundle output owner at index {index} does not match the requested owner")]
    OwnerMismatch { index: usize },

    #[error("bundle public value {got} does not match requested {expected}")]
    PublicValueMismatch { expected: i64, got: i64 },
}

/// Bridge submission failures
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum SubmitError {
    /// Authorization or balance failure reported synchronously; not retried
    #[error("rejected by sender: {0}")]
    RejectedBySender(String),

    /// Failure before the bridge accepted the bundle; safe to retry
    #[error("transient submission error: {0}")]
    TransientSubmissionError(String),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientSubmissionError(_))
    }
}

/// Finality could not be established
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum ConfirmationError {
    #[error("submission {submission} neither confirmed nor reverted after {waited:?}")]
    IndeterminateState {
        submission: SubmissionId,
        waited: Duration,
    },
}

/// Structural problems in a chain definition
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum ChainError {
    #[error("step {step} references outputs of step {referenced}, which does not precede it")]
    ForwardReference { step: usize, referenced: usize },

    #[error("step {step} references output {index} of step {referenced}, which has fewer outputs")]
    OutputOutOfRange {
        step: usize,
        referenced: usize,
        index: usize,
    },

    #[error("step {step} consumes an input already consumed earlier in the chain")]
    DuplicateInput { step: usize },

    #[error("report does not belong to this chain")]
    ReportMismatch,

    #[error("step {step} was submitted but never finalized; settle it before resuming")]
    UnresolvedSubmission { step: usize },
}

/// Why a chain step failed
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum StepError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error("submission failed after {attempts} attempt(s): {error}")]
    Submission { error: SubmitError, attempts: u32 },

    #[error("submission {submission} reverted: {reason}")]
    Reverted {
        submission: SubmissionId,
        reason: String,
    },

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("chain cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::UnbalancedTransfer {
            inputs: 300,
            outputs: 250,
            public_value: 0,
        };
        assert_eq!(
            err.to_string(),
            "unbalanced transfer: inputs 300 - outputs 250 != public value 0"
        );

        let err = StepError::Submission {
            error: SubmitError::RejectedBySender("insufficient allowance".into()),
            attempts: 1,
        };
        assert_eq!(
            err.to_string(),
            "submission failed after 1 attempt(s): rejected by sender: insufficient allowance"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(SubmitError::TransientSubmissionError("timeout".into()).is_retryable());
        assert!(!SubmitError::RejectedBySender("allowance".into()).is_retryable());
    }
}
