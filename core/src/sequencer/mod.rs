pub mod bridge;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod proof;
pub mod report;
pub mod service;
pub mod settlement;
pub mod setup;
pub mod transfer;

pub use bridge::{
    BridgeClient, BridgeClientConfig, MockBridge, MockOutcome, PublicToken, SubmitFault,
};
pub use error::{
    ChainError, ConfirmationError, ConstructionError, LedgerError, StepError, SubmitError,
    ValidationError,
};
pub use ledger::{LedgerSnapshot, LedgerStats, NoteLedger};
pub use pipeline::{Sequencer, SequencerConfig};
pub use proof::{
    MockProofConstructor, MockProofFault, ProofBundle, ProofBundleParts, ProofConstructor,
    ProofRequest, check_bundle,
};
pub use report::{
    ChainOutcome, ChainReport, Phase, PhaseEvent, StepReport, StepState, TransactionSummary,
};
pub use service::{ChainHandle, SequencerService};
pub use settlement::{
    ConfirmationSource, ConfirmationWaiter, Finality, LedgerSubmitter, Receipt, RetryPolicy,
    SubmissionStatus, Submitted, WaiterConfig, submit_with_retry,
};
pub use setup::{PublicBalanceOp, SetupError, run_prerequisites};
pub use transfer::{Chain, NoteRef, Transfer, check_balance};

#[cfg(test)]
mod tests;
