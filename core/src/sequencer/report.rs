//! Chain reports
//!
//! What a caller gets back from a chain run: the terminal state of every step,
//! the phase timeline, and the notes left behind for manual recovery.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cloak_note::{Note, NoteId, SubmissionId, TransactionId, TransactionState};

use super::error::StepError;
use super::settlement::Receipt;

/// Per-step state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Construct,
    Submit,
    AwaitConfirm,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validate => "validate",
            Phase::Construct => "construct",
            Phase::Submit => "submit",
            Phase::AwaitConfirm => "await_confirm",
            Phase::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// A step entering a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseEvent {
    pub step: usize,
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

/// Terminal state of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    NotStarted,
    Committed,
    Failed { phase: Phase, error: StepError },
}

/// On-ledger transaction behind a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub submission: Option<SubmissionId>,
    pub state: TransactionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub state: StepState,
    pub transaction: Option<TransactionSummary>,
    /// Input note ids after reference resolution
    pub inputs: Vec<NoteId>,
    /// Output note ids recorded in the ledger
    pub outputs: Vec<NoteId>,
    /// Submission attempts made
    pub attempts: u32,
    pub receipt: Option<Receipt>,
}

impl StepReport {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            state: StepState::NotStarted,
            transaction: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attempts: 0,
            receipt: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == StepState::Committed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChainOutcome {
    AllConfirmed,
    Halted {
        step: usize,
        phase: Phase,
        reason: StepError,
    },
}

/// Result of running a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub outcome: ChainOutcome,
    pub steps: Vec<StepReport>,
    pub timeline: Vec<PhaseEvent>,
    /// Chain-touched notes still `Confirmed`, available to a corrective chain
    pub unspent: Vec<Note>,
    /// Chain-touched notes still `Pending`
    pub pending: Vec<Note>,
}

impl ChainReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == ChainOutcome::AllConfirmed
    }

    /// Step the chain halted at, if any
    pub fn halted_at(&self) -> Option<usize> {
        match self.outcome {
            ChainOutcome::AllConfirmed => None,
            ChainOutcome::Halted { step, .. } => Some(step),
        }
    }

    pub fn committed(&self) -> usize {
        self.steps.iter().filter(|s| s.is_committed()).count()
    }

    /// Phases entered by `step`, in order
    pub fn phases_of(&self, step: usize) -> Vec<Phase> {
        self.timeline
            .iter()
            .filter(|e| e.step == step)
            .map(|e| e.phase)
            .collect()
    }

    /// Single-line summary for logs
    pub fn summary(&self) -> String {
        match &self.outcome {
            ChainOutcome::AllConfirmed => format!(
                "all {} step(s) confirmed; {} unspent note(s)",
                self.steps.len(),
                self.unspent.len()
            ),
            ChainOutcome::Halted {
                step,
                phase,
                reason,
            } => format!(
                "halted at step {step} ({phase}): {reason}; {}/{} committed, {} unspent, {} pending",
                self.committed(),
                self.steps.len(),
                self.unspent.len(),
                self.pending.len()
            ),
        }
    }
}
