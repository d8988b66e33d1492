//! Chain Sequencer
//!
//! Drives an ordered chain of transfers through the per-step state machine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Chain Sequencer                              │
//! │                                                                         │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────────┐   ┌────────┐
//! │  │ Validate │──▶│ Construct │──▶│  Submit  │──▶│ AwaitConfirm │──▶│ Commit │
//! │  └──────────┘   └───────────┘   └──────────┘   └──────────────┘   └────────┘
//! │       │               │              │                │               │
//! │   balance +       proof +         retry on        confirmed /     spend inputs
//! │   inputs          postcondition   transient       reverted /      then confirm
//! │   confirmed       check           failures        indeterminate   outputs
//! │                                                                         │
//! │  Step i+1 never enters Validate before step i finished Commit.         │
//! │  Cancellation is observed only between steps.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A halted chain is never rolled back. The report says exactly which steps
//! committed and which notes are left over.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cloak_note::{AccountId, Note, NoteId, NoteState, TransactionState};

use super::error::{ConstructionError, StepError, ValidationError};
use super::ledger::NoteLedger;
use super::proof::{ProofConstructor, ProofRequest, check_bundle};
use super::report::{
    ChainOutcome, ChainReport, Phase, PhaseEvent, StepReport, StepState, TransactionSummary,
};
use super::settlement::{
    ConfirmationSource, ConfirmationWaiter, Finality, LedgerSubmitter, RetryPolicy, WaiterConfig,
    submit_with_retry,
};
use super::transfer::{Chain, NoteRef, Transfer, check_balance};

// ============================================================================
// Configuration
// ============================================================================

/// Sequencer configuration
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Bridge contract address proofs are bound to
    pub bridge: AccountId,
    /// Submission retry policy
    pub retry: RetryPolicy,
    /// Confirmation polling and deadline
    pub waiter: WaiterConfig,
    /// How long Validate waits for inputs confirmed outside this chain.
    /// Zero means inputs must already be confirmed.
    pub input_wait: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            bridge: AccountId([0u8; 20]),
            retry: RetryPolicy::default(),
            waiter: WaiterConfig::default(),
            input_wait: Duration::ZERO,
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Bookkeeping for one chain run
struct ChainRun {
    steps: Vec<StepReport>,
    timeline: Vec<PhaseEvent>,
    phase: Phase,
    outcome: ChainOutcome,
}

impl ChainRun {
    fn new(len: usize) -> Self {
        Self {
            steps: (0..len).map(StepReport::new).collect(),
            timeline: Vec::new(),
            phase: Phase::Validate,
            outcome: ChainOutcome::AllConfirmed,
        }
    }

    fn enter(&mut self, step: usize, phase: Phase) {
        debug!(step, %phase, "Entering phase");
        self.phase = phase;
        self.timeline.push(PhaseEvent {
            step,
            phase,
            at: Utc::now(),
        });
    }

    fn set_transaction(&mut self, step: usize, state: TransactionState) {
        set_state(&mut self.steps[step], state);
    }

    fn halt(&mut self, step: usize, phase: Phase, reason: StepError) {
        if reason != StepError::Cancelled {
            self.steps[step].state = StepState::Failed {
                phase,
                error: reason.clone(),
            };
        }
        self.outcome = ChainOutcome::Halted {
            step,
            phase,
            reason,
        };
    }

    /// Output ids of a committed step
    fn resolve(&self, input: &NoteRef) -> Result<NoteId, ValidationError> {
        match *input {
            NoteRef::Note { id } => Ok(id),
            NoteRef::Output { step, index } => self
                .steps
                .get(step)
                .filter(|s| s.is_committed())
                .and_then(|s| s.outputs.get(index).copied())
                .ok_or(ValidationError::UnresolvedReference { step, index }),
        }
    }

    fn finish(self, ledger: &NoteLedger) -> ChainReport {
        let (unspent, pending) = leftovers(&self.steps, ledger);
        ChainReport {
            outcome: self.outcome,
            steps: self.steps,
            timeline: self.timeline,
            unspent,
            pending,
        }
    }
}

fn set_state(step: &mut StepReport, state: TransactionState) {
    if let Some(tx) = step.transaction.as_mut() {
        tx.state = state;
    }
}

/// Chain-touched notes still `Confirmed` and still `Pending`
fn leftovers(steps: &[StepReport], ledger: &NoteLedger) -> (Vec<Note>, Vec<Note>) {
    let mut seen = HashSet::new();
    let mut unspent = Vec::new();
    let mut pending = Vec::new();

    let touched = steps
        .iter()
        .flat_map(|s| s.inputs.iter().chain(s.outputs.iter()));
    for id in touched {
        if !seen.insert(*id) {
            continue;
        }
        match ledger.get(id) {
            Some(note) if note.state == NoteState::Confirmed => unspent.push(note),
            Some(note) if note.state == NoteState::Pending => pending.push(note),
            _ => {}
        }
    }
    (unspent, pending)
}

// ============================================================================
// Sequencer
// ============================================================================

/// Runs chains against a shared note ledger
pub struct Sequencer {
    ledger: Arc<NoteLedger>,
    prover: Arc<dyn ProofConstructor>,
    submitter: Arc<dyn LedgerSubmitter>,
    waiter: ConfirmationWaiter,
    config: SequencerConfig,
}

impl Sequencer {
    pub fn new(
        ledger: Arc<NoteLedger>,
        prover: Arc<dyn ProofConstructor>,
        submitter: Arc<dyn LedgerSubmitter>,
        source: Arc<dyn ConfirmationSource>,
        config: SequencerConfig,
    ) -> Self {
        let waiter = ConfirmationWaiter::new(source, config.waiter);
        Self {
            ledger,
            prover,
            submitter,
            waiter,
            config,
        }
    }

    /// Use one bridge for both submission and confirmation
    pub fn with_bridge<B>(
        ledger: Arc<NoteLedger>,
        prover: Arc<dyn ProofConstructor>,
        bridge: Arc<B>,
        config: SequencerConfig,
    ) -> Self
    where
        B: LedgerSubmitter + ConfirmationSource + 'static,
    {
        let submitter: Arc<dyn LedgerSubmitter> = bridge.clone();
        Self::new(ledger, prover, submitter, bridge, config)
    }

    pub fn ledger(&self) -> &Arc<NoteLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn waiter(&self) -> &ConfirmationWaiter {
        &self.waiter
    }

    /// Run `chain` to completion or to the first failing step.
    pub async fn run(&self, chain: &Chain, cancel: &CancellationToken) -> ChainReport {
        let mut run = ChainRun::new(chain.len());
        info!(steps = chain.len(), "Starting chain");

        for (step, transfer) in chain.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(step, "Chain cancelled before step");
                run.halt(step, Phase::Validate, StepError::Cancelled);
                break;
            }

            if let Err(e) = self.run_step(step, transfer, &mut run).await {
                let phase = run.phase;
                error!(step, %phase, error = %e, "Chain halted");
                run.halt(step, phase, e);
                break;
            }
            info!(step, "Step committed");
        }

        let report = run.finish(&self.ledger);
        info!(summary = %report.summary(), "Chain finished");
        report
    }

    /// Wait once more for a step whose confirmation was indeterminate.
    ///
    /// A confirmed submission is committed exactly as Commit would have done
    /// it. A reverted one has its pending outputs discarded. Afterwards the
    /// report can be passed to [`Chain::resume`]. The outcome keeps describing
    /// the original run unless every step is now committed.
    pub async fn settle(&self, report: &mut ChainReport) -> Result<Option<Finality>, StepError> {
        let unresolved = report.steps.iter().position(|s| {
            s.transaction
                .as_ref()
                .is_some_and(|tx| tx.state == TransactionState::Submitted)
        });
        let Some(step) = unresolved else {
            return Ok(None);
        };
        let entry = &mut report.steps[step];
        let Some((tx, submission)) = entry
            .transaction
            .as_ref()
            .and_then(|t| t.submission.clone().map(|s| (t.id, s)))
        else {
            return Ok(None);
        };

        info!(step, submission = %submission, "Settling unresolved submission");
        let finality = self
            .waiter
            .await_finality(&submission, self.config.waiter.timeout)
            .await?;
        match &finality {
            Finality::Confirmed(receipt) => {
                entry.receipt = Some(receipt.clone());
                set_state(entry, TransactionState::Confirmed);
                self.ledger.spend(&entry.inputs, tx)?;
                self.ledger.confirm(tx)?;
                entry.state = StepState::Committed;
            }
            Finality::Reverted(reason) => {
                self.ledger.discard_pending(tx)?;
                entry.outputs.clear();
                entry.state = StepState::Failed {
                    phase: Phase::AwaitConfirm,
                    error: StepError::Reverted {
                        submission: submission.clone(),
                        reason: reason.clone(),
                    },
                };
                set_state(entry, TransactionState::Failed);
            }
        }

        if report.steps.iter().all(StepReport::is_committed) {
            report.outcome = ChainOutcome::AllConfirmed;
        }
        (report.unspent, report.pending) = leftovers(&report.steps, &self.ledger);
        Ok(Some(finality))
    }

    async fn run_step(
        &self,
        step: usize,
        transfer: &Transfer,
        run: &mut ChainRun,
    ) -> Result<(), StepError> {
        // Validate
        run.enter(step, Phase::Validate);
        let input_ids = transfer
            .inputs
            .iter()
            .map(|input| run.resolve(input))
            .collect::<Result<Vec<_>, _>>()?;
        run.steps[step].inputs = input_ids.clone();

        let inputs = self
            .ledger
            .wait_confirmed(&input_ids, self.config.input_wait)
            .await?;
        let values: Vec<_> = inputs.iter().map(|n| n.value).collect();
        check_balance(&values, &transfer.outputs, transfer.public_value)?;

        // Construct
        run.enter(step, Phase::Construct);
        let request = ProofRequest {
            inputs,
            outputs: transfer.outputs.clone(),
            public_value: transfer.public_value,
            sender: transfer.sender,
            bridge: self.config.bridge,
        };
        let bundle = self
            .prover
            .build(&request)
            .map_err(|e| ConstructionError::Prover(format!("{e:#}")))?;
        check_bundle(&bundle, &request, &self.ledger)?;
        let tx = bundle.transaction_id();
        run.steps[step].transaction = Some(TransactionSummary {
            id: tx,
            submission: None,
            state: TransactionState::Built,
        });
        debug!(step, tx = %tx.short(), outputs = bundle.note_ids().len(), "Bundle built");

        // Submit
        run.enter(step, Phase::Submit);
        let submitted = submit_with_retry(
            self.submitter.as_ref(),
            &self.config.retry,
            &transfer.sender,
            &bundle,
        )
        .await
        .inspect_err(|e| {
            if let StepError::Submission { attempts, .. } = e {
                run.steps[step].attempts = *attempts;
            }
            run.set_transaction(step, TransactionState::Failed);
        })?;
        run.steps[step].attempts = submitted.attempts;
        if let Some(summary) = run.steps[step].transaction.as_mut() {
            summary.submission = Some(submitted.id.clone());
            summary.state = TransactionState::Submitted;
        }

        let outputs: Vec<_> = bundle
            .note_ids()
            .iter()
            .copied()
            .zip(transfer.outputs.iter().copied())
            .collect();
        self.ledger.register_pending(tx, &outputs)?;
        run.steps[step].outputs = bundle.note_ids().to_vec();

        // AwaitConfirm
        run.enter(step, Phase::AwaitConfirm);
        let finality = self
            .waiter
            .await_finality(&submitted.id, self.config.waiter.timeout)
            .await?;
        let receipt = match finality {
            Finality::Confirmed(receipt) => receipt,
            Finality::Reverted(reason) => {
                let discarded = self.ledger.discard_pending(tx)?;
                debug!(step, discarded = discarded.len(), "Discarded reverted outputs");
                run.steps[step].outputs.clear();
                run.set_transaction(step, TransactionState::Failed);
                return Err(StepError::Reverted {
                    submission: submitted.id,
                    reason,
                });
            }
        };
        run.steps[step].receipt = Some(receipt);
        run.set_transaction(step, TransactionState::Confirmed);

        // Commit: spend before confirm, so a lost race never promotes outputs
        run.enter(step, Phase::Commit);
        self.ledger.spend(&input_ids, tx)?;
        self.ledger.confirm(tx)?;
        run.steps[step].state = StepState::Committed;
        Ok(())
    }
}
