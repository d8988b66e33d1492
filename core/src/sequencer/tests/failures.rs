use std::sync::Arc;
use std::time::Duration;

use cloak_note::{NoteState, OutputSpec, TransactionId, TransactionState};

use super::harness::{A0, A1, A2, BRIDGE, Harness, fast_config};
use crate::sequencer::{
    Chain, ChainOutcome, ConfirmationError, ConstructionError, LedgerError, MockBridge, MockOutcome,
    MockProofConstructor, MockProofFault, NoteRef, Phase, StepError, StepState, SubmitError,
    SubmitFault, Transfer, ValidationError,
};

fn halted(outcome: &ChainOutcome) -> (usize, Phase, &StepError) {
    match outcome {
        ChainOutcome::Halted {
            step,
            phase,
            reason,
        } => (*step, *phase, reason),
        ChainOutcome::AllConfirmed => panic!("chain was expected to halt"),
    }
}

#[tokio::test]
async fn unbalanced_transfer_never_reaches_bridge() {
    let h = Harness::new();
    let notes = h.seed(1, &[(A0, 100), (A0, 200)]);

    let chain = Chain::new(vec![
        Transfer::new(A0)
            .input(notes[0])
            .input(notes[1])
            .output(A1, 100)
            .output(A2, 150),
    ])
    .unwrap();
    let report = h.run(&chain).await;

    let (step, phase, reason) = halted(&report.outcome);
    assert_eq!((step, phase), (0, Phase::Validate));
    assert_eq!(
        *reason,
        StepError::Validation(ValidationError::UnbalancedTransfer {
            inputs: 300,
            outputs: 250,
            public_value: 0
        })
    );
    assert!(h.bridge.submissions().await.is_empty());
    assert_eq!(report.unspent.len(), 2);
}

#[tokio::test]
async fn pending_input_is_not_ready() {
    let h = Harness::new();
    let pending = cloak_note::NoteId([7; 32]);
    h.ledger
        .register_pending(TransactionId([7; 32]), &[(pending, OutputSpec::new(A0, 10))])
        .unwrap();

    let chain = Chain::new(vec![Transfer::new(A0).input(pending).output(A1, 10)]).unwrap();
    let report = h.run(&chain).await;

    let (_, phase, reason) = halted(&report.outcome);
    assert_eq!(phase, Phase::Validate);
    assert_eq!(*reason, StepError::Validation(ValidationError::InputNotReady(pending)));
    assert_eq!(report.pending.len(), 1);
}

#[tokio::test]
async fn input_wait_blocks_until_external_confirmation() {
    let mut config = fast_config();
    config.input_wait = Duration::from_secs(2);
    let h = Harness::with_config(config);

    let note = cloak_note::NoteId([8; 32]);
    let producer = TransactionId([8; 32]);
    h.ledger
        .register_pending(producer, &[(note, OutputSpec::new(A0, 10))])
        .unwrap();

    let ledger = Arc::clone(&h.ledger);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        ledger.confirm(producer).unwrap();
    });

    let chain = Chain::new(vec![Transfer::new(A0).input(note).output(A1, 10)]).unwrap();
    let report = h.run(&chain).await;

    assert!(report.is_complete());
    assert_eq!(h.ledger.get(&note).unwrap().state, NoteState::Spent);
}

#[tokio::test]
async fn unknown_input_note() {
    let h = Harness::new();
    let missing = cloak_note::NoteId([9; 32]);

    let chain = Chain::new(vec![Transfer::new(A0).input(missing).output(A1, 1)]).unwrap();
    let report = h.run(&chain).await;

    let (_, _, reason) = halted(&report.outcome);
    assert_eq!(*reason, StepError::Validation(ValidationError::UnknownNote(missing)));
}

#[tokio::test]
async fn malformed_bundle_is_never_submitted() {
    let h = Harness::with_prover(Arc::new(MockProofConstructor::with_fault(
        MockProofFault::DropOutput,
    )));
    h.fund(&A0, 10).await;

    let chain = Chain::new(vec![
        Transfer::new(A0).output(A0, 4).output(A1, 6).public_value(-10),
    ])
    .unwrap();
    let report = h.run(&chain).await;

    let (_, phase, reason) = halted(&report.outcome);
    assert_eq!(phase, Phase::Construct);
    assert_eq!(
        *reason,
        StepError::Construction(ConstructionError::OutputCountMismatch {
            expected: 2,
            got: 1
        })
    );
    assert!(h.bridge.submissions().await.is_empty());
    assert!(h.ledger.is_empty());
}

#[tokio::test]
async fn transient_submission_is_retried() {
    let h = Harness::new();
    h.fund(&A0, 10).await;
    h.bridge.push_fault(SubmitFault::Transient("node restarting".into())).await;
    h.bridge.push_fault(SubmitFault::Transient("node restarting".into())).await;

    let chain = Chain::new(vec![Transfer::new(A0).output(A0, 10).public_value(-10)]).unwrap();
    let report = h.run(&chain).await;

    assert!(report.is_complete());
    assert_eq!(report.steps[0].attempts, 3);
}

#[tokio::test]
async fn transient_submission_gives_up_after_max_attempts() {
    let h = Harness::new();
    h.fund(&A0, 10).await;
    for _ in 0..3 {
        h.bridge.push_fault(SubmitFault::Transient("timeout".into())).await;
    }

    let chain = Chain::new(vec![Transfer::new(A0).output(A0, 10).public_value(-10)]).unwrap();
    let report = h.run(&chain).await;

    let (_, phase, reason) = halted(&report.outcome);
    assert_eq!(phase, Phase::Submit);
    assert!(matches!(
        reason,
        StepError::Submission {
            error: SubmitError::TransientSubmissionError(_),
            attempts: 3
        }
    ));
    assert_eq!(
        report.steps[0].transaction.as_ref().unwrap().state,
        TransactionState::Failed
    );
    assert!(h.ledger.is_empty());
}

#[tokio::test]
async fn missing_allowance_is_rejected_without_retry() {
    let h = Harness::new();
    h.bridge.fund(&A0, 500).await;

    let chain = Chain::new(vec![Transfer::new(A0).output(A0, 500).public_value(-500)]).unwrap();
    let report = h.run(&chain).await;

    let (_, phase, reason) = halted(&report.outcome);
    assert_eq!(phase, Phase::Submit);
    assert!(matches!(
        reason,
        StepError::Submission {
            error: SubmitError::RejectedBySender(_),
            attempts: 1
        }
    ));
    assert_eq!(report.steps[0].attempts, 1);
}

#[tokio::test]
async fn revert_halts_and_keeps_inputs_unspent() {
    let h = Harness::new();
    h.fund(&A0, 500).await;
    h.bridge.push_outcome(MockOutcome::Confirm).await;
    h.bridge.push_outcome(MockOutcome::Revert("proof rejected".into())).await;

    let chain = Chain::new(vec![
        Transfer::new(A0)
            .output(A0, 107)
            .output(A0, 83)
            .output(A1, 204)
            .output(A2, 106)
            .public_value(-500),
        Transfer::new(A0)
            .input(NoteRef::output(0, 0))
            .input(NoteRef::output(0, 2))
            .output(A0, 140)
            .output(A2, 171),
        Transfer::new(A1)
            .input(NoteRef::output(0, 1))
            .output(A1, 83),
    ])
    .unwrap();
    let report = h.run(&chain).await;

    let (step, phase, reason) = halted(&report.outcome);
    assert_eq!((step, phase), (1, Phase::AwaitConfirm));
    assert!(matches!(reason, StepError::Reverted { reason, .. } if reason == "proof rejected"));

    assert_eq!(report.steps[0].state, StepState::Committed);
    assert!(matches!(report.steps[1].state, StepState::Failed { .. }));
    assert_eq!(report.steps[2].state, StepState::NotStarted);
    assert_eq!(
        report.steps[1].transaction.as_ref().unwrap().state,
        TransactionState::Failed
    );

    // reverted outputs never entered the ledger as confirmed and were discarded
    assert_eq!(h.ledger.len(), 4);
    assert!(report.steps[1].outputs.is_empty());
    let inputs = h.ledger.resolve(&report.steps[1].inputs).unwrap();
    assert!(inputs.iter().all(|n| n.state == NoteState::Confirmed));
    assert_eq!(report.unspent.len(), 4);
    assert!(report.pending.is_empty());
}

#[tokio::test]
async fn unfinalized_submission_is_indeterminate() {
    let mut config = fast_config();
    config.waiter.timeout = Duration::from_millis(40);
    let h = Harness::with_config(config);
    h.fund(&A0, 10).await;
    h.bridge.push_outcome(MockOutcome::Hang).await;

    let chain = Chain::new(vec![
        Transfer::new(A0).output(A0, 10).public_value(-10),
        Transfer::new(A0).input(NoteRef::output(0, 0)).output(A1, 10),
    ])
    .unwrap();
    let report = h.run(&chain).await;

    let (step, phase, reason) = halted(&report.outcome);
    assert_eq!((step, phase), (0, Phase::AwaitConfirm));
    assert!(matches!(
        reason,
        StepError::Confirmation(ConfirmationError::IndeterminateState { .. })
    ));

    // outputs stay pending; nothing guesses at the outcome
    assert_eq!(
        report.steps[0].transaction.as_ref().unwrap().state,
        TransactionState::Submitted
    );
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.steps[1].state, StepState::NotStarted);
}

#[tokio::test]
async fn commit_refuses_inputs_spent_elsewhere() {
    // Several polls before finality, so the racer runs while the step waits
    let h = Harness::build(
        MockBridge::new(BRIDGE).with_confirm_after_polls(3),
        Arc::new(MockProofConstructor::new()),
        fast_config(),
    );
    let notes = h.seed(3, &[(A0, 10)]);
    let chain = Chain::new(vec![Transfer::new(A0).input(notes[0]).output(A1, 10)]).unwrap();

    // Spend the input once the transfer is in flight
    let ledger = Arc::clone(&h.ledger);
    let racer = tokio::spawn({
        let id = notes[0];
        async move {
            loop {
                if ledger.stats().pending > 0 {
                    return ledger.spend(&[id], TransactionId([0xEE; 32]));
                }
                tokio::task::yield_now().await;
            }
        }
    });
    let report = h.run(&chain).await;
    racer.await.unwrap().unwrap();

    let (_, phase, reason) = halted(&report.outcome);
    assert_eq!(phase, Phase::Commit);
    assert_eq!(*reason, StepError::Ledger(LedgerError::NoteAlreadySpent(notes[0])));
    // the lost race never promotes outputs
    assert_eq!(report.pending.len(), 1);
    // the bridge did finalize it, so it is not left for settling
    assert_eq!(
        report.steps[0].transaction.as_ref().unwrap().state,
        TransactionState::Confirmed
    );
}
