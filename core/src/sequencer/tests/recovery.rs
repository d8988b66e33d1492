use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cloak_note::{NoteState, TransactionState};

use super::harness::{A0, A1, A2, Harness, fast_config};
use crate::demo::demo_chain;
use crate::sequencer::{
    Chain, ChainError, ChainReport, Finality, MockOutcome, MockProofConstructor, NoteLedger,
    NoteRef, Sequencer, StepState, Transfer,
};

/// Deposit of 10 then a spend of it; the deposit never finalizes
async fn hung_deposit() -> (Harness, Chain, ChainReport) {
    let mut config = fast_config();
    config.waiter.timeout = Duration::from_millis(30);
    let h = Harness::with_config(config);
    h.fund(&A0, 10).await;
    h.bridge.push_outcome(MockOutcome::Hang).await;

    let chain = Chain::new(vec![
        Transfer::new(A0).output(A0, 10).public_value(-10),
        Transfer::new(A0).input(NoteRef::output(0, 0)).output(A1, 10),
    ])
    .unwrap();
    let report = h.run(&chain).await;
    assert_eq!(report.halted_at(), Some(0));
    (h, chain, report)
}

#[tokio::test]
async fn resumed_chain_finishes_after_revert() {
    let h = Harness::new();
    h.fund(&A0, 500).await;
    h.bridge.push_outcome(MockOutcome::Confirm).await;
    h.bridge.push_outcome(MockOutcome::Revert("stale root".into())).await;
    let chain = demo_chain(&[A0, A1, A2]).unwrap();

    let first = h.run(&chain).await;
    assert_eq!(first.halted_at(), Some(1));

    let rest = chain.resume(&first).unwrap();
    assert_eq!(rest.len(), 2);
    // step 1 now names the committed deposit notes directly
    let deposit = &first.steps[0].outputs;
    assert_eq!(
        rest.steps()[0].inputs,
        vec![NoteRef::note(deposit[0]), NoteRef::note(deposit[2])]
    );

    let second = h.run(&rest).await;
    assert!(second.is_complete());
    assert_eq!(h.bridge.balance_of(&A1).await, 89);
    assert_eq!(h.ledger.stats().pending, 0);
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");

    let h = Harness::new();
    h.fund(&A0, 500).await;
    h.bridge.push_outcome(MockOutcome::Confirm).await;
    h.bridge.push_outcome(MockOutcome::Revert("out of gas".into())).await;
    let chain = demo_chain(&[A0, A1, A2]).unwrap();
    let first = h.run(&chain).await;
    h.ledger.save(&path).unwrap();

    // fresh process: ledger from disk, same public side
    let ledger = Arc::new(NoteLedger::load(&path).unwrap());
    assert_eq!(ledger.len(), 4);
    let sequencer = Sequencer::with_bridge(
        Arc::clone(&ledger),
        Arc::new(MockProofConstructor::with_salt(b"restarted")),
        h.bridge.clone(),
        h.sequencer.config().clone(),
    );

    let rest = chain.resume(&first).unwrap();
    let report = sequencer.run(&rest, &CancellationToken::new()).await;

    assert!(report.is_complete());
    let deposit = ledger.resolve(&first.steps[0].outputs).unwrap();
    assert!(deposit.iter().all(|n| n.state == NoteState::Spent));
    assert_eq!(ledger.stats().confirmed, 4);
}

#[tokio::test]
async fn fully_committed_chain_resumes_empty() {
    let h = Harness::new();
    h.fund(&A0, 500).await;
    let chain = demo_chain(&[A0, A1, A2]).unwrap();
    let report = h.run(&chain).await;

    let rest = chain.resume(&report).unwrap();
    assert!(rest.is_empty());
    assert!(report.steps.iter().all(|s| s.state == StepState::Committed));
}

#[tokio::test]
async fn resume_rejects_foreign_report() {
    let h = Harness::new();
    let notes = h.seed(4, &[(A0, 10)]);
    let other = Chain::new(vec![Transfer::new(A0).input(notes[0]).output(A1, 10)]).unwrap();
    let report = h.run(&other).await;

    let chain = demo_chain(&[A0, A1, A2]).unwrap();
    assert!(matches!(chain.resume(&report), Err(ChainError::ReportMismatch)));
}

#[tokio::test]
async fn indeterminate_step_blocks_resume() {
    let (h, chain, report) = hung_deposit().await;

    assert!(matches!(
        chain.resume(&report),
        Err(ChainError::UnresolvedSubmission { step: 0 })
    ));
    assert_eq!(h.bridge.submissions().await.len(), 1);
    assert_eq!(h.ledger.stats().pending, 1);
}

#[tokio::test]
async fn settled_submission_resumes_without_resubmitting() {
    let (h, chain, mut report) = hung_deposit().await;
    let hung = h.bridge.submissions().await[0].clone();
    h.bridge.set_outcome(&hung, MockOutcome::Confirm).await;

    let finality = h.sequencer.settle(&mut report).await.unwrap();
    assert!(matches!(finality, Some(Finality::Confirmed(_))));
    assert_eq!(report.steps[0].state, StepState::Committed);
    assert!(report.pending.is_empty());

    let rest = chain.resume(&report).unwrap();
    assert_eq!(rest.len(), 1);
    assert!(h.run(&rest).await.is_complete());

    // the deposit went out once
    assert_eq!(h.bridge.submissions().await.len(), 2);
    assert_eq!(h.bridge.balance_of(&A0).await, 0);
    assert_eq!(h.ledger.stats().pending, 0);
}

#[tokio::test]
async fn settled_revert_discards_outputs() {
    let (h, chain, mut report) = hung_deposit().await;
    let hung = h.bridge.submissions().await[0].clone();
    h.bridge.set_outcome(&hung, MockOutcome::Revert("dropped".into())).await;

    let finality = h.sequencer.settle(&mut report).await.unwrap();
    assert_eq!(finality, Some(Finality::Reverted("dropped".into())));
    assert!(h.ledger.is_empty());
    assert_eq!(
        report.steps[0].transaction.as_ref().unwrap().state,
        TransactionState::Failed
    );

    // nothing of the deposit landed, so it is rebuilt
    assert_eq!(chain.resume(&report).unwrap().len(), 2);
}

#[tokio::test]
async fn settle_without_unresolved_step_is_noop() {
    let h = Harness::new();
    h.fund(&A0, 500).await;
    let mut report = h.run(&demo_chain(&[A0, A1, A2]).unwrap()).await;

    assert_eq!(h.sequencer.settle(&mut report).await.unwrap(), None);
}
