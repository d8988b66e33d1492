use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cloak_note::SubmissionId;

use super::harness::{A0, A1, A2, Harness};
use crate::demo::demo_chain;
use crate::sequencer::{
    ChainOutcome, ConfirmationSource, MockBridge, Phase, SequencerService, StepError, StepState,
    SubmissionStatus,
};

/// Cancels `token` the first time a status is queried
struct CancelOnPoll {
    inner: Arc<MockBridge>,
    token: CancellationToken,
}

#[async_trait]
impl ConfirmationSource for CancelOnPoll {
    async fn status(&self, submission: &SubmissionId) -> Result<SubmissionStatus> {
        self.token.cancel();
        self.inner.status(submission).await
    }
}

#[tokio::test]
async fn cancelled_before_start() {
    let h = Harness::new();
    let chain = demo_chain(&[A0, A1, A2]).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let report = h.sequencer.run(&chain, &token).await;

    assert_eq!(
        report.outcome,
        ChainOutcome::Halted {
            step: 0,
            phase: Phase::Validate,
            reason: StepError::Cancelled
        }
    );
    assert!(report.timeline.is_empty());
    assert!(h.bridge.submissions().await.is_empty());
}

#[tokio::test]
async fn cancellation_waits_for_step_boundary() {
    let h = Harness::new();
    h.fund(&A0, 500).await;
    let chain = demo_chain(&[A0, A1, A2]).unwrap();
    let token = CancellationToken::new();
    let sequencer = h.with_source(Arc::new(CancelOnPoll {
        inner: h.bridge.clone(),
        token: token.clone(),
    }));

    // cancelled while step 0 awaits confirmation
    let report = sequencer.run(&chain, &token).await;

    assert_eq!(report.steps[0].state, StepState::Committed);
    assert_eq!(report.steps[1].state, StepState::NotStarted);
    assert_eq!(report.halted_at(), Some(1));
    assert!(matches!(
        report.outcome,
        ChainOutcome::Halted {
            reason: StepError::Cancelled,
            ..
        }
    ));
    assert!(report.phases_of(1).is_empty());
    assert_eq!(report.unspent.len(), 4);
}

#[tokio::test]
async fn service_handle_cancels_chain() {
    let h = Harness::new();
    h.fund(&A0, 500).await;
    let service = SequencerService::new(Arc::clone(&h.sequencer));

    let handle = service.spawn(demo_chain(&[A0, A1, A2]).unwrap());
    handle.cancel();
    let report = handle.report().await.unwrap();

    // the spawned task had not started yet, so nothing ran
    assert_eq!(report.halted_at(), Some(0));
    assert_eq!(report.committed(), 0);
}

#[tokio::test]
async fn service_shutdown_cancels_children() {
    let h = Harness::new();
    let service = SequencerService::new(Arc::clone(&h.sequencer));

    service.shutdown();
    let report = service
        .spawn(demo_chain(&[A0, A1, A2]).unwrap())
        .report()
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        ChainOutcome::Halted {
            reason: StepError::Cancelled,
            ..
        }
    ));
}
