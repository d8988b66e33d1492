//! Confirmation Waiter
//!
//! Blocks a step until its submission is final on the public ledger.
//!
//! ```text
//! ┌────────────┐  status   ┌──────────────────────────────────────────┐
//! │   Waiter   │──────────▶│ pending / unknown  ──▶ sleep, poll again │
//! │            │           │ confirmed          ──▶ Confirmed(receipt)│
//! │            │           │ reverted           ──▶ Reverted(reason)  │
//! └────────────┘           └──────────────────────────────────────────┘
//!        │
//!        └── deadline passed ──▶ IndeterminateState (caller must halt)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cloak_note::SubmissionId;

use crate::sequencer::error::ConfirmationError;

/// Answer to an idempotent status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Confirmed { block: u64 },
    Reverted { reason: String },
    Unknown,
}

/// Read side of the bridge
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    async fn status(&self, submission: &SubmissionId) -> Result<SubmissionStatus>;
}

/// Proof of finality
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub submission: SubmissionId,
    pub block: u64,
    pub polls: u32,
}

/// Conclusive outcome of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finality {
    Confirmed(Receipt),
    Reverted(String),
}

/// Waiter configuration
#[derive(Debug, Clone, Copy)]
pub struct WaiterConfig {
    pub poll_interval: Duration,
    /// Default deadline used by [`ConfirmationWaiter::await_default`]
    pub timeout: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Polls a [`ConfirmationSource`] until a submission is final
#[derive(Clone)]
pub struct ConfirmationWaiter {
    source: Arc<dyn ConfirmationSource>,
    config: WaiterConfig,
}

impl ConfirmationWaiter {
    pub fn new(source: Arc<dyn ConfirmationSource>, config: WaiterConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &WaiterConfig {
        &self.config
    }

    pub async fn await_default(
        &self,
        submission: &SubmissionId,
    ) -> Result<Finality, ConfirmationError> {
        self.await_finality(submission, self.config.timeout).await
    }

    /// Wait until `submission` is confirmed or reverted, or `timeout` passes.
    pub async fn await_finality(
        &self,
        submission: &SubmissionId,
        timeout: Duration,
    ) -> Result<Finality, ConfirmationError> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let status = tokio::time::timeout(remaining, self.source.status(submission))
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("status query exceeded deadline")));
            match status {
                Ok(SubmissionStatus::Confirmed { block }) => {
                    info!(submission = %submission, block, polls, "Submission confirmed");
                    return Ok(Finality::Confirmed(Receipt {
                        submission: submission.clone(),
                        block,
                        polls,
                    }));
                }
                Ok(SubmissionStatus::Reverted { reason }) => {
                    warn!(submission = %submission, reason = %reason, "Submission reverted");
                    return Ok(Finality::Reverted(reason));
                }
                Ok(status) => {
                    debug!(submission = %submission, ?status, polls, "Awaiting finality");
                }
                Err(e) => {
                    warn!(submission = %submission, error = %e, "Status query failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConfirmationError::IndeterminateState {
                    submission: submission.clone(),
                    waited: now - start,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::anyhow;

    /// Plays back statuses; repeats the last one forever
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<SubmissionStatus>>>,
        last: SubmissionStatus,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<SubmissionStatus>>, last: SubmissionStatus) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last,
            })
        }
    }

    #[async_trait]
    impl ConfirmationSource for ScriptedSource {
        async fn status(&self, _submission: &SubmissionId) -> Result<SubmissionStatus> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.last.clone()))
        }
    }

    fn waiter(source: Arc<ScriptedSource>) -> ConfirmationWaiter {
        ConfirmationWaiter::new(
            source,
            WaiterConfig {
                poll_interval: Duration::from_millis(1),
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_confirms_after_pending() {
        let source = ScriptedSource::new(
            vec![
                Ok(SubmissionStatus::Unknown),
                Ok(SubmissionStatus::Pending),
                Err(anyhow!("node unavailable")),
            ],
            SubmissionStatus::Confirmed { block: 42 },
        );
        let id = SubmissionId::new("sub_1");

        let finality = waiter(source).await_default(&id).await.unwrap();
        assert_eq!(
            finality,
            Finality::Confirmed(Receipt {
                submission: id,
                block: 42,
                polls: 4
            })
        );
    }

    #[tokio::test]
    async fn test_reverted() {
        let source = ScriptedSource::new(
            vec![Ok(SubmissionStatus::Pending)],
            SubmissionStatus::Reverted {
                reason: "proof rejected".into(),
            },
        );
        let finality = waiter(source)
            .await_default(&SubmissionId::new("sub_1"))
            .await
            .unwrap();
        assert_eq!(finality, Finality::Reverted("proof rejected".into()));
    }

    #[tokio::test]
    async fn test_indeterminate_after_timeout() {
        let source = ScriptedSource::new(vec![], SubmissionStatus::Pending);
        let id = SubmissionId::new("sub_1");

        let err = waiter(source)
            .await_finality(&id, Duration::from_millis(20))
            .await
            .unwrap_err();
        let ConfirmationError::IndeterminateState { submission, waited } = err;
        assert_eq!(submission, id);
        assert!(waited >= Duration::from_millis(20));
    }

    /// Never answers a status query
    struct StalledSource;

    #[async_trait]
    impl ConfirmationSource for StalledSource {
        async fn status(&self, _submission: &SubmissionId) -> Result<SubmissionStatus> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_source_still_hits_deadline() {
        let waiter = ConfirmationWaiter::new(Arc::new(StalledSource), WaiterConfig::default());
        let id = SubmissionId::new("sub_1");

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            waiter.await_finality(&id, Duration::from_millis(50)),
        )
        .await
        .expect("waiter must give up at its own deadline");
        assert!(matches!(
            result,
            Err(ConfirmationError::IndeterminateState { .. })
        ));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&SubmissionStatus::Confirmed { block: 7 }).unwrap();
        assert_eq!(json, r#"{"status":"confirmed","block":7}"#);

        let status: SubmissionStatus = serde_json::from_str(r#"{"status":"unknown"}"#).unwrap();
        assert_eq!(status, SubmissionStatus::Unknown);
    }
}
