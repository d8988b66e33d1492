//! Ledger Submitter
//!
//! Hands a proof bundle to the bridge and obtains a submission id.
//!
//! ```text
//!   submit ──▶ Ok(id) ─────────────────────────────▶ Submitted { id, attempts }
//!     │
//!     ├──▶ TransientSubmissionError ──▶ backoff ──▶ submit (until max_attempts)
//!     │
//!     └──▶ RejectedBySender ─────────────────────────▶ escalate, no retry
//! ```
//!
//! A transient failure happened before the bridge accepted anything, so a
//! retry cannot double-submit. A rejection will not change without outside
//! action, so it is never retried.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use cloak_note::{AccountId, SubmissionId};

use crate::sequencer::error::{StepError, SubmitError};
use crate::sequencer::proof::ProofBundle;

/// Bridge write path for confidential transfers
#[async_trait]
pub trait LedgerSubmitter: Send + Sync {
    /// Request inclusion of `bundle`, sent by `sender`
    async fn submit(
        &self,
        sender: &AccountId,
        bundle: &ProofBundle,
    ) -> Result<SubmissionId, SubmitError>;
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Bounded exponential backoff for transient submission failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Submit once and never retry
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: SubmissionId,
    pub attempts: u32,
}

/// Submit with retries per `policy`.
///
/// Returns [`StepError::Submission`] carrying the last error and the number of
/// attempts made.
pub async fn submit_with_retry(
    submitter: &dyn LedgerSubmitter,
    policy: &RetryPolicy,
    sender: &AccountId,
    bundle: &ProofBundle,
) -> Result<Submitted, StepError> {
    let max_attempts = policy.max_attempts.max(1);
    let tx = bundle.transaction_id();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match submitter.submit(sender, bundle).await {
            Ok(id) => {
                info!(tx = %tx.short(), submission = %id, attempt, "Submission accepted");
                return Ok(Submitted { id, attempts: attempt });
            }
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    tx = %tx.short(),
                    attempt,
                    max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient submission failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                debug!(tx = %tx.short(), attempt, error = %error, "Submission failed");
                return Err(StepError::Submission {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use cloak_note::OutputSpec;

    use crate::sequencer::proof::{MockProofConstructor, ProofConstructor, ProofRequest};

    /// Plays back scripted results, then succeeds
    struct ScriptedSubmitter {
        script: Mutex<VecDeque<SubmitError>>,
        calls: AtomicU32,
    }

    impl ScriptedSubmitter {
        fn new(script: Vec<SubmitError>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerSubmitter for ScriptedSubmitter {
        async fn submit(
            &self,
            _sender: &AccountId,
            _bundle: &ProofBundle,
        ) -> Result<SubmissionId, SubmitError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(error) => Err(error),
                None => Ok(SubmissionId::new(format!("sub_{n}"))),
            }
        }
    }

    fn bundle() -> ProofBundle {
        MockProofConstructor::new()
            .build(&ProofRequest {
                inputs: vec![],
                outputs: vec![OutputSpec::new(AccountId([1; 20]), 10)],
                public_value: -10,
                sender: AccountId([1; 20]),
                bridge: AccountId([9; 20]),
            })
            .unwrap()
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn transient() -> SubmitError {
        SubmitError::TransientSubmissionError("connection reset".into())
    }

    #[test]
    fn test_delay_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(60), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let submitter = ScriptedSubmitter::new(vec![transient(), transient()]);
        let sender = AccountId([1; 20]);

        let submitted = submit_with_retry(&submitter, &fast_policy(5), &sender, &bundle())
            .await
            .unwrap();

        assert_eq!(submitted.attempts, 3);
        assert_eq!(submitted.id.as_str(), "sub_2");
    }

    #[tokio::test]
    async fn test_transient_exhausts_attempts() {
        let submitter = ScriptedSubmitter::new(vec![transient(); 4]);
        let sender = AccountId([1; 20]);

        let err = submit_with_retry(&submitter, &fast_policy(3), &sender, &bundle())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StepError::Submission {
                error: transient(),
                attempts: 3
            }
        );
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let rejected = SubmitError::RejectedBySender("insufficient allowance".into());
        let submitter = ScriptedSubmitter::new(vec![rejected.clone()]);
        let sender = AccountId([1; 20]);

        let err = submit_with_retry(&submitter, &fast_policy(5), &sender, &bundle())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StepError::Submission {
                error: rejected,
                attempts: 1
            }
        );
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 1);
    }
}
