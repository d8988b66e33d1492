//! In-memory bridge for tests and the demo
//!
//! Tracks public balances and allowances the way the bridge contract would.
//! Submissions are finalized on a later status poll, at which point their
//! public effects are applied. Faults and outcomes can be scripted.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use cloak_note::{AccountId, SubmissionId};

use super::PublicToken;
use crate::sequencer::error::SubmitError;
use crate::sequencer::proof::ProofBundle;
use crate::sequencer::settlement::{ConfirmationSource, LedgerSubmitter, SubmissionStatus};

/// Scripted failure of the next `submit` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFault {
    Transient(String),
    Reject(String),
}

/// Scripted fate of the next accepted confidential transfer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockOutcome {
    #[default]
    Confirm,
    Revert(String),
    /// Never finalizes
    Hang,
}

#[derive(Debug, Clone)]
enum Effect {
    Transfer {
        sender: AccountId,
        deposit: u128,
        release: u128,
    },
    Mint {
        to: AccountId,
        amount: u128,
    },
    Approve {
        owner: AccountId,
        spender: AccountId,
        amount: u128,
    },
}

#[derive(Debug)]
struct MockSubmission {
    effect: Effect,
    outcome: MockOutcome,
    polls: u32,
    status: SubmissionStatus,
}

#[derive(Debug, Default)]
struct MockState {
    balances: HashMap<AccountId, u128>,
    /// (owner, spender) -> remaining allowance
    allowances: HashMap<(AccountId, AccountId), u128>,
    submissions: HashMap<SubmissionId, MockSubmission>,
    order: Vec<SubmissionId>,
    faults: VecDeque<SubmitFault>,
    outcomes: VecDeque<MockOutcome>,
    next_id: u64,
    block: u64,
}

impl MockState {
    fn balance(&self, account: &AccountId) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> u128 {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    fn record(&mut self, effect: Effect, outcome: MockOutcome) -> SubmissionId {
        let id = SubmissionId::new(format!("mock_tx_{}", self.next_id));
        self.next_id += 1;
        self.submissions.insert(
            id.clone(),
            MockSubmission {
                effect,
                outcome,
                polls: 0,
                status: SubmissionStatus::Pending,
            },
        );
        self.order.push(id.clone());
        id
    }

    /// Apply an effect at finality; `Err` is the revert reason
    fn apply(&mut self, effect: &Effect, bridge: &AccountId) -> Result<(), String> {
        match effect {
            Effect::Transfer {
                sender,
                deposit,
                release,
            } => {
                if *deposit > 0 {
                    let allowance = self.allowance(sender, bridge);
                    let balance = self.balance(sender);
                    if allowance < *deposit || balance < *deposit {
                        return Err("insufficient allowance or balance at execution".into());
                    }
                    self.allowances.insert((*sender, *bridge), allowance - deposit);
                    self.balances.insert(*sender, balance - deposit);
                }
                *self.balances.entry(*sender).or_default() += release;
            }
            Effect::Mint { to, amount } => {
                *self.balances.entry(*to).or_default() += amount;
            }
            Effect::Approve {
                owner,
                spender,
                amount,
            } => {
                self.allowances.insert((*owner, *spender), *amount);
            }
        }
        Ok(())
    }
}

/// In-memory stand-in for the bridge contract and token
pub struct MockBridge {
    address: AccountId,
    scaling_factor: u128,
    /// Status polls before a submission finalizes
    confirm_after_polls: u32,
    state: Mutex<MockState>,
}

impl MockBridge {
    pub fn new(address: AccountId) -> Self {
        Self {
            address,
            scaling_factor: 1,
            confirm_after_polls: 1,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_scaling_factor(mut self, scaling_factor: u128) -> Self {
        self.scaling_factor = scaling_factor.max(1);
        self
    }

    pub fn with_confirm_after_polls(mut self, polls: u32) -> Self {
        self.confirm_after_polls = polls.max(1);
        self
    }

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn scaling_factor(&self) -> u128 {
        self.scaling_factor
    }

    /// Credit a public balance directly, outside any submission
    pub async fn fund(&self, account: &AccountId, amount: u128) {
        *self.state.lock().await.balances.entry(*account).or_default() += amount;
    }

    /// Set an allowance directly, outside any submission
    pub async fn set_allowance(&self, owner: &AccountId, spender: &AccountId, amount: u128) {
        self.state
            .lock()
            .await
            .allowances
            .insert((*owner, *spender), amount);
    }

    pub async fn balance_of(&self, account: &AccountId) -> u128 {
        self.state.lock().await.balance(account)
    }

    pub async fn allowance(&self, owner: &AccountId, spender: &AccountId) -> u128 {
        self.state.lock().await.allowance(owner, spender)
    }

    /// Queue a failure for an upcoming `submit`
    pub async fn push_fault(&self, fault: SubmitFault) {
        self.state.lock().await.faults.push_back(fault);
    }

    /// Queue the fate of an upcoming accepted transfer
    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.state.lock().await.outcomes.push_back(outcome);
    }

    /// Submission ids in acceptance order
    /// Re-script a submission that has not finalized yet
    pub async fn set_outcome(&self, submission: &SubmissionId, outcome: MockOutcome) {
        if let Some(entry) = self.state.lock().await.submissions.get_mut(submission) {
            entry.outcome = outcome;
        }
    }

    pub async fn submissions(&self) -> Vec<SubmissionId> {
        self.state.lock().await.order.clone()
    }
}

#[async_trait]
impl LedgerSubmitter for MockBridge {
    async fn submit(
        &self,
        sender: &AccountId,
        bundle: &ProofBundle,
    ) -> Result<SubmissionId, SubmitError> {
        let mut state = self.state.lock().await;

        match state.faults.pop_front() {
            Some(SubmitFault::Transient(msg)) => {
                return Err(SubmitError::TransientSubmissionError(msg));
            }
            Some(SubmitFault::Reject(msg)) => return Err(SubmitError::RejectedBySender(msg)),
            None => {}
        }

        let amount = u128::from(bundle.public_value().unsigned_abs()) * self.scaling_factor;
        let (deposit, release) = if bundle.public_value() < 0 {
            (amount, 0)
        } else {
            (0, amount)
        };

        if deposit > 0 {
            let allowance = state.allowance(sender, &self.address);
            if allowance < deposit {
                return Err(SubmitError::RejectedBySender(format!(
                    "insufficient allowance: {allowance} < {deposit}"
                )));
            }
            let balance = state.balance(sender);
            if balance < deposit {
                return Err(SubmitError::RejectedBySender(format!(
                    "insufficient balance: {balance} < {deposit}"
                )));
            }
        }

        let outcome = state.outcomes.pop_front().unwrap_or_default();
        let id = state.record(
            Effect::Transfer {
                sender: *sender,
                deposit,
                release,
            },
            outcome,
        );
        debug!(submission = %id, deposit, release, "Mock bridge accepted transfer");
        Ok(id)
    }
}

#[async_trait]
impl ConfirmationSource for MockBridge {
    async fn status(&self, submission: &SubmissionId) -> Result<SubmissionStatus> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(entry) = state.submissions.get_mut(submission) else {
            return Ok(SubmissionStatus::Unknown);
        };
        if entry.status != SubmissionStatus::Pending {
            return Ok(entry.status.clone());
        }

        entry.polls += 1;
        if entry.polls < self.confirm_after_polls {
            return Ok(SubmissionStatus::Pending);
        }

        let effect = entry.effect.clone();
        let outcome = entry.outcome.clone();
        let status = match outcome {
            MockOutcome::Hang => SubmissionStatus::Pending,
            MockOutcome::Revert(reason) => SubmissionStatus::Reverted { reason },
            MockOutcome::Confirm => match state.apply(&effect, &self.address) {
                Ok(()) => {
                    state.block += 1;
                    SubmissionStatus::Confirmed { block: state.block }
                }
                Err(reason) => SubmissionStatus::Reverted { reason },
            },
        };

        if let Some(entry) = state.submissions.get_mut(submission) {
            entry.status = status.clone();
        }
        Ok(status)
    }
}

#[async_trait]
impl PublicToken for MockBridge {
    async fn mint(&self, to: &AccountId, amount: u128) -> Result<SubmissionId, SubmitError> {
        let mut state = self.state.lock().await;
        Ok(state.record(Effect::Mint { to: *to, amount }, MockOutcome::Confirm))
    }

    async fn approve(
        &self,
        owner: &AccountId,
        spender: &AccountId,
        amount: u128,
    ) -> Result<SubmissionId, SubmitError> {
        let mut state = self.state.lock().await;
        Ok(state.record(
            Effect::Approve {
                owner: *owner,
                spender: *spender,
                amount,
            },
            MockOutcome::Confirm,
        ))
    }
}
