//! Chain prerequisites
//!
//! Public-balance operations (mint, approve) that must be final before a chain
//! starts. They do not depend on each other, so they run concurrently.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::info;

use cloak_note::AccountId;

use super::bridge::PublicToken;
use super::error::{ConfirmationError, SubmitError};
use super::settlement::{ConfirmationWaiter, Finality, Receipt};

/// One public-balance operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicBalanceOp {
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

impl fmt::Display for PublicBalanceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mint { to, amount } => write!(f, "mint {amount} to {to}"),
            Self::Approve {
                owner,
                spender,
                amount,
            } => write!(f, "approve {spender} for {amount} from {owner}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("{op}: {error}")]
    Submit { op: PublicBalanceOp, error: SubmitError },

    #[error("{op}: reverted: {reason}")]
    Reverted { op: PublicBalanceOp, reason: String },

    #[error("{op}: {error}")]
    Confirmation {
        op: PublicBalanceOp,
        error: ConfirmationError,
    },

    #[error("prerequisite task failed: {0}")]
    Join(String),
}

async fn execute(
    token: Arc<dyn PublicToken>,
    waiter: ConfirmationWaiter,
    op: PublicBalanceOp,
) -> Result<Receipt, SetupError> {
    let submission = match op {
        PublicBalanceOp::Mint { to, amount } => token.mint(&to, amount).await,
        PublicBalanceOp::Approve {
            owner,
            spender,
            amount,
        } => token.approve(&owner, &spender, amount).await,
    }
    .map_err(|error| SetupError::Submit { op, error })?;

    info!(%op, submission = %submission, "Prerequisite submitted");
    match waiter.await_default(&submission).await {
        Ok(Finality::Confirmed(receipt)) => Ok(receipt),
        Ok(Finality::Reverted(reason)) => Err(SetupError::Reverted { op, reason }),
        Err(error) => Err(SetupError::Confirmation { op, error }),
    }
}

/// Run `ops` concurrently and wait for all of them to finalize.
///
/// Receipts come back in `ops` order. The first failure is returned after the
/// remaining operations have been aborted.
pub async fn run_prerequisites(
    token: Arc<dyn PublicToken>,
    ops: &[PublicBalanceOp],
    waiter: &ConfirmationWaiter,
) -> Result<Vec<Receipt>, SetupError> {
    let mut tasks = JoinSet::new();
    for (index, op) in ops.iter().copied().enumerate() {
        let token = Arc::clone(&token);
        let waiter = waiter.clone();
        tasks.spawn(async move { (index, execute(token, waiter, op).await) });
    }

    let mut receipts: Vec<Option<Receipt>> = vec![None; ops.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined.map_err(|e| SetupError::Join(e.to_string()))?;
        receipts[index] = Some(result?);
    }

    info!(count = ops.len(), "Prerequisites finalized");
    receipts
        .into_iter()
        .map(|r| r.ok_or_else(|| SetupError::Join("missing prerequisite result".into())))
        .collect()
}
