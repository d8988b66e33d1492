//! Settlement: getting proof bundles onto the public ledger and waiting for finality

pub mod confirmation;
pub mod submitter;

pub use confirmation::{
    ConfirmationSource, ConfirmationWaiter, Finality, Receipt, SubmissionStatus, WaiterConfig,
};
pub use submitter::{LedgerSubmitter, RetryPolicy, Submitted, submit_with_retry};
