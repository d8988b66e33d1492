//! Sequencer Service
//!
//! Runs chains as background tasks over one shared ledger. Chains touching
//! disjoint notes proceed in parallel; the ledger serializes the rest.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::pipeline::Sequencer;
use super::report::ChainReport;
use super::transfer::Chain;

/// Handle to a running chain
pub struct ChainHandle {
    cancel: CancellationToken,
    task: JoinHandle<ChainReport>,
}

impl ChainHandle {
    /// Request cancellation; takes effect at the next step boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the chain to finish
    pub async fn report(self) -> Result<ChainReport> {
        self.task.await.context("Chain task panicked")
    }
}

/// Spawns chains on the tokio runtime
#[derive(Clone)]
pub struct SequencerService {
    sequencer: Arc<Sequencer>,
    /// Parent of every chain's token
    shutdown: CancellationToken,
}

impl SequencerService {
    pub fn new(sequencer: Arc<Sequencer>) -> Self {
        Self {
            sequencer,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    pub fn spawn(&self, chain: Chain) -> ChainHandle {
        let cancel = self.shutdown.child_token();
        let sequencer = Arc::clone(&self.sequencer);
        let token = cancel.clone();
        let task = tokio::spawn(async move { sequencer.run(&chain, &token).await });
        ChainHandle { cancel, task }
    }

    /// Cancel every chain spawned by this service
    pub fn shutdown(&self) {
        info!("Sequencer service shutting down");
        self.shutdown.cancel();
    }
}
