//! cloak-demo
//!
//! Runs the three-step demonstration chain against the configured bridge and
//! prints the resulting report.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cloak_config::{BridgeMode, CloakConfig};
use cloak_core::config;
use cloak_core::demo::{demo_accounts, demo_chain, demo_prerequisites};
use cloak_core::sequencer::{
    BridgeClient, ConfirmationSource, LedgerSubmitter, MockBridge, MockProofConstructor,
    NoteLedger, PublicToken, Sequencer, run_prerequisites,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloak_core=info,cloak_demo=info".into()),
        )
        .init();

    let cloak_config = CloakConfig::load()?;
    let bridge_address = config::bridge_address(&cloak_config)?;

    match cloak_config.bridge.mode {
        BridgeMode::Mock => {
            info!("Using in-memory mock bridge");
            let scaling = u128::from(cloak_config.demo.scaling_factor.max(1));
            let bridge = Arc::new(MockBridge::new(bridge_address).with_scaling_factor(scaling));
            // A fresh mock bridge holds no tokens, so the deposit must be minted
            run_demo(bridge, &cloak_config, true).await
        }
        BridgeMode::Http => {
            info!(url = %cloak_config.bridge.url, "Using bridge gateway");
            let client = BridgeClient::new(config::bridge_client_config(&cloak_config))?;
            if !client.health_check().await? {
                warn!("Bridge gateway health check failed, continuing anyway");
            }
            run_demo(Arc::new(client), &cloak_config, cloak_config.demo.mint).await
        }
    }
}

async fn run_demo<B>(bridge: Arc<B>, cloak_config: &CloakConfig, mint: bool) -> Result<()>
where
    B: LedgerSubmitter + ConfirmationSource + PublicToken + 'static,
{
    let seq_config = config::sequencer_config(cloak_config)?;
    let accounts = demo_accounts(&cloak_config.demo.accounts)?;
    let chain = demo_chain(&accounts).context("Demo chain is malformed")?;

    let ledger = Arc::new(NoteLedger::new());
    let sequencer = Sequencer::with_bridge(
        Arc::clone(&ledger),
        Arc::new(MockProofConstructor::new()),
        Arc::clone(&bridge),
        seq_config.clone(),
    );

    let ops = demo_prerequisites(
        &accounts,
        &seq_config.bridge,
        u128::from(cloak_config.demo.scaling_factor.max(1)),
        mint,
    );
    for op in &ops {
        info!(%op, "Prerequisite");
    }
    let token: Arc<dyn PublicToken> = bridge;
    run_prerequisites(token, &ops, sequencer.waiter()).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            ctrl_c.cancel();
        }
    });

    let report = sequencer.run(&chain, &cancel).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render report")?
    );

    if let Some(path) = config::snapshot_path(cloak_config) {
        ledger.save(&path)?;
    }

    if !report.is_complete() {
        bail!("Demo chain {}", report.summary());
    }
    info!(summary = %report.summary(), "Demo complete");
    Ok(())
}
