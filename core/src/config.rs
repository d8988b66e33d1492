//! Configuration mapping
//!
//! Turns the TOML-level [`CloakConfig`] into the engine's runtime settings.
//! Loading, file lookup and `CLOAK_*` environment overrides live in the
//! `cloak-config` crate.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use cloak_config::CloakConfig;
use cloak_note::AccountId;

use crate::sequencer::{BridgeClientConfig, RetryPolicy, SequencerConfig, WaiterConfig};

pub fn retry_policy(config: &CloakConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.submission.max_attempts.max(1),
        base_delay: Duration::from_millis(config.submission.retry_base_ms),
        max_delay: Duration::from_millis(config.submission.retry_max_ms),
    }
}

pub fn waiter_config(config: &CloakConfig) -> WaiterConfig {
    WaiterConfig {
        poll_interval: Duration::from_millis(config.confirmation.poll_interval_ms),
        timeout: Duration::from_secs(config.confirmation.timeout_secs),
    }
}

pub fn bridge_address(config: &CloakConfig) -> Result<AccountId> {
    config
        .bridge
        .address
        .parse()
        .with_context(|| format!("Invalid bridge address {}", config.bridge.address))
}

pub fn bridge_client_config(config: &CloakConfig) -> BridgeClientConfig {
    BridgeClientConfig {
        url: config.bridge.url.clone(),
        timeout: Duration::from_secs(config.bridge.http_timeout_secs),
    }
}

pub fn sequencer_config(config: &CloakConfig) -> Result<SequencerConfig> {
    Ok(SequencerConfig {
        bridge: bridge_address(config)?,
        retry: retry_policy(config),
        waiter: waiter_config(config),
        input_wait: Duration::from_millis(config.ledger.input_wait_ms),
    })
}

pub fn snapshot_path(config: &CloakConfig) -> Option<PathBuf> {
    config.ledger.snapshot_path.as_ref().map(PathBuf::from)
}
