//! Cloak Configuration
//!
//! Shared configuration crate for the sequencing engine and its tools.
//!
//! Handles loading configuration from:
//! 1. CLOAK_CONFIG env var (explicit path)
//! 2. ./config.toml (current directory)
//! 3. ~/.cloak/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".cloak";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_BRIDGE_ADDRESS: &str = "0x0000000000000000000000000000000000c10a4e";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 8_000;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;

const DEFAULT_INPUT_WAIT_MS: u64 = 0;

const DEFAULT_SCALING_FACTOR: u64 = 1;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloakConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Which bridge backend to talk to
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// In-memory bridge, no network
    #[default]
    Mock,
    /// JSON gateway in front of the bridge contract
    Http,
}

/// Bridge connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mode: BridgeMode,
    #[serde(default = "default_bridge_url")]
    pub url: String,
    /// Address of the bridge contract (spender for approvals)
    #[serde(default = "default_bridge_address")]
    pub address: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::Mock,
            url: DEFAULT_BRIDGE_URL.into(),
            address: DEFAULT_BRIDGE_ADDRESS.into(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

fn default_bridge_url() -> String {
    DEFAULT_BRIDGE_URL.into()
}
fn default_bridge_address() -> String {
    DEFAULT_BRIDGE_ADDRESS.into()
}
fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

/// Submission retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_ms: DEFAULT_RETRY_MAX_MS,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}
fn default_retry_max_ms() -> u64 {
    DEFAULT_RETRY_MAX_MS
}

/// Finality polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirmation_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_confirmation_timeout() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

/// Note ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Where to write a JSON snapshot of the ledger after a run
    #[serde(default)]
    pub snapshot_path: Option<String>,
    /// How long Validate waits for a pending input before giving up
    #[serde(default = "default_input_wait")]
    pub input_wait_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            input_wait_ms: DEFAULT_INPUT_WAIT_MS,
        }
    }
}

fn default_input_wait() -> u64 {
    DEFAULT_INPUT_WAIT_MS
}

/// Demo chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Mint public tokens before the chain (test networks only)
    #[serde(default)]
    pub mint: bool,
    /// Public token units per note unit
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: u64,
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            mint: false,
            scaling_factor: DEFAULT_SCALING_FACTOR,
            accounts: Vec::new(),
        }
    }
}

fn default_scaling_factor() -> u64 {
    DEFAULT_SCALING_FACTOR
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set field from env var if present
fn env_string(key: &str, field: &mut String) {
    if let Ok(v) = env::var(key) {
        *field = v;
    }
}

/// Set Option<String> from env var if present
fn env_option_string(key: &str, field: &mut Option<String>) {
    if let Ok(v) = env::var(key) {
        *field = Some(v);
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = env::var(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring unparseable value for {}: {}", key, v),
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ============================================================================
// Implementation
// ============================================================================

impl CloakConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check CLOAK_CONFIG env var
        if let Ok(path) = env::var("CLOAK_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check ./config.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.cloak/config.toml
        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Bridge
        if let Ok(v) = env::var("CLOAK_BRIDGE_MODE") {
            self.bridge.mode = match v.to_ascii_lowercase().as_str() {
                "http" => BridgeMode::Http,
                _ => BridgeMode::Mock,
            };
        }
        env_string("CLOAK_BRIDGE_URL", &mut self.bridge.url);
        env_string("CLOAK_BRIDGE_ADDRESS", &mut self.bridge.address);
        env_parse("CLOAK_HTTP_TIMEOUT_SECS", &mut self.bridge.http_timeout_secs);

        // Submission
        env_parse("CLOAK_SUBMIT_MAX_ATTEMPTS", &mut self.submission.max_attempts);
        env_parse("CLOAK_SUBMIT_RETRY_BASE_MS", &mut self.submission.retry_base_ms);
        env_parse("CLOAK_SUBMIT_RETRY_MAX_MS", &mut self.submission.retry_max_ms);

        // Confirmation
        env_parse("CLOAK_POLL_INTERVAL_MS", &mut self.confirmation.poll_interval_ms);
        env_parse("CLOAK_CONFIRMATION_TIMEOUT_SECS", &mut self.confirmation.timeout_secs);

        // Ledger
        env_option_string("CLOAK_SNAPSHOT_PATH", &mut self.ledger.snapshot_path);
        env_parse("CLOAK_INPUT_WAIT_MS", &mut self.ledger.input_wait_ms);

        // Demo
        if let Some(v) = env_bool("CLOAK_DEMO_MINT") {
            self.demo.mint = v;
        }
        env_parse("CLOAK_SCALING_FACTOR", &mut self.demo.scaling_factor);
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.demo.mint = true;
        sample.ledger.snapshot_path = Some("./cloak-ledger.json".into());
        toml::to_string_pretty(&sample).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
