//! Bridge Gateway Client
//!
//! HTTP client for a gateway that fronts the bridge contract.
//!
//! ```text
//!   POST /v1/confidential-transfer   ConfidentialTransferRequest → submission id
//!   GET  /v1/transactions/{id}       → SubmissionStatus
//!   POST /v1/token/mint              MintRequest → submission id
//!   POST /v1/token/approve           ApproveRequest → submission id
//! ```
//!
//! Every write carries an `Idempotency-Key`, so a retried submission that the
//! gateway already accepted returns the original id.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cloak_note::{AccountId, SubmissionId, TransactionId};

use super::PublicToken;
use crate::sequencer::error::SubmitError;
use crate::sequencer::proof::ProofBundle;
use crate::sequencer::settlement::{ConfirmationSource, LedgerSubmitter, SubmissionStatus};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct BridgeClientConfig {
    /// Gateway base URL (e.g., "http://127.0.0.1:8545")
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for BridgeClientConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

/// Body of `POST /v1/confidential-transfer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidentialTransferRequest {
    pub sender: AccountId,
    /// Hex-encoded proof
    pub proof_data: String,
    /// Split index
    pub m: u32,
    pub challenge: String,
    pub input_signatures: Vec<String>,
    pub output_owners: Vec<AccountId>,
    pub metadata: String,
}

impl ConfidentialTransferRequest {
    pub fn new(sender: &AccountId, bundle: &ProofBundle) -> Self {
        Self {
            sender: *sender,
            proof_data: hex::encode(bundle.proof_data()),
            m: bundle.split_index(),
            challenge: hex::encode(bundle.challenge()),
            input_signatures: bundle.input_signatures().to_vec(),
            output_owners: bundle.output_owners().to_vec(),
            metadata: hex::encode(bundle.metadata()),
        }
    }
}

/// Body of `POST /v1/token/mint`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintRequest {
    pub to: AccountId,
    /// Decimal string; token amounts exceed JSON number precision
    pub amount: String,
}

/// Body of `POST /v1/token/approve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub owner: AccountId,
    pub spender: AccountId,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub submission_id: SubmissionId,
}

/// Gateway response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    Success { data: T },
    Error { message: String, code: Option<String> },
}

// ============================================================================
// Error Classification
// ============================================================================

/// Map an HTTP failure status onto the submission taxonomy.
///
/// Server-side failures and throttling never changed ledger state.
pub fn classify_status(status: StatusCode, body: &str) -> SubmitError {
    let message = format!("gateway returned {status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        SubmitError::TransientSubmissionError(message)
    } else {
        SubmitError::RejectedBySender(message)
    }
}

/// Transport failures (connect, timeout, reset) happen before acceptance
pub fn classify_transport(error: &reqwest::Error) -> SubmitError {
    SubmitError::TransientSubmissionError(format!("gateway unreachable: {error}"))
}

// ============================================================================
// Client
// ============================================================================

/// HTTP implementation of the bridge seams
pub struct BridgeClient {
    config: BridgeClientConfig,
    client: reqwest::Client,
}

impl BridgeClient {
    pub fn new(config: BridgeClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    /// Send a write and unwrap the submission id
    async fn post_write<B: Serialize + ?Sized>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<SubmissionId, SubmitError> {
        let url = self.endpoint(path);
        let response = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        // The gateway may have accepted the write even if the body is garbled;
        // the idempotency key makes the retry safe.
        let api_response: ApiResponse<SubmissionResponse> = response
            .json()
            .await
            .map_err(|e| {
                SubmitError::TransientSubmissionError(format!("bad gateway response: {e}"))
            })?;

        match api_response {
            ApiResponse::Success { data } => {
                debug!(url = %url, submission = %data.submission_id, "Gateway accepted write");
                Ok(data.submission_id)
            }
            ApiResponse::Error { message, code } => Err(SubmitError::RejectedBySender(format!(
                "{} ({})",
                message,
                code.unwrap_or_else(|| "unknown".to_string())
            ))),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.endpoint(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to connect to bridge gateway")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Bridge gateway returned {}: {}", status, body));
        }

        let api_response: ApiResponse<T> = response
            .json()
            .await
            .context("Failed to parse gateway response")?;
        match api_response {
            ApiResponse::Success { data } => Ok(Some(data)),
            ApiResponse::Error { message, code } => Err(anyhow!(
                "Gateway error ({}): {}",
                code.unwrap_or_else(|| "unknown".to_string()),
                message
            )),
        }
    }

    /// Check if the gateway is reachable
    pub async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.endpoint("/v1/health")).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("Bridge gateway health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

fn token_key(op: &str, parts: &[&[u8]], amount: u128) -> String {
    let amount = amount.to_le_bytes();
    let mut all: Vec<&[u8]> = vec![op.as_bytes()];
    all.extend_from_slice(parts);
    all.push(amount.as_slice());
    TransactionId::digest(all).to_string()
}

#[async_trait]
impl LedgerSubmitter for BridgeClient {
    async fn submit(
        &self,
        sender: &AccountId,
        bundle: &ProofBundle,
    ) -> Result<SubmissionId, SubmitError> {
        let request = ConfidentialTransferRequest::new(sender, bundle);
        let key = bundle.transaction_id().to_string();
        self.post_write("/v1/confidential-transfer", &key, &request).await
    }
}

#[async_trait]
impl ConfirmationSource for BridgeClient {
    async fn status(&self, submission: &SubmissionId) -> Result<SubmissionStatus> {
        let path = format!("/v1/transactions/{}", submission.as_str());
        Ok(self
            .get::<SubmissionStatus>(&path)
            .await?
            .unwrap_or(SubmissionStatus::Unknown))
    }
}

#[async_trait]
impl PublicToken for BridgeClient {
    async fn mint(&self, to: &AccountId, amount: u128) -> Result<SubmissionId, SubmitError> {
        let request = MintRequest {
            to: *to,
            amount: amount.to_string(),
        };
        let key = token_key("mint", &[to.as_bytes().as_slice()], amount);
        self.post_write("/v1/token/mint", &key, &request).await
    }

    async fn approve(
        &self,
        owner: &AccountId,
        spender: &AccountId,
        amount: u128,
    ) -> Result<SubmissionId, SubmitError> {
        let request = ApproveRequest {
            owner: *owner,
            spender: *spender,
            amount: amount.to_string(),
        };
        let parties = [owner.as_bytes().as_slice(), spender.as_bytes().as_slice()];
        let key = token_key("approve", &parties, amount);
        self.post_write("/v1/token/approve", &key, &request).await
    }
}
