//! Paystack payment provider client.
//!
//! Implements Paystack's transaction verification API. The raw provider
//! response is parsed into a fixed-shape [`VerifiedTransaction`] at this
//! boundary; the rest of the pipeline never handles loosely-typed external
//! data.

use crate::config::PaystackConfig;
use anyhow::Result;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;

/// Provider name recorded on payment rows.
pub const PROVIDER_NAME: &str = "paystack";

/// Failures surfaced by the verification call.
///
/// `Unreachable` and `Timeout` are safe for the client to retry later; the
/// call is never retried internally within a request. `Rejected` is a hard
/// failure: the provider says the transaction did not succeed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("payment provider unreachable: {0}")]
    Unreachable(String),

    #[error("payment provider timed out")]
    Timeout,

    #[error("payment provider rejected transaction: {0}")]
    Rejected(String),
}

/// Paystack verification envelope.
#[derive(Debug, Deserialize)]
struct VerifyEnvelope {
    status: bool,
    message: String,
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    /// Transaction status reported by Paystack ("success", "failed", ...).
    status: String,
    /// Amount in the smallest currency unit (kobo for NGN).
    amount: u64,
    /// Currency code; some provider responses omit or vary this field.
    currency: Option<String>,
}

/// Normalized provider confirmation for one completed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTransaction {
    pub status: String,
    pub amount_minor: u64,
    pub currency: Option<String>,
}

/// Paystack client for transaction verification.
#[derive(Clone)]
pub struct PaystackClient {
    client: Client,
    config: PaystackConfig,
}

impl PaystackClient {
    /// Create a new Paystack client with the configured hard timeout.
    pub fn new(config: PaystackConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    /// Check if Paystack is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Verify a transaction by its provider reference.
    ///
    /// Read-only: this service never initiates payments, it only confirms
    /// them after the fact. A transaction whose status is not "success" is a
    /// hard rejection, not an error to retry.
    pub async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::Unreachable(
                "Paystack credentials not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/transaction/verify/{}",
            self.config.api_base_url, reference
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::warn!(reference = %reference, "Paystack verification timed out");
                    ProviderError::Timeout
                } else {
                    tracing::error!(reference = %reference, error = %e, "Paystack request failed");
                    ProviderError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Unreachable(e.to_string())
            }
        })?;

        tracing::debug!(status = %status, body = %body, "Paystack verify response");

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::Rejected(
                "unknown transaction reference".to_string(),
            ));
        }

        if !status.is_success() {
            tracing::error!(
                reference = %reference,
                status = %status,
                "Paystack verification returned an error status"
            );
            return Err(ProviderError::Unreachable(format!(
                "provider returned HTTP {}",
                status
            )));
        }

        let envelope: VerifyEnvelope = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(reference = %reference, error = %e, "Unparseable Paystack response");
            ProviderError::Unreachable("unparseable provider response".to_string())
        })?;

        if !envelope.status {
            return Err(ProviderError::Rejected(envelope.message));
        }

        let data = envelope.data.ok_or_else(|| {
            tracing::error!(reference = %reference, "Paystack response missing data");
            ProviderError::Unreachable("provider response missing data".to_string())
        })?;

        if data.status != "success" {
            tracing::warn!(
                reference = %reference,
                provider_status = %data.status,
                "Transaction not successful at provider"
            );
            return Err(ProviderError::Rejected(format!(
                "transaction status is '{}'",
                data.status
            )));
        }

        tracing::info!(
            reference = %reference,
            amount_minor = data.amount,
            currency = ?data.currency,
            "Paystack transaction verified"
        );

        Ok(VerifiedTransaction {
            status: data.status,
            amount_minor: data.amount,
            currency: data.currency,
        })
    }
}
