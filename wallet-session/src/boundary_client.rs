//! Application backend client.
//!
//! Read-only lookups the UI performs for the connected account. Every call
//! needs a [`Consent`] naming the purpose shown to the user, only ever sends
//! the connected account and chain id, and records its outcome on the
//! session's result channel.
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::account::AccountState;
use crate::errors::{SessionError, SessionResult};
use crate::results::OperationResult;
use crate::session::SessionManager;
use crate::validation::InputValidator;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PURPOSE_LENGTH: usize = 200;

/// The purpose disclosed to the user before their account is sent anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consent {
    purpose: String,
}

impl Consent {
    pub fn new(purpose: impl Into<String>) -> SessionResult<Self> {
        let purpose = purpose.into().trim().to_string();
        if purpose.is_empty() {
            return Err(SessionError::ValidationError(
                "Consent must name the disclosed purpose".to_string(),
            ));
        }
        if purpose.len() > MAX_PURPOSE_LENGTH {
            return Err(SessionError::ValidationError(
                "Consent purpose too long".to_string(),
            ));
        }
        Ok(Self { purpose })
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityResponse {
    pub eligible: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct BoundaryClient {
    client: Client,
    base_url: String,
}

impl BoundaryClient {
    pub fn new(base_url: impl Into<String>) -> SessionResult<Self> {
        let base_url = base_url.into();
        InputValidator::default().validate_endpoint(&base_url)?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                SessionError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the application backend whether the connected account is eligible.
    pub async fn eligibility(
        &self,
        session: &SessionManager,
        consent: &Consent,
    ) -> SessionResult<EligibilityResponse> {
        let account = match session.accounts().current() {
            Some(account) => account,
            None => {
                let error = SessionError::ValidationError("No wallet connected".to_string());
                session.results().record(OperationResult::from_error(&error));
                return Err(error);
            }
        };

        tracing::info!(
            purpose = consent.purpose(),
            chain_id = account.chain_id,
            "Eligibility lookup"
        );
        session
            .results()
            .run(self.fetch_eligibility(&account), |response| {
                let message = if response.eligible {
                    "This account is eligible."
                } else {
                    "This account is not eligible."
                };
                OperationResult::success(message).with_payload(serde_json::json!({
                    "eligible": response.eligible,
                    "reason": response.reason,
                }))
            })
            .await
    }

    async fn fetch_eligibility(&self, account: &AccountState) -> SessionResult<EligibilityResponse> {
        let url = format!("{}/eligibility", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("account", account.account.clone()),
                ("chain_id", account.chain_id.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SessionError::NetworkError(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SessionError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SessionError::NetworkError(format!("Failed to parse response: {}", e)))
    }
}
