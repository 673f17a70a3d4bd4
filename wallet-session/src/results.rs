use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::errors::{ErrorKind, SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
}

/// Outcome of one user-triggered action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub outcome: Outcome,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Success,
            message: message.into(),
            payload: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Failure result carrying a fixed, user-safe message for the error kind.
    pub fn from_error(error: &SessionError) -> Self {
        let kind = error.kind();
        Self {
            outcome: Outcome::Failure(kind),
            message: safe_message(kind).to_string(),
            payload: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

fn safe_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "The selected wallet provider is not available.",
        ErrorKind::Busy => "A wallet connection is already in progress.",
        ErrorKind::Cancelled => "The wallet connection was cancelled.",
        ErrorKind::Timeout => "The wallet did not respond in time.",
        ErrorKind::Provider => "The wallet reported an error.",
        ErrorKind::Network => "The service could not be reached. Try again later.",
        ErrorKind::Validation => "The request was invalid.",
        ErrorKind::Storage => "Settings could not be saved.",
    }
}

/// Holds the latest [`OperationResult`]; each record replaces the previous one.
#[derive(Debug, Clone, Default)]
pub struct ResultChannel {
    latest: Arc<RwLock<Option<OperationResult>>>,
}

impl ResultChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: OperationResult) {
        tracing::debug!(outcome = ?result.outcome, "Recording operation result");
        *self.latest.write() = Some(result);
    }

    pub fn latest(&self) -> Option<OperationResult> {
        self.latest.read().clone()
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
    }

    /// Run a boundary call and record its outcome.
    ///
    /// `on_success` builds the user-facing message and payload from the value.
    pub async fn run<T, Fut, F>(&self, call: Fut, on_success: F) -> SessionResult<T>
    where
        Fut: Future<Output = SessionResult<T>>,
        F: FnOnce(&T) -> OperationResult,
    {
        match call.await {
            Ok(value) => {
                self.record(on_success(&value));
                Ok(value)
            }
            Err(error) => {
                tracing::warn!(error = %error, "Boundary call failed");
                self.record(OperationResult::from_error(&error));
                Err(error)
            }
        }
    }
}
