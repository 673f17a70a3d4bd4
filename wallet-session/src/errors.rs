use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionError {
    // Lookup errors
    NotFound(String),

    // Session lifecycle errors
    Busy,
    Cancelled,
    Timeout { after_ms: u64 },

    // Collaborator errors
    ProviderError(String),
    NetworkError(String),

    // Local errors
    ValidationError(String),
    StorageError(String),
}

/// Coarse classification of a [`SessionError`], safe to hand to a UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Busy,
    Cancelled,
    Timeout,
    Provider,
    Network,
    Validation,
    Storage,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::Busy => ErrorKind::Busy,
            SessionError::Cancelled => ErrorKind::Cancelled,
            SessionError::Timeout { .. } => ErrorKind::Timeout,
            SessionError::ProviderError(_) => ErrorKind::Provider,
            SessionError::NetworkError(_) => ErrorKind::Network,
            SessionError::ValidationError(_) => ErrorKind::Validation,
            SessionError::StorageError(_) => ErrorKind::Storage,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::NotFound(msg) => write!(f, "Not found: {}", msg),

            SessionError::Busy => write!(f, "A connection attempt is already in progress"),
            SessionError::Cancelled => write!(f, "Connection cancelled"),
            SessionError::Timeout { after_ms } => {
                write!(f, "Connection timed out after {} ms", after_ms)
            }

            SessionError::ProviderError(msg) => write!(f, "Provider error: {}", msg),
            SessionError::NetworkError(msg) => write!(f, "Network error: {}", msg),

            SessionError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            SessionError::StorageError(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

pub type SessionResult<T> = Result<T, SessionError>;

#[macro_export]
macro_rules! session_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::SessionError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::SessionError::$variant
    };
}

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => SessionError::NotFound(error.to_string()),
            _ => SessionError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        SessionError::ValidationError(format!("JSON error: {}", error))
    }
}
