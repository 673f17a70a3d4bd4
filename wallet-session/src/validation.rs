use crate::errors::{SessionError, SessionResult};
use regex::Regex;

const MAX_INPUT_LENGTH: usize = 1000;

/// Input validation for values that arrive from wallets, configuration or the UI.
#[derive(Debug, Clone)]
pub struct InputValidator {
    address_pattern: Regex,
    provider_id_pattern: Regex,
    project_id_pattern: Regex,

    // Blocked patterns for anything that may be echoed back into a UI
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> SessionResult<Self> {
        let address_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$").map_err(|e| {
            SessionError::ValidationError(format!("Invalid address regex: {}", e))
        })?;

        let provider_id_pattern = Regex::new(r"^[a-z0-9][a-z0-9-]{0,63}$").map_err(|e| {
            SessionError::ValidationError(format!("Invalid provider id regex: {}", e))
        })?;

        let project_id_pattern = Regex::new(r"^[a-fA-F0-9]{32}$").map_err(|e| {
            SessionError::ValidationError(format!("Invalid project id regex: {}", e))
        })?;

        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                SessionError::ValidationError(format!("Invalid blocklist regex: {}", e))
            })
        })
        .collect::<SessionResult<Vec<_>>>()?;

        Ok(InputValidator {
            address_pattern,
            provider_id_pattern,
            project_id_pattern,
            malicious_patterns,
        })
    }

    /// Validate a hex account address as reported by a wallet.
    pub fn validate_address(&self, address: &str) -> SessionResult<()> {
        self.check_basic_security(address)?;

        if address.is_empty() {
            return Err(SessionError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if !self.address_pattern.is_match(address) {
            return Err(SessionError::ValidationError(
                "Address format is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a provider identifier used as a registry key.
    pub fn validate_provider_id(&self, id: &str) -> SessionResult<()> {
        self.check_basic_security(id)?;

        if !self.provider_id_pattern.is_match(id) {
            return Err(SessionError::ValidationError(format!(
                "Provider id '{}' must be lowercase alphanumeric with hyphens",
                id
            )));
        }

        Ok(())
    }

    /// Validate a pairing relay project id (32 hex characters).
    pub fn validate_project_id(&self, project_id: &str) -> SessionResult<()> {
        if !self.project_id_pattern.is_match(project_id) {
            return Err(SessionError::ValidationError(
                "Project id must be 32 hexadecimal characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Chain ids are EIP-155 identifiers; zero is never valid.
    pub fn validate_chain_id(&self, chain_id: u64, supported: &[u64]) -> SessionResult<()> {
        if chain_id == 0 {
            return Err(SessionError::ValidationError(
                "Chain id must be non-zero".to_string(),
            ));
        }

        if !supported.is_empty() && !supported.contains(&chain_id) {
            return Err(SessionError::ValidationError(format!(
                "Chain {} is not supported",
                chain_id
            )));
        }

        Ok(())
    }

    /// Validate an http(s) endpoint taken from configuration.
    pub fn validate_endpoint(&self, endpoint: &str) -> SessionResult<()> {
        self.check_basic_security(endpoint)?;

        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| SessionError::ValidationError(format!("Invalid endpoint: {}", e)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(SessionError::ValidationError(format!(
                "Unsupported endpoint scheme '{}'",
                other
            ))),
        }
    }

    fn check_basic_security(&self, input: &str) -> SessionResult<()> {
        if input.len() > MAX_INPUT_LENGTH {
            return Err(SessionError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        for pattern in &self.malicious_patterns {
            if pattern.is_match(&lowered) {
                return Err(SessionError::ValidationError(
                    "Input contains potentially malicious content".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create InputValidator")
    }
}
