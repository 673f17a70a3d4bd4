//! Injected wallet backend.
//!
//! Talks JSON-RPC to an EIP-1193 bridge exposed by the host (a browser
//! extension relay or a desktop shell). The handshake is the standard
//! `eth_requestAccounts` followed by `eth_chainId`.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{BackendFault, Handshake, WalletBackend};
use crate::errors::{SessionError, SessionResult};
use crate::registry::{ProviderDescriptor, ProviderKind};

/// EIP-1193 "User Rejected Request".
const USER_REJECTED_CODE: i64 = 4001;

/// Upper bound for a single bridge request; the session timeout still applies on top.
const BRIDGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub struct InjectedBackend {
    client: Client,
    endpoint: Option<String>,
    next_id: AtomicU64,
}

impl InjectedBackend {
    /// `endpoint` is the bridge URL; `None` means no injected wallet is present.
    pub fn new(endpoint: Option<String>) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(BRIDGE_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                SessionError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.map(|url| url.trim_end_matches('/').to_string()),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<T, BackendFault> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?;

        if !response.status().is_success() {
            return Err(anyhow!("bridge returned HTTP {}", response.status()).into());
        }

        let rpc: JsonRpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("malformed {} response", method))?;

        if let Some(error) = rpc.error {
            if error.code == USER_REJECTED_CODE {
                return Err(BackendFault::Rejected);
            }
            return Err(anyhow!("RPC error {}: {}", error.code, error.message).into());
        }

        rpc.result
            .ok_or_else(|| anyhow!("{} returned no result", method).into())
    }
}

#[async_trait]
impl WalletBackend for InjectedBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Injected
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn handshake(&self, descriptor: &ProviderDescriptor) -> Result<Handshake, BackendFault> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            BackendFault::Unavailable("no injected wallet detected".to_string())
        })?;
        tracing::debug!(provider = %descriptor.id, "Requesting accounts from injected wallet");

        let accounts: Vec<String> = self
            .request(endpoint, "eth_requestAccounts", Value::Array(Vec::new()))
            .await?;
        let account = accounts
            .into_iter()
            .next()
            .ok_or_else(|| BackendFault::Failed(anyhow!("wallet returned no accounts")))?;

        let chain_hex: String = self
            .request(endpoint, "eth_chainId", Value::Array(Vec::new()))
            .await?;
        let chain_id = parse_chain_id(&chain_hex)?;

        Ok(Handshake::new(account, chain_id))
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        // Injected wallets keep no per-session resources on our side.
        tracing::debug!("Injected backend released");
        Ok(())
    }
}

/// Parse a chain id as returned by `eth_chainId` (hex quantity, decimal tolerated).
pub fn parse_chain_id(raw: &str) -> anyhow::Result<u64> {
    let trimmed = raw.trim();
    let parsed = if let Some(stripped) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(stripped, 16)
    } else {
        trimmed.parse()
    };
    parsed.with_context(|| format!("invalid chain id '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{default_descriptors, INJECTED_PROVIDER_ID};

    #[test]
    fn chain_id_parsing() {
        assert_eq!(parse_chain_id("0x1").unwrap(), 1);
        assert_eq!(parse_chain_id("0xaa36a7").unwrap(), 11_155_111);
        assert_eq!(parse_chain_id("137").unwrap(), 137);
        assert!(parse_chain_id("0xzz").is_err());
    }

    #[tokio::test]
    async fn missing_bridge_is_unavailable() {
        let backend = InjectedBackend::new(None).unwrap();
        assert!(!backend.is_available());

        let descriptor = default_descriptors()
            .into_iter()
            .find(|d| d.id == INJECTED_PROVIDER_ID)
            .unwrap();
        let fault = backend.handshake(&descriptor).await.unwrap_err();
        assert!(matches!(fault, BackendFault::Unavailable(_)));
    }

    #[tokio::test]
    #[ignore = "requires an EIP-1193 bridge at localhost:8546"]
    async fn test_real_bridge_handshake() {
        let backend = InjectedBackend::new(Some("http://localhost:8546".to_string())).unwrap();
        let descriptor = default_descriptors().remove(0);
        let handshake = backend.handshake(&descriptor).await;
        assert!(handshake.is_ok(), "Bridge handshake should succeed");
    }
}
