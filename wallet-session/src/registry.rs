use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{SessionError, SessionResult};
use crate::validation::InputValidator;

pub const INJECTED_PROVIDER_ID: &str = "injected";
pub const REMOTE_SESSION_PROVIDER_ID: &str = "remote-session";
pub const MODAL_PROVIDER_ID: &str = "modal";

/// Capability class of a provider, which selects the handshake it performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Wallet injected into the host environment; handshake is an account request.
    Injected,
    /// Remote wallet reached through a pairing URI (usually shown as a QR code).
    RemotePairing,
    /// Chooser that hands the handshake to another registered provider.
    ModalDelegated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderCapabilities {
    pub supports_qr: bool,
    pub supports_injected: bool,
    pub requires_project_id: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub display_name: String,
    pub kind: ProviderKind,
    pub capabilities: ProviderCapabilities,
}

impl ProviderDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        kind: ProviderKind,
        capabilities: ProviderCapabilities,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind,
            capabilities,
        }
    }
}

/// Connector set shipped when the configuration does not list its own.
pub fn default_descriptors() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::new(
            INJECTED_PROVIDER_ID,
            "Browser Wallet",
            ProviderKind::Injected,
            ProviderCapabilities {
                supports_qr: false,
                supports_injected: true,
                requires_project_id: false,
            },
        ),
        ProviderDescriptor::new(
            REMOTE_SESSION_PROVIDER_ID,
            "WalletConnect",
            ProviderKind::RemotePairing,
            ProviderCapabilities {
                supports_qr: true,
                supports_injected: false,
                requires_project_id: true,
            },
        ),
        ProviderDescriptor::new(
            MODAL_PROVIDER_ID,
            "Choose a Wallet",
            ProviderKind::ModalDelegated,
            ProviderCapabilities {
                supports_qr: true,
                supports_injected: true,
                requires_project_id: false,
            },
        ),
    ]
}

/// Immutable, ordered set of wallet providers available to this process.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Build the registry from static configuration.
    ///
    /// Providers that need a relay project id are skipped when none is configured.
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        project_id: Option<&str>,
    ) -> SessionResult<Self> {
        let validator = InputValidator::default();
        let mut seen = HashSet::new();
        let mut providers = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            validator.validate_provider_id(&descriptor.id)?;
            if !seen.insert(descriptor.id.clone()) {
                return Err(SessionError::ValidationError(format!(
                    "Duplicate provider id '{}'",
                    descriptor.id
                )));
            }

            if descriptor.capabilities.requires_project_id && project_id.is_none() {
                tracing::warn!(
                    provider = %descriptor.id,
                    "Skipping provider: no pairing project id configured"
                );
                continue;
            }

            providers.push(descriptor);
        }

        tracing::debug!(count = providers.len(), "Provider registry initialized");
        Ok(Self { providers })
    }

    pub fn with_defaults(project_id: Option<&str>) -> SessionResult<Self> {
        Self::new(default_descriptors(), project_id)
    }

    pub fn list_providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn resolve(&self, id: &str) -> SessionResult<&ProviderDescriptor> {
        self.providers
            .iter()
            .find(|descriptor| descriptor.id == id)
            .ok_or_else(|| SessionError::NotFound(format!("Unknown provider '{}'", id)))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
