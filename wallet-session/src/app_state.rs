use std::path::PathBuf;
use std::sync::Arc;

use crate::backends::{
    BackendSet, InjectedBackend, ModalBackend, ModalChooser, PairingBackend, PairingDisplay,
    PairingResponder, WalletBackend,
};
use crate::boundary_client::BoundaryClient;
use crate::config_store::{AppConfig, ConfigStore};
use crate::errors::{SessionError, SessionResult};
use crate::paths::SessionPaths;
use crate::registry::{ProviderKind, ProviderRegistry};
use crate::session::{ConnectionSession, SessionManager};
use crate::validation::InputValidator;

pub const ENV_ENVIRONMENT: &str = "WALLET_SESSION_ENV";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "WALLET_CONNECT_TIMEOUT_MS";
pub const ENV_PROJECT_ID: &str = "WALLET_PROJECT_ID";

/// UI hooks a host can plug into the backends.
#[derive(Default, Clone)]
pub struct ContextOptions {
    pub chooser: Option<Arc<dyn ModalChooser>>,
    pub pairing_display: Option<Arc<dyn PairingDisplay>>,
}

/// Everything a front-end needs: configuration, the session and the boundary client.
#[derive(Clone)]
pub struct SessionContext {
    paths: SessionPaths,
    config_store: ConfigStore,
    session: SessionManager,
    pairing: Option<Arc<PairingBackend>>,
    boundary: Option<BoundaryClient>,
    environment: String,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("paths", &self.paths)
            .field("environment", &self.environment)
            .field("session", &self.session)
            .finish()
    }
}

impl SessionContext {
    pub fn initialize(root_dir: PathBuf, options: ContextOptions) -> SessionResult<Self> {
        let environment =
            std::env::var(ENV_ENVIRONMENT).unwrap_or_else(|_| "development".to_string());
        let paths = SessionPaths::new(&root_dir)?;
        paths.ensure_directories()?;

        let config_store = ConfigStore::from_paths(&paths);
        let mut config = config_store.load_or_default(environment.clone())?;
        apply_env_overrides(&mut config)?;
        tracing::info!(environment = %environment, root = %root_dir.display(), "Initializing wallet session");

        let registry = Arc::new(ProviderRegistry::new(
            config.providers.clone(),
            config.pairing.project_id.as_deref(),
        )?);
        let (backends, pairing) = build_backends(&registry, &config, &options)?;

        let session = SessionManager::new(registry, backends, config.session_settings());
        session.restore_last_provider(config.last_provider.clone());

        let boundary = config
            .backend
            .endpoint
            .as_deref()
            .map(BoundaryClient::new)
            .transpose()?;

        Ok(Self {
            paths,
            config_store,
            session,
            pairing,
            boundary,
            environment,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn boundary(&self) -> Option<&BoundaryClient> {
        self.boundary.as_ref()
    }

    /// Relay-side handle for the pairing backend, when one is configured.
    pub fn pairing_responder(&self) -> Option<PairingResponder> {
        self.pairing.as_ref().map(|backend| backend.responder())
    }

    pub fn load_config(&self) -> SessionResult<AppConfig> {
        self.config_store.load_or_default(self.environment.clone())
    }

    /// Connect and remember the provider for the next start.
    pub async fn connect(&self, provider_id: &str) -> SessionResult<ConnectionSession> {
        let session = self.session.connect(provider_id).await?;
        self.remember_provider(provider_id);
        Ok(session)
    }

    pub async fn reconnect(&self) -> SessionResult<ConnectionSession> {
        self.session.reconnect().await
    }

    pub async fn disconnect(&self) -> SessionResult<()> {
        self.session.disconnect().await
    }

    fn remember_provider(&self, provider_id: &str) {
        let result = self
            .config_store
            .update(self.environment.clone(), |config| {
                config.last_provider = Some(provider_id.to_string());
                Ok(())
            });
        if let Err(err) = result {
            // The connection itself succeeded; only the reconnect hint is lost.
            tracing::warn!(error = %err, "Failed to persist last provider");
        }
    }
}

fn apply_env_overrides(config: &mut AppConfig) -> SessionResult<()> {
    if let Ok(raw) = std::env::var(ENV_CONNECT_TIMEOUT_MS) {
        let timeout_ms: u64 = raw.trim().parse().map_err(|_| {
            SessionError::ValidationError(format!(
                "{} must be a number of milliseconds",
                ENV_CONNECT_TIMEOUT_MS
            ))
        })?;
        tracing::debug!(timeout_ms, "Connect timeout overridden from environment");
        config.session.connect_timeout_ms = timeout_ms;
    }

    if let Ok(project_id) = std::env::var(ENV_PROJECT_ID) {
        let project_id = project_id.trim().to_string();
        if project_id.is_empty() {
            tracing::warn!("Environment variable {} is empty", ENV_PROJECT_ID);
        } else {
            config.pairing.project_id = Some(project_id);
        }
    }

    Ok(())
}

fn build_backends(
    registry: &ProviderRegistry,
    config: &AppConfig,
    options: &ContextOptions,
) -> SessionResult<(BackendSet, Option<Arc<PairingBackend>>)> {
    let validator = InputValidator::default();
    let mut backends = BackendSet::new();
    let mut pairing: Option<Arc<PairingBackend>> = None;

    for descriptor in registry.list_providers() {
        let backend: Arc<dyn WalletBackend> = match descriptor.kind {
            ProviderKind::Injected => {
                if let Some(endpoint) = &config.injected.bridge_endpoint {
                    validator.validate_endpoint(endpoint)?;
                }
                Arc::new(InjectedBackend::new(config.injected.bridge_endpoint.clone())?)
            }
            ProviderKind::RemotePairing => {
                let project_id = config.pairing.project_id.clone().ok_or_else(|| {
                    SessionError::ValidationError("Pairing requires a project id".to_string())
                })?;
                match &pairing {
                    Some(existing) => Arc::clone(existing) as Arc<dyn WalletBackend>,
                    None => {
                        let mut backend =
                            PairingBackend::new(&config.pairing.relay_url, project_id)?;
                        if let Some(display) = &options.pairing_display {
                            backend = backend.with_display(Arc::clone(display));
                        }
                        let backend = Arc::new(backend);
                        pairing = Some(Arc::clone(&backend));
                        backend
                    }
                }
            }
            // Wired below, once every delegate exists.
            ProviderKind::ModalDelegated => continue,
        };
        backends.insert(descriptor.id.clone(), backend);
    }

    for descriptor in registry.list_providers() {
        if descriptor.kind != ProviderKind::ModalDelegated {
            continue;
        }
        let Some(chooser) = &options.chooser else {
            tracing::warn!(provider = %descriptor.id, "No chooser supplied; modal provider disabled");
            continue;
        };
        let delegates = registry
            .list_providers()
            .iter()
            .filter_map(|d| backends.get(&d.id).map(|b| (d.clone(), Arc::clone(b))))
            .collect();
        let modal: Arc<dyn WalletBackend> = Arc::new(ModalBackend::new(Arc::clone(chooser), delegates));
        backends.insert(descriptor.id.clone(), modal);
    }

    Ok((backends, pairing))
}
