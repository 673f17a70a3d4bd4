use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SessionError, SessionResult};
use crate::paths::SessionPaths;
use crate::registry::{default_descriptors, ProviderDescriptor};
use crate::session::{SessionSettings, DEFAULT_CONNECT_TIMEOUT};

const CONFIG_VERSION: u16 = 1;

/// Ethereum mainnet and the Sepolia test network.
pub const DEFAULT_SUPPORTED_CHAINS: [u64; 2] = [1, 11_155_111];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub connect_timeout_ms: u64,
    pub history_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            history_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    pub supported: Vec<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            supported: DEFAULT_SUPPORTED_CHAINS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingConfig {
    pub project_id: Option<String>,
    pub relay_url: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            relay_url: "wss://relay.walletconnect.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InjectedConfig {
    pub bridge_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackendConfig {
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub providers: Vec<ProviderDescriptor>,
    pub chains: ChainConfig,
    pub pairing: PairingConfig,
    pub injected: InjectedConfig,
    pub backend: BackendConfig,
    pub last_provider: Option<String>,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl AppConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            session: SessionConfig::default(),
            providers: default_descriptors(),
            chains: ChainConfig::default(),
            pairing: PairingConfig::default(),
            injected: InjectedConfig::default(),
            backend: BackendConfig::default(),
            last_provider: None,
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_millis(self.session.connect_timeout_ms.max(1)),
            supported_chains: self.chains.supported.clone(),
            history_capacity: self.session.history_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: AppConfig,
    modified_at_unix: i64,
}

/// Persists [`AppConfig`] with an integrity checksum and atomic replace.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &SessionPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> SessionResult<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(SessionError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(SessionError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &AppConfig) -> SessionResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| SessionError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        tracing::debug!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }

    pub fn update<F>(&self, environment: impl Into<String>, updater: F) -> SessionResult<AppConfig>
    where
        F: FnOnce(&mut AppConfig) -> SessionResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &AppConfig) -> SessionResult<[u8; 32]> {
    let encoded = serde_json::to_vec(config)?;
    let mut hasher = Blake3::new();
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}
