use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{SessionError, SessionResult};

/// Filesystem locations used by the session core.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    /// Root directory for all session data.
    root_dir: PathBuf,
    /// Path to persisted configuration.
    config_file: PathBuf,
}

impl SessionPaths {
    pub const CONFIG_FILENAME: &'static str = "session.config";

    pub fn new(root: impl AsRef<Path>) -> SessionResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(SessionError::StorageError(
                "Session root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            config_file: root_dir.join(Self::CONFIG_FILENAME),
            root_dir,
        })
    }

    pub fn ensure_directories(&self) -> SessionResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        Ok(())
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}
