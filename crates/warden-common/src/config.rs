//! Backend configuration model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, WardenError};

/// Root configuration for a Warden Linux backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Directory holding one subdirectory per container.
    pub depot_path: PathBuf,
    /// Directory holding helper binaries such as `bin/repquota`.
    pub root_path: PathBuf,
    /// First uid handed out to containers.
    pub uid_pool_start: u32,
    /// Number of uids handed out to containers.
    pub uid_pool_size: u32,
    /// Whether disk quotas are enforced on this host.
    pub disk_quota_enabled: bool,
    /// Path of the `wsh` binary, relative to a container directory.
    pub wsh_path: PathBuf,
    /// Daemon socket path, relative to a container directory.
    pub wshd_socket: PathBuf,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            depot_path: PathBuf::from(constants::DEFAULT_DEPOT_PATH),
            root_path: PathBuf::from(constants::DEFAULT_ROOT_PATH),
            uid_pool_start: constants::DEFAULT_UID_POOL_START,
            uid_pool_size: constants::DEFAULT_UID_POOL_SIZE,
            disk_quota_enabled: true,
            wsh_path: PathBuf::from("bin/wsh"),
            wshd_socket: PathBuf::from(constants::DEFAULT_WSH_SOCKET),
        }
    }
}

impl WardenConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// Fields missing from the file keep their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// describes an empty uid pool.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| WardenError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the uid pool is empty or overflows `u32`.
    pub fn validate(&self) -> Result<()> {
        if self.uid_pool_size == 0 {
            return Err(WardenError::Config {
                message: "uid_pool_size must be greater than zero".into(),
            });
        }
        if self.uid_pool_start.checked_add(self.uid_pool_size).is_none() {
            return Err(WardenError::Config {
                message: format!(
                    "uid pool [{}, +{}) overflows the uid space",
                    self.uid_pool_start, self.uid_pool_size
                ),
            });
        }
        Ok(())
    }

    /// Returns the directory of the container with the given handle.
    #[must_use]
    pub fn container_path(&self, handle: &str) -> PathBuf {
        self.depot_path.join(handle)
    }
}
