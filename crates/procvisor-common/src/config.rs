//! Global configuration model for the procvisor supervisor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProcvisorError, Result};

/// Root configuration for the procvisor supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcvisorConfig {
    /// Host directory mirrored by the filesystem (normally `/`).
    pub host_root: PathBuf,
    /// Register a container on first access instead of rejecting requests
    /// from unknown pid namespaces.
    pub auto_register: bool,
    /// Namespace-entering helper settings.
    pub nsenter: NsenterConfig,
    /// FUSE mount settings.
    pub mount: MountConfig,
}

impl Default for ProcvisorConfig {
    fn default() -> Self {
        Self {
            host_root: PathBuf::from(crate::constants::DEFAULT_HOST_ROOT),
            auto_register: false,
            nsenter: NsenterConfig::default(),
            mount: MountConfig::default(),
        }
    }
}

impl ProcvisorConfig {
    /// Loads a configuration file in JSON format.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ProcvisorError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::Config`] on a relative host root or a zero
    /// helper timeout.
    pub fn validate(&self) -> Result<()> {
        if !self.host_root.is_absolute() {
            return Err(ProcvisorError::Config {
                message: format!("host_root must be absolute: {}", self.host_root.display()),
            });
        }
        if self.nsenter.timeout_ms == 0 {
            return Err(ProcvisorError::Config {
                message: "nsenter.timeout_ms must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Settings for the helper processes forked per namespace-entering request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NsenterConfig {
    /// Helper executable; `None` re-executes the running binary.
    pub helper_exe: Option<PathBuf>,
    /// Upper bound for one request/response round trip, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for NsenterConfig {
    fn default() -> Self {
        Self {
            helper_exe: None,
            timeout_ms: crate::constants::DEFAULT_NSENTER_TIMEOUT_MS,
        }
    }
}

impl NsenterConfig {
    /// Returns the round-trip bound as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// FUSE mount options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    /// Filesystem name shown in the mount table.
    pub fs_name: String,
    /// Let processes of other users (i.e. containers) access the mount.
    pub allow_other: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: crate::constants::APP_NAME.to_string(),
            allow_other: true,
        }
    }
}
