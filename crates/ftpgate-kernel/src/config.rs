//! Provisioning configuration.
//!
//! Every component receives its paths and tool settings from a
//! [`ProvisionConfig`] at construction; nothing reads process-global state.
//! The defaults describe a stock vsftpd virtual-user deployment:
//!
//! ```ron
//! (
//!     jail_root: "/mnt/stgw/SFTP",
//!     credential_store: "/etc/vsftpd_virtual_users",
//!     credential_index: "/etc/vsftpd_virtual_users.db",
//!     user_config_dir: "/etc/vsftpd_user_conf",
//!     config_owner: Some("root:root"),
//!     daemon: (service: "vsftpd", action: "restart", enabled: true),
//!     tools: (privilege_prefix: ["sudo"], timeout_secs: 30),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Paths and policies for the provisioning workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Every account home directory must resolve inside this tree.
    pub jail_root: PathBuf,
    /// Flat `username\npassword\n` store read by `db_load`.
    pub credential_store: PathBuf,
    /// Berkeley DB hash consulted by `pam_userdb`.
    pub credential_index: PathBuf,
    /// One `key=value` file per virtual user.
    pub user_config_dir: PathBuf,
    /// `chown` target for per-user config files. `None` leaves ownership alone.
    pub config_owner: Option<String>,
    pub daemon: DaemonConfig,
    pub tools: ToolConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            jail_root: PathBuf::from("/mnt/stgw/SFTP"),
            credential_store: PathBuf::from("/etc/vsftpd_virtual_users"),
            credential_index: PathBuf::from("/etc/vsftpd_virtual_users.db"),
            user_config_dir: PathBuf::from("/etc/vsftpd_user_conf"),
            config_owner: Some("root:root".to_string()),
            daemon: DaemonConfig::default(),
            tools: ToolConfig::default(),
        }
    }
}

/// How to poke the FTP daemon after a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub service: String,
    /// `systemctl` verb: `restart` or `reload`.
    pub action: String,
    pub enabled: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            service: "vsftpd".to_string(),
            action: "restart".to_string(),
            enabled: true,
        }
    }
}

/// External tool locations and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Prepended to every privileged command, e.g. `["sudo", "-n"]`.
    pub privilege_prefix: Vec<String>,
    pub db_load: String,
    pub chown: String,
    pub systemctl: String,
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            privilege_prefix: vec!["sudo".to_string()],
            db_load: "db_load".to_string(),
            chown: "chown".to_string(),
            systemctl: "systemctl".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProvisionConfig {
    /// Parse a RON document. Missing fields take their defaults.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        Ok(config)
    }

    /// Expand `~` and environment references in every path.
    pub fn expand_paths(&mut self) {
        for path in [
            &mut self.jail_root,
            &mut self.credential_store,
            &mut self.credential_index,
            &mut self.user_config_dir,
        ] {
            *path = expand(path);
        }
    }

    /// Reject settings the workflow cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.jail_root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "jail_root must be absolute: {}",
                self.jail_root.display()
            )));
        }
        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::Invalid("tools.timeout_secs must be non-zero".into()));
        }
        if self.credential_store == self.credential_index {
            return Err(ConfigError::Invalid(
                "credential_store and credential_index must differ".into(),
            ));
        }
        if self.daemon.enabled && self.daemon.service.trim().is_empty() {
            return Err(ConfigError::Invalid("daemon.service is empty".into()));
        }
        Ok(())
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}
