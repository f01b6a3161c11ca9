//! Service configuration.
//!
//! Loaded from `--config <path>`, else `~/.config/ftpgate/config.ron` when it
//! exists, else built-in defaults. A minimal file only names what differs:
//!
//! ```ron
//! (
//!     bind: "127.0.0.1:3000",
//!     log_dir: Some("/var/log/ftpgate"),
//!     provision: (
//!         jail_root: "/srv/ftp",
//!         tools: (privilege_prefix: ["sudo", "-n"]),
//!     ),
//! )
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ftpgate_kernel::{ConfigError, ProvisionConfig};
use serde::{Deserialize, Serialize};
use warp::http::Uri;

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_BIND_ADDRESS, DEFAULT_CORS_ORIGINS,
    DEFAULT_STATIC_DIR,
};

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

/// Everything the server binary needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    /// Front-end assets served for non-API `GET`s. `None` disables.
    pub static_dir: Option<PathBuf>,
    pub cors_origins: Vec<String>,
    /// Directory for `combined.log` and `error.log`. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    pub provision: ProvisionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: Some(PathBuf::from(DEFAULT_STATIC_DIR)),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            log_dir: None,
            provision: ProvisionConfig::default(),
        }
    }
}

fn default_bind() -> SocketAddr {
    DEFAULT_BIND_ADDRESS
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3000)))
}

/// `~/.config/ftpgate/config.ron`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl ServiceConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text)
    }

    /// Load, expand, and validate.
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        let (mut config, source) = match explicit {
            Some(path) => (Self::from_file(path)?, ConfigSource::File(path.to_path_buf())),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => (Self::from_file(&path)?, ConfigSource::File(path)),
                None => (Self::default(), ConfigSource::Defaults),
            },
        };
        config.expand_paths();
        config.validate()?;
        Ok((config, source))
    }

    pub fn expand_paths(&mut self) {
        for path in [&mut self.static_dir, &mut self.log_dir].into_iter().flatten() {
            *path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
        }
        self.provision.expand_paths();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for origin in &self.cors_origins {
            if !is_origin(origin) {
                return Err(ConfigError::Invalid(format!(
                    "cors origin must look like scheme://host[:port]: {origin}"
                )));
            }
        }
        self.provision.validate()
    }

    /// Render as RON, for `print-config`.
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }
}

fn is_origin(origin: &str) -> bool {
    match origin.parse::<Uri>() {
        Ok(uri) => {
            uri.scheme().is_some()
                && uri.authority().is_some()
                && matches!(uri.path(), "" | "/")
                && uri.query().is_none()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.bind.port(), 3000);
        assert_eq!(config.static_dir, Some(PathBuf::from("dist")));
        assert_eq!(
            config.cors_origins,
            ["http://localhost:5173", "http://127.0.0.1:5173"]
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file() {
        let config = ServiceConfig::from_ron(
            r#"(
                bind: "127.0.0.1:8080",
                static_dir: None,
                provision: (jail_root: "/srv/ftp"),
            )"#,
        )
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.static_dir, None);
        assert_eq!(config.provision.jail_root, PathBuf::from("/srv/ftp"));
        assert_eq!(config.provision.daemon.service, "vsftpd");
    }

    #[test]
    fn test_bad_origin_rejected() {
        let config = ServiceConfig {
            cors_origins: vec!["localhost:5173/app".into()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(&path, r#"(log_dir: Some("/var/log/ftpgate"))"#).unwrap();

        let (config, source) = ServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/ftpgate")));
        assert_eq!(source, ConfigSource::File(path));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = ServiceConfig::load(Some(Path::new("/nonexistent/ftpgate.ron")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_round_trips_through_ron() {
        let config = ServiceConfig::default();
        let text = config.to_ron().unwrap();
        assert_eq!(ServiceConfig::from_ron(&text).unwrap(), config);
    }
}
