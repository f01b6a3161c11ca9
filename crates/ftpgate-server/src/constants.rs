//! Server configuration constants.
//!
//! Defaults for the HTTP surface. Provisioning defaults live with
//! `ProvisionConfig` in the kernel.

/// Listen on all interfaces, port 3000.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Built front-end assets, relative to the working directory.
pub const DEFAULT_STATIC_DIR: &str = "dist";

/// Origins of the front-end dev server.
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

/// Upper bound on a create-user request body.
pub const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Every record at or above the configured filter level.
pub const COMBINED_LOG_FILE: &str = "combined.log";

/// ERROR records only.
pub const ERROR_LOG_FILE: &str = "error.log";

/// `$XDG_CONFIG_HOME/<this>/config.ron`
pub const CONFIG_DIR_NAME: &str = "ftpgate";
pub const CONFIG_FILE_NAME: &str = "config.ron";
