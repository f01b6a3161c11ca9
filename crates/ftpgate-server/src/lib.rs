//! ftpgate server library
//!
//! HTTP front end for vsftpd virtual-user provisioning.

pub mod config;
pub mod constants;
pub mod http;
pub mod logging;

pub use config::{ConfigSource, ServiceConfig};
pub use http::{AppState, routes};
