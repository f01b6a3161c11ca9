//! ftpgate kernel: provisioning of vsftpd virtual users.
//!
//! A virtual user is made of three pieces of shared system state, written in
//! this order by the [`Provisioner`]:
//!
//! 1. a `username\npassword\n` record in the flat [`CredentialStore`],
//!    committed by rebuilding the Berkeley DB lookup index from the whole
//!    store ([`DbLoadIndexBuilder`]);
//! 2. a per-user `key=value` file naming the account's home directory,
//!    which must resolve inside the [`Jail`] ([`AccountConfigWriter`]);
//! 3. a daemon restart so vsftpd sees both ([`DaemonReloader`]).
//!
//! All external commands go through a [`ToolRunner`] with a privilege
//! prefix and a hard timeout.

pub mod account_config;
pub mod config;
pub mod credential_store;
pub mod folders;
pub mod index;
pub mod jail;
pub mod orchestrator;
pub mod reload;
pub mod request;
pub mod tool;

pub use account_config::{AccountConfig, AccountConfigError, AccountConfigWriter};
pub use config::{ConfigError, DaemonConfig, ProvisionConfig, ToolConfig};
pub use credential_store::{Commit, CredentialStore, StoreError};
pub use folders::{FolderBrowser, FolderError};
pub use index::{DbLoadIndexBuilder, IndexBuilder, IndexError};
pub use jail::{Jail, JailError};
pub use orchestrator::{ProvisionError, ProvisionFailure, ProvisionReport, Provisioner, Stage};
pub use reload::{DaemonReloader, ReloadError, SystemctlReloader};
pub use request::{AccountRequest, ErrorKind, RequestError};
pub use tool::{ToolCommand, ToolError, ToolOutput, ToolRunner};
