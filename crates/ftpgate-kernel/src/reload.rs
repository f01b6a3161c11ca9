//! Daemon reload trigger.

use async_trait::async_trait;
use thiserror::Error;

use crate::tool::{ToolCommand, ToolError, ToolRunner};

/// Error type for daemon reloads.
#[derive(Debug, Error)]
#[error("daemon reload failed: {0}")]
pub struct ReloadError(#[from] pub ToolError);

impl ReloadError {
    pub fn is_timeout(&self) -> bool {
        self.0.is_timeout()
    }
}

/// Makes the FTP daemon pick up new credentials and per-user config.
#[async_trait]
pub trait DaemonReloader: Send + Sync {
    async fn reload(&self) -> Result<(), ReloadError>;

    /// Human-readable description for logs, e.g. `systemctl restart vsftpd`.
    fn describe(&self) -> String;
}

/// `systemctl <action> <service>` through the privileged runner.
pub struct SystemctlReloader {
    runner: ToolRunner,
    command: ToolCommand,
}

impl SystemctlReloader {
    pub fn new(
        runner: ToolRunner,
        systemctl: impl Into<String>,
        action: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        let command = ToolCommand::new(systemctl)
            .arg(action)
            .arg(service);
        Self { runner, command }
    }
}

#[async_trait]
impl DaemonReloader for SystemctlReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        self.runner.run(&self.command, None).await?;
        tracing::info!(command = %self.command, "daemon reloaded");
        Ok(())
    }

    fn describe(&self) -> String {
        self.command.to_string()
    }
}
