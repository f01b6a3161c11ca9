//! Per-user vsftpd configuration.
//!
//! vsftpd reads `<user_config_dir>/<username>` at login for virtual users.
//! The file pins the home directory and the write flags:
//!
//! ```text
//! local_root=/mnt/stgw/SFTP/clients/alice
//! write_enable=YES
//! anon_upload_enable=YES
//! anon_mkdir_write_enable=YES
//! anon_other_write_enable=YES
//! ```
//!
//! Virtual users are mapped onto vsftpd's anonymous-user machinery, so the
//! `anon_*` flags are always on; `write_enable` alone gates writes.

use std::fmt::Write as _;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ftpgate_types::WritePermission;
use thiserror::Error;

use crate::tool::{ToolCommand, ToolError, ToolRunner};

/// Readable by the daemon, writable only by the owner.
pub const CONFIG_FILE_MODE: u32 = 0o644;

const STAGING_PREFIX: &str = ".ftpgate-";

/// Flags vsftpd needs for virtual users to use their write permission.
const ANON_FLAGS: [&str; 3] = [
    "anon_upload_enable",
    "anon_mkdir_write_enable",
    "anon_other_write_enable",
];

/// Error type for per-user config writes.
#[derive(Debug, Error)]
pub enum AccountConfigError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {after:?} writing {path}")]
    Timeout { path: PathBuf, after: Duration },

    #[error("failed to set owner of {path}: {source}")]
    Ownership {
        path: PathBuf,
        #[source]
        source: ToolError,
    },
}

impl AccountConfigError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Ownership { source, .. } => source.is_timeout(),
            Self::Write { .. } => false,
        }
    }
}

/// Permission descriptor for one virtual user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub local_root: PathBuf,
    pub write: WritePermission,
}

impl AccountConfig {
    pub fn new(local_root: impl Into<PathBuf>, write: WritePermission) -> Self {
        Self {
            local_root: local_root.into(),
            write,
        }
    }

    /// `key=value` lines, `local_root` first, one trailing newline each.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "local_root={}", self.local_root.display());
        let _ = writeln!(out, "write_enable={}", self.write);
        for flag in ANON_FLAGS {
            let _ = writeln!(out, "{flag}=YES");
        }
        out
    }
}

/// Writes per-user config files into the daemon's config directory.
pub struct AccountConfigWriter {
    dir: PathBuf,
    owner: Option<String>,
    chown: String,
    runner: ToolRunner,
}

impl AccountConfigWriter {
    /// `owner` is a `chown` owner such as `root:root`; `None` skips the chown.
    pub fn new(
        dir: impl Into<PathBuf>,
        owner: Option<String>,
        chown: impl Into<String>,
        runner: ToolRunner,
    ) -> Self {
        Self {
            dir: dir.into(),
            owner,
            chown: chown.into(),
            runner,
        }
    }

    pub fn path_for(&self, username: &str) -> PathBuf {
        self.dir.join(username)
    }

    /// Write (or overwrite) the config for `username` with mode 0644.
    ///
    /// The content lands in a randomly named temp file in the same directory
    /// and is renamed into place, so no username can collide with it.
    pub async fn write(&self, username: &str, config: &AccountConfig) -> Result<PathBuf, AccountConfigError> {
        let path = self.path_for(username);
        let dir = self.dir.clone();
        let target = path.clone();
        let content = config.render();

        let write = async move {
            tokio::task::spawn_blocking(move || install(&dir, &target, content.as_bytes()))
                .await
                .map_err(std::io::Error::other)?
        };

        let result = match tokio::time::timeout(self.runner.timeout(), write).await {
            Ok(Ok(())) => Ok(path.clone()),
            Ok(Err(source)) => Err(AccountConfigError::Write {
                path: path.clone(),
                source,
            }),
            Err(_) => Err(AccountConfigError::Timeout {
                path: path.clone(),
                after: self.runner.timeout(),
            }),
        };

        if result.is_ok() {
            tracing::debug!(path = %path.display(), "account config written");
        }
        result
    }

    /// Hand the file to the configured owner, if any.
    ///
    /// Returns whether a chown was performed.
    pub async fn set_ownership(&self, path: &Path) -> Result<bool, AccountConfigError> {
        let Some(owner) = &self.owner else {
            return Ok(false);
        };

        let command = ToolCommand::new(self.chown.clone())
            .arg(owner.clone())
            .arg(path.to_string_lossy());

        self.runner
            .run(&command, None)
            .await
            .map_err(|source| AccountConfigError::Ownership {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(true)
    }
}

/// Stage `content` next to `path` and rename it over `path`.
fn install(dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let filled = staged.write_all(content).and_then(|()| {
        staged
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(CONFIG_FILE_MODE))
    });
    if let Err(e) = filled {
        discard(staged.into_temp_path());
        return Err(e);
    }

    match staged.persist(path) {
        Ok(_) => Ok(()),
        Err(e) => {
            discard(e.file.into_temp_path());
            Err(e.error)
        }
    }
}

fn discard(staged: tempfile::TempPath) {
    let path = staged.to_path_buf();
    match staged.close() {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "failed to remove staged account config: {}", e),
    }
}
