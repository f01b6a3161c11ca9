//! Lookup index regeneration.
//!
//! The index is derived state: it is always rebuilt from the complete store
//! contents, never patched with a single record. [`DbLoadIndexBuilder`] feeds
//! the store text to `db_load -T -t hash` writing into a sibling temp file,
//! then renames it over the live index so `pam_userdb` never sees a
//! half-written database.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::tool::{ToolCommand, ToolError, ToolRunner};

/// Error type for index regeneration.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("failed to install index {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Tool(e) if e.is_timeout())
    }
}

/// Rebuilds the lookup index from the full credential store text.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    /// Replace the index with one built from `store_contents`.
    async fn rebuild(&self, store_contents: &[u8]) -> Result<(), IndexError>;

    /// Path of the live index, for logging.
    fn index_path(&self) -> &Path;
}

/// Berkeley DB hash index built by `db_load`.
pub struct DbLoadIndexBuilder {
    runner: ToolRunner,
    command: ToolCommand,
    index_path: PathBuf,
}

impl DbLoadIndexBuilder {
    /// `<db_load> -T -t hash <index>.tmp`, stdin = store contents.
    pub fn new(runner: ToolRunner, db_load: impl Into<String>, index_path: impl Into<PathBuf>) -> Self {
        Self::with_command(
            runner,
            ToolCommand::new(db_load).args(["-T", "-t", "hash"]),
            index_path,
        )
    }

    /// Use an arbitrary command; the temp output path is appended as the
    /// last argument.
    pub fn with_command(runner: ToolRunner, command: ToolCommand, index_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            command,
            index_path: index_path.into(),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.index_path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn discard(path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "failed to remove staged index: {}", e),
        }
    }
}

#[async_trait]
impl IndexBuilder for DbLoadIndexBuilder {
    async fn rebuild(&self, store_contents: &[u8]) -> Result<(), IndexError> {
        let staging = self.staging_path();

        // db_load merges into an existing file
        Self::discard(&staging).await;

        let command = self.command.clone().arg(staging.to_string_lossy());
        if let Err(e) = self.runner.run(&command, Some(store_contents)).await {
            Self::discard(&staging).await;
            return Err(e.into());
        }

        if let Err(source) = tokio::fs::rename(&staging, &self.index_path).await {
            Self::discard(&staging).await;
            return Err(IndexError::Install {
                path: self.index_path.clone(),
                source,
            });
        }

        tracing::debug!(index = %self.index_path.display(), "lookup index rebuilt");
        Ok(())
    }

    fn index_path(&self) -> &Path {
        &self.index_path
    }
}
