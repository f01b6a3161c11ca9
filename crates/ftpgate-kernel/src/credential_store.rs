//! Shared credential store.
//!
//! The store is a flat file of alternating username and password lines,
//! consumed by `db_load` to build the lookup index. The file and its index
//! are one logical resource: a record only counts as committed once the
//! index has been rebuilt from the full store contents, and a failed
//! rebuild truncates the store back to its previous length.
//!
//! # Locking
//!
//! Check-for-duplicate, append, and rebuild happen inside one critical
//! section made of two locks:
//!
//! - a process-wide async mutex, so concurrent requests in this server queue
//!   up instead of racing each other's append and rebuild;
//! - an advisory `flock` on the store file, so out-of-band tooling that
//!   honours it cannot interleave either.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::index::{IndexBuilder, IndexError};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {0} already exists")]
    Duplicate(String),

    #[error("credential store {path} unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {after:?} waiting for credential store {path}")]
    Timeout { path: PathBuf, after: Duration },

    #[error("lookup index rebuild failed: {0}")]
    IndexBuild(#[from] IndexError),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::IndexBuild(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Result of a committed append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    /// Records in the store after the append, all reflected in the index.
    pub records: usize,
}

/// The shared username/password file and its derived index.
pub struct CredentialStore {
    path: PathBuf,
    index: Arc<dyn IndexBuilder>,
    io_timeout: Duration,
    lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, index: Arc<dyn IndexBuilder>, io_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            index,
            io_timeout,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `username`/`password` and rebuild the index.
    ///
    /// Fails with [`StoreError::Duplicate`] without touching the file if the
    /// username is already present.
    pub async fn add(&self, username: &str, password: &str) -> Result<Commit, StoreError> {
        let _guard = self.lock.lock().await;

        let mut file = self.open_locked(true).await?;
        let contents = self.read_all(&mut file).await?;

        let existing = usernames(&contents);
        if existing.contains(&username.as_bytes()) {
            return Err(StoreError::Duplicate(username.to_string()));
        }
        let records = existing.len() + 1;

        let previous_len = contents.len() as u64;
        let mut record = Vec::with_capacity(username.len() + password.len() + 3);
        if contents.last().is_some_and(|&b| b != b'\n') {
            record.push(b'\n');
        }
        record.extend_from_slice(username.as_bytes());
        record.push(b'\n');
        record.extend_from_slice(password.as_bytes());
        record.push(b'\n');

        if let Err(e) = self.append(&mut file, &record).await {
            self.rollback(&file, previous_len).await;
            return Err(e);
        }

        let mut updated = contents;
        updated.extend_from_slice(&record);

        if let Err(e) = self.index.rebuild(&updated).await {
            tracing::error!(
                store = %self.path.display(),
                index = %self.index.index_path().display(),
                %username,
                "index rebuild failed, rolling back append: {}",
                e
            );
            self.rollback(&file, previous_len).await;
            return Err(e.into());
        }

        Ok(Commit { records })
    }

    /// All usernames in store order. Bytes that are not UTF-8 are replaced.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut file = match self.open_locked(false).await {
            Ok(file) => file,
            Err(StoreError::Unavailable { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let contents = self.read_all(&mut file).await?;
        Ok(usernames(&contents)
            .into_iter()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect())
    }

    /// Regenerate the index from the store as it stands.
    ///
    /// Recovery path for out-of-band edits that skipped the rebuild.
    pub async fn rebuild_index(&self) -> Result<Commit, StoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.open_locked(false).await?;
        let contents = self.read_all(&mut file).await?;
        self.index.rebuild(&contents).await?;
        Ok(Commit {
            records: usernames(&contents).len(),
        })
    }

    /// Open the store and take the advisory lock. Writers create the file
    /// (mode 0600) if it is missing; readers open it read-only.
    async fn open_locked(&self, write: bool) -> Result<File, StoreError> {
        let mut options = OpenOptions::new();
        options.read(true);
        if write {
            options.append(true).create(true).mode(0o600);
        }

        let file = options
            .open(&self.path)
            .await
            .map_err(|source| self.unavailable(source))?;

        self.lock_exclusive(&file).await?;
        Ok(file)
    }

    /// Poll a non-blocking `flock` until it succeeds or the timeout elapses.
    async fn lock_exclusive(&self, file: &File) -> Result<(), StoreError> {
        use rustix::fs::{FlockOperation, flock};
        use rustix::io::Errno;

        let deadline = tokio::time::Instant::now() + self.io_timeout;
        loop {
            match flock(file, FlockOperation::NonBlockingLockExclusive) {
                Ok(()) => return Ok(()),
                Err(Errno::WOULDBLOCK) | Err(Errno::INTR) => {}
                Err(errno) => return Err(self.unavailable(errno.into())),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::Timeout {
                    path: self.path.clone(),
                    after: self.io_timeout,
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    /// Raw store bytes. Out-of-band tooling may write any encoding, so the
    /// contents are never decoded as a whole.
    async fn read_all(&self, file: &mut File) -> Result<Vec<u8>, StoreError> {
        let read = async {
            file.seek(std::io::SeekFrom::Start(0)).await?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).await?;
            Ok::<_, std::io::Error>(contents)
        };
        match tokio::time::timeout(self.io_timeout, read).await {
            Ok(result) => result.map_err(|source| self.unavailable(source)),
            Err(_) => Err(self.timed_out()),
        }
    }

    async fn append(&self, file: &mut File, record: &[u8]) -> Result<(), StoreError> {
        let write = async {
            file.write_all(record).await?;
            file.flush().await?;
            file.sync_data().await
        };
        match tokio::time::timeout(self.io_timeout, write).await {
            Ok(result) => result.map_err(|source| self.unavailable(source)),
            Err(_) => Err(self.timed_out()),
        }
    }

    async fn rollback(&self, file: &File, len: u64) {
        if let Err(e) = file.set_len(len).await {
            tracing::error!(
                store = %self.path.display(),
                len,
                "failed to roll back credential store: {}",
                e
            );
        }
    }

    fn unavailable(&self, source: std::io::Error) -> StoreError {
        StoreError::Unavailable {
            path: self.path.clone(),
            source,
        }
    }

    fn timed_out(&self) -> StoreError {
        StoreError::Timeout {
            path: self.path.clone(),
            after: self.io_timeout,
        }
    }
}

/// Usernames are the even-numbered lines. Trailing blank lines are ignored;
/// a dangling username without a password still counts.
fn usernames(contents: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = contents
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.iter().step_by(2).copied().collect()
}
