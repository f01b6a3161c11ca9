//! Folder picker backend.
//!
//! Lists the immediate subdirectories of a directory inside the jail, for
//! the UI that lets an operator choose an account's home directory.

use std::path::PathBuf;

use ftpgate_types::{FolderEntry, ListFoldersResponse};
use thiserror::Error;

use crate::jail::{Jail, JailError};

/// Error type for folder listing.
#[derive(Debug, Error)]
pub enum FolderError {
    #[error(transparent)]
    Jail(#[from] JailError),

    #[error("failed to read directory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lists directories under a [`Jail`].
#[derive(Debug, Clone)]
pub struct FolderBrowser {
    jail: Jail,
}

impl FolderBrowser {
    pub fn new(jail: Jail) -> Self {
        Self { jail }
    }

    /// List subdirectories of `path` (the jail root when `None` or empty),
    /// sorted by name.
    ///
    /// Symlinks to directories are listed; entries that cannot be stat'ed
    /// are skipped. Hidden directories are included.
    pub async fn list(&self, path: Option<&str>) -> Result<ListFoldersResponse, FolderError> {
        let requested = path.filter(|p| !p.is_empty()).unwrap_or("/");
        let dir = self.jail.resolve(requested).await?;

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| FolderError::Read {
                path: dir.clone(),
                source,
            })?;

        let mut folders = Vec::new();
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(FolderError::Read {
                        path: dir.clone(),
                        source,
                    });
                }
            };

            let entry_path = entry.path();
            match tokio::fs::metadata(&entry_path).await {
                Ok(meta) if meta.is_dir() => folders.push(FolderEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry_path.to_string_lossy().into_owned(),
                }),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %entry_path.display(), "skipping entry: {}", e);
                }
            }
        }

        folders.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ListFoldersResponse {
            folders,
            current_path: dir.to_string_lossy().into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (FolderBrowser, TempDir) {
        let dir = TempDir::new().unwrap();
        for sub in ["clients/bob", "clients/alice", "archive"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        std::fs::write(dir.path().join("clients/notes.txt"), "x").unwrap();
        (FolderBrowser::new(Jail::new(dir.path())), dir)
    }

    #[tokio::test]
    async fn test_lists_root_by_default() {
        let (browser, dir) = setup();
        let listing = browser.list(None).await.unwrap();

        let names: Vec<_> = listing.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["archive", "clients"]);
        assert_eq!(
            listing.current_path,
            dir.path().canonicalize().unwrap().to_string_lossy()
        );
    }

    #[tokio::test]
    async fn test_sorted_directories_only() {
        let (browser, dir) = setup();
        let listing = browser.list(Some("/clients")).await.unwrap();

        let names: Vec<_> = listing.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["alice", "bob"]);

        let alice = dir.path().canonicalize().unwrap().join("clients/alice");
        assert_eq!(listing.folders[0].path, alice.to_string_lossy());
    }

    #[tokio::test]
    async fn test_empty_path_means_root() {
        let (browser, _dir) = setup();
        let listing = browser.list(Some("")).await.unwrap();
        assert_eq!(listing.folders.len(), 2);
    }

    #[tokio::test]
    async fn test_outside_jail_rejected() {
        let (browser, _dir) = setup();
        let result = browser.list(Some("../../etc")).await;
        assert!(matches!(
            result,
            Err(FolderError::Jail(JailError::InvalidPath { .. }))
        ));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let (browser, _dir) = setup();
        let result = browser.list(Some("/nowhere")).await;
        assert!(matches!(
            result,
            Err(FolderError::Jail(JailError::DirectoryNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_dangling_symlink_skipped() {
        let (browser, dir) = setup();
        std::os::unix::fs::symlink(
            dir.path().join("gone"),
            dir.path().join("clients/dangling"),
        )
        .unwrap();

        let listing = browser.list(Some("/clients")).await.unwrap();
        assert_eq!(listing.folders.len(), 2);
    }
}
