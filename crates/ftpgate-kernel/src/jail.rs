//! Home-directory confinement.
//!
//! A [`Jail`] turns a caller-supplied folder into a canonical absolute path
//! that is guaranteed to live under the jail root. Containment is checked
//! twice: lexically (so `..` cannot climb out even toward a path that does
//! not exist) and again after canonicalization (so symlinks cannot either).

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Error type for path validation.
#[derive(Debug, Error)]
pub enum JailError {
    /// Resolved path lies outside the jail root.
    #[error("path {path} is outside {root}")]
    InvalidPath { path: String, root: PathBuf },

    /// Resolved path does not exist or is not a directory.
    #[error("directory {0} does not exist")]
    DirectoryNotFound(PathBuf),
}

/// The subtree every account home directory must resolve into.
#[derive(Debug, Clone)]
pub struct Jail {
    /// Root as configured, used for the "already prefixed" check.
    root: PathBuf,
    /// Root with symlinks resolved, used for the containment check.
    canonical_root: PathBuf,
}

impl Jail {
    /// Create a jail rooted at `root`.
    ///
    /// The root is canonicalized at construction time when it exists; a
    /// missing root is kept verbatim and every lookup under it will report
    /// `DirectoryNotFound`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = normalize(&root.into());
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` to a canonical directory inside the jail.
    ///
    /// Absolute paths already under the root are taken as-is; anything else
    /// is treated as relative to the root after stripping leading `/`.
    pub async fn resolve(&self, requested: &str) -> Result<PathBuf, JailError> {
        let candidate = self.anchor(requested);

        let lexical = normalize(&candidate);
        if !self.contains(&lexical) {
            return Err(JailError::InvalidPath {
                path: requested.to_string(),
                root: self.root.clone(),
            });
        }

        let canonical = tokio::fs::canonicalize(&lexical)
            .await
            .map_err(|_| JailError::DirectoryNotFound(lexical.clone()))?;

        if !canonical.starts_with(&self.canonical_root) {
            return Err(JailError::InvalidPath {
                path: requested.to_string(),
                root: self.root.clone(),
            });
        }

        match tokio::fs::metadata(&canonical).await {
            Ok(meta) if meta.is_dir() => Ok(canonical),
            _ => Err(JailError::DirectoryNotFound(lexical)),
        }
    }

    /// Place `requested` under the root unless it already is.
    fn anchor(&self, requested: &str) -> PathBuf {
        let path = Path::new(requested);
        if path.starts_with(&self.root) || path.starts_with(&self.canonical_root) {
            return path.to_path_buf();
        }
        self.root.join(requested.trim_start_matches('/'))
    }

    fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root) || path.starts_with(&self.canonical_root)
    }
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// `..` at the filesystem root stays at the root, matching the kernel.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
