//! Workspace: path-confined file CRUD over one project's directory.
//!
//! Every path handed in by the agent is relative to the workspace root.
//! Resolution is lexical first (no `..`, no absolute paths), then checked
//! against the canonical root so a symlink inside the tree cannot point the
//! agent somewhere else. The root is created on first access and never
//! removed from here.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ErrorKind;

/// Errors from workspace operations. Each carries the normalized (or, for
/// escapes, the raw) path it refers to.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Invalid path '{path}'. The path must be within the project directory.")]
    PathEscape { path: String },

    #[error("{path} does not exist.")]
    NotFound { path: String },

    #[error("{path} already exists.")]
    AlreadyExists { path: String },

    #[error("{path} is a directory, not a file.")]
    IsADirectory { path: String },

    #[error("{path} is a file, not a directory.")]
    NotADirectory { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkspaceError::PathEscape { .. } => ErrorKind::PathEscape,
            WorkspaceError::NotFound { .. } => ErrorKind::NotFound,
            WorkspaceError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            WorkspaceError::IsADirectory { .. } => ErrorKind::IsADirectory,
            WorkspaceError::NotADirectory { .. } => ErrorKind::NotADirectory,
            WorkspaceError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            WorkspaceError::PathEscape { path }
            | WorkspaceError::NotFound { path }
            | WorkspaceError::AlreadyExists { path }
            | WorkspaceError::IsADirectory { path }
            | WorkspaceError::NotADirectory { path }
            | WorkspaceError::Io { path, .. } => path,
        }
    }

    fn io(path: &str, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            path: path.to_string(),
            source,
        }
    }
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Outcome of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: String,
    pub message: String,
}

/// Outcome of `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// A single entry in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

/// Outcome of `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

/// Normalize an agent-supplied path to a `/`-separated path relative to the
/// workspace root. The root itself normalizes to the empty string.
///
/// Absolute paths and any `..` segment are rejected outright.
pub fn normalize(path: &str) -> WorkspaceResult<String> {
    let escape = || WorkspaceError::PathEscape {
        path: path.to_string(),
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(escape)?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(escape())
            }
        }
    }
    Ok(parts.join("/"))
}

/// Symlink hops followed before a dangling chain is treated as an escape.
const MAX_LINK_HOPS: usize = 40;

/// A project's workspace directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Bind a workspace to `root`. Nothing touches the disk until the first
    /// operation.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to `(normalized, absolute)`, enforcing
    /// confinement.
    pub async fn resolve(&self, path: &str) -> WorkspaceResult<(String, PathBuf)> {
        let normalized = normalize(path)?;
        let root = self.ensure_root().await?;
        let full = if normalized.is_empty() {
            root.clone()
        } else {
            root.join(&normalized)
        };

        let escape = || WorkspaceError::PathEscape {
            path: path.to_string(),
        };

        // Follow symlinks through the deepest existing ancestor. Dangling
        // links are chased to their target, which must land inside the root.
        let mut cursor = full.clone();
        let mut hops = 0;
        loop {
            match tokio::fs::canonicalize(&cursor).await {
                Ok(real) => {
                    if !real.starts_with(&root) {
                        return Err(escape());
                    }
                    break;
                }
                Err(_) => {
                    if let Ok(target) = tokio::fs::read_link(&cursor).await {
                        hops += 1;
                        if hops > MAX_LINK_HOPS {
                            return Err(escape());
                        }
                        cursor = match cursor.parent() {
                            Some(parent) => parent.join(target),
                            None => target,
                        };
                        continue;
                    }
                    match cursor.parent() {
                        Some(parent) => cursor = parent.to_path_buf(),
                        None => break,
                    }
                }
            }
        }

        Ok((normalized, full))
    }

    /// Whether `path` exists (false for escapes).
    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path).await {
            Ok((_, full)) => tokio::fs::try_exists(&full).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Create a new file. Fails if anything already exists at `path`.
    pub async fn create(&self, path: &str, content: &str) -> WorkspaceResult<FileOutcome> {
        let (rel, full) = self.resolve(path).await?;
        if self.metadata(&rel, &full).await?.is_some() {
            return Err(WorkspaceError::AlreadyExists { path: rel });
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io(&rel, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| WorkspaceError::io(&rel, e))?;

        info!(path = %rel, bytes = content.len(), "created file");
        Ok(FileOutcome {
            message: format!("File {rel} created successfully."),
            path: rel,
        })
    }

    /// Read a file's content as UTF-8.
    pub async fn read(&self, path: &str) -> WorkspaceResult<FileContent> {
        let (rel, full) = self.existing_file(path).await?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| WorkspaceError::io(&rel, e))?;
        debug!(path = %rel, bytes = content.len(), "read file");
        Ok(FileContent { path: rel, content })
    }

    /// Replace an existing file's content.
    pub async fn update(&self, path: &str, content: &str) -> WorkspaceResult<FileOutcome> {
        let (rel, full) = self.existing_file(path).await?;
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| WorkspaceError::io(&rel, e))?;

        info!(path = %rel, bytes = content.len(), "updated file");
        Ok(FileOutcome {
            message: format!("File {rel} updated successfully."),
            path: rel,
        })
    }

    /// Delete a file, or a directory recursively. The root cannot be deleted.
    pub async fn delete(&self, path: &str) -> WorkspaceResult<FileOutcome> {
        let (rel, full) = self.resolve(path).await?;
        if rel.is_empty() {
            return Err(WorkspaceError::PathEscape {
                path: path.to_string(),
            });
        }
        let meta = self
            .metadata(&rel, &full)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound { path: rel.clone() })?;

        let message = if meta.is_dir() {
            tokio::fs::remove_dir_all(&full)
                .await
                .map_err(|e| WorkspaceError::io(&rel, e))?;
            format!("Directory {rel} deleted successfully.")
        } else {
            tokio::fs::remove_file(&full)
                .await
                .map_err(|e| WorkspaceError::io(&rel, e))?;
            format!("File {rel} deleted successfully.")
        };

        info!(path = %rel, "deleted");
        Ok(FileOutcome { path: rel, message })
    }

    /// List a directory: directories first, then case-insensitive name.
    /// Dotfiles are skipped.
    pub async fn list(&self, dir_path: &str) -> WorkspaceResult<Listing> {
        let (rel, full) = self.resolve(dir_path).await?;
        let meta = self
            .metadata(&rel, &full)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound { path: rel.clone() })?;
        if !meta.is_dir() {
            return Err(WorkspaceError::NotADirectory { path: rel });
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| WorkspaceError::io(&rel, e))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(&rel, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = tokio::fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            let path = if rel.is_empty() {
                name.clone()
            } else {
                format!("{rel}/{name}")
            };
            entries.push(DirEntry { name, path, is_dir });
        }

        entries.sort_by(|a, b| {
            (!a.is_dir, a.name.to_lowercase(), &a.name).cmp(&(
                !b.is_dir,
                b.name.to_lowercase(),
                &b.name,
            ))
        });

        Ok(Listing { path: rel, entries })
    }

    async fn ensure_root(&self) -> WorkspaceResult<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| WorkspaceError::io("", e))?;
        tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| WorkspaceError::io("", e))
    }

    async fn metadata(
        &self,
        rel: &str,
        full: &Path,
    ) -> WorkspaceResult<Option<std::fs::Metadata>> {
        match tokio::fs::metadata(full).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WorkspaceError::io(rel, e)),
        }
    }

    async fn existing_file(&self, path: &str) -> WorkspaceResult<(String, PathBuf)> {
        let (rel, full) = self.resolve(path).await?;
        match self.metadata(&rel, &full).await? {
            None => Err(WorkspaceError::NotFound { path: rel }),
            Some(meta) if meta.is_dir() => Err(WorkspaceError::IsADirectory { path: rel }),
            Some(_) => Ok((rel, full)),
        }
    }
}
