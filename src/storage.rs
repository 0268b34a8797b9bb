//! Local file storage for generated PDFs.
//!
//! Every path handed to this module is relative to a single root directory and is
//! resolved through [`LocalFileStorage::resolve`], which refuses anything that could
//! land outside that root.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const DOCUMENT_EXTENSION: &str = "pdf";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path '{0}' resolves outside the storage root")]
    InvalidPath(String),
    #[error("file '{0}' does not exist")]
    NotFound(String),
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_string())
        } else {
            Self::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

/// A file found while listing the storage root.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: String,
    pub modified: SystemTime,
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Write a new file. Never overwrites an existing one.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete a file. Deleting a file that is already gone is not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// List every document file directly under the root.
    async fn list(&self) -> Result<Vec<StoredFile>, StorageError>;
}

/// Allocate a fresh storage path. Never derived from user input.
pub fn generate_document_path() -> String {
    format!("doc-{}.{}", Uuid::new_v4(), DOCUMENT_EXTENSION)
}

pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Open (and create if absent) the storage root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let display = root.display().to_string();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::io(&display, e))?;
        let root = root
            .canonicalize()
            .map_err(|e| StorageError::io(&display, e))?;
        log::info!("Document storage root: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage-relative path to an absolute one inside the root.
    ///
    /// Only plain file-name components are accepted: absolute paths, `..`, `.` and
    /// drive prefixes are all rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty() || path.contains('\0') {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        let mut components = 0;
        for component in relative.components() {
            match component {
                Component::Normal(_) => components += 1,
                _ => return Err(StorageError::InvalidPath(path.to_string())),
            }
        }
        if components == 0 {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        let full = self.root.join(relative);
        if !full.starts_with(&self.root) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(full)
    }

    /// Re-check containment after symlinks are resolved.
    async fn ensure_contained(&self, path: &str, full: &Path) -> Result<PathBuf, StorageError> {
        let canonical = fs::canonicalize(full)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        if !canonical.starts_with(&self.root) {
            log::warn!("Refusing storage path escaping the root: {}", path);
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(canonical)
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        let written = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&full).await {
                log::warn!("Failed to remove partial file {}: {}", path, cleanup);
            }
            return Err(StorageError::io(path, e));
        }

        log::debug!("Wrote {} bytes to {}", data.len(), path);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        let canonical = self.ensure_contained(path, &full).await?;
        fs::read(&canonical)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<StoredFile>, StorageError> {
        let root_display = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io(&root_display, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&root_display, e))?
        {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if Path::new(&name).extension().and_then(|ext| ext.to_str())
                != Some(DOCUMENT_EXTENSION)
            {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("Skipping unreadable storage entry {}: {}", name, e);
                    continue;
                }
            };

            files.push(StoredFile {
                path: name,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(files)
    }
}
