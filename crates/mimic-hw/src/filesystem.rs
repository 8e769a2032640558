//! Local-disk filesystem collaborator.

use async_trait::async_trait;
use mimic_core::{FilesystemCollaborator, FsError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Reads and writes photos on the local filesystem via `tokio::fs`.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// failed write never leaves a truncated photo behind.
#[derive(Debug, Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FsError {
    if source.kind() == ErrorKind::NotFound {
        FsError::NotFound(path.to_path_buf())
    } else {
        FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

#[async_trait]
impl FilesystemCollaborator for LocalFilesystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_all(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        tokio::fs::read(path).await.map_err(|e| io_error(path, e))
    }

    async fn write_all(&self, bytes: &[u8], path: &Path) -> Result<(), FsError> {
        let tmp = temp_path_for(path);
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            return Err(FsError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(FsError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "file written");
        Ok(())
    }
}
