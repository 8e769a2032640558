//! Collaborator contracts consumed by the game session.
//!
//! Platform capture UIs, storage and the cloud scoring service are swapped
//! behind these traits; `mimic-hw` and `mimic-emotion` provide implementations.

use crate::bridge::CaptureCompleter;
use crate::types::EmotionCandidate;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera available: {0}")]
    Unavailable(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("scoring service unreachable: {0}")]
    Http(String),
    #[error("scoring service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("unexpected scoring response: {0}")]
    Parse(String),
    #[error("scoring client misconfigured: {0}")]
    Config(String),
}

/// Platform capture UI.
///
/// `take_picture` starts the capture and returns immediately. The camera must
/// eventually call `completer.deliver(..)` exactly once, from any thread, with
/// the saved photo, a cancellation or an error.
pub trait CameraCollaborator: Send + Sync {
    fn take_picture(&self, completer: CaptureCompleter) -> Result<(), CameraError>;
}

/// Byte-level file access for captured photos.
#[async_trait]
pub trait FilesystemCollaborator: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// Fails with [`FsError::NotFound`] when `path` does not exist.
    async fn read_all(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Replace the contents of `path` with `bytes`.
    async fn write_all(&self, bytes: &[u8], path: &Path) -> Result<(), FsError>;
}

/// Cloud emotion recognition.
#[async_trait]
pub trait EmotionScoringCollaborator: Send + Sync {
    /// One candidate per detected face, largest face first. Empty when no
    /// face was found.
    async fn score_image(&self, image: Vec<u8>) -> Result<Vec<EmotionCandidate>, ScoringError>;
}
