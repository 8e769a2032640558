//! Photo-import camera: "captures" by copying an existing photo.
//!
//! Stands in for a platform photo picker. The caller stages a source file,
//! then the session's capture request copies it into the capture directory
//! on a background task and delivers the outcome out-of-band.

use mimic_core::{
    capture_file_name, CameraCollaborator, CameraError, CaptureCompleter, CaptureOutcome,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

pub struct ImportCamera {
    capture_dir: PathBuf,
    staged: Mutex<Option<PathBuf>>,
}

impl ImportCamera {
    pub fn new(capture_dir: impl Into<PathBuf>) -> Self {
        Self {
            capture_dir: capture_dir.into(),
            staged: Mutex::new(None),
        }
    }

    /// Choose the photo for the next capture. Nothing staged means the next
    /// capture is reported as cancelled.
    pub fn stage(&self, source: impl Into<PathBuf>) {
        *self.staged.lock() = Some(source.into());
    }

    /// Stage `source` unless another photo is still waiting for its capture.
    pub fn try_stage(&self, source: impl Into<PathBuf>) -> bool {
        let mut staged = self.staged.lock();
        if staged.is_some() {
            return false;
        }
        *staged = Some(source.into());
        true
    }

    /// Withdraw the staged photo, e.g. when its capture was rejected.
    pub fn unstage(&self) -> Option<PathBuf> {
        self.staged.lock().take()
    }

    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }
}

impl CameraCollaborator for ImportCamera {
    fn take_picture(&self, completer: CaptureCompleter) -> Result<(), CameraError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CameraError::Unavailable("photo import needs a tokio runtime".into()))?;
        let source = self.staged.lock().take();
        let dir = self.capture_dir.clone();

        runtime.spawn(async move {
            let outcome = match source {
                None => CaptureOutcome::Cancelled,
                Some(source) => import_photo(&source, &dir).await,
            };
            completer.deliver(outcome);
        });
        Ok(())
    }
}

async fn import_photo(source: &Path, dir: &Path) -> CaptureOutcome {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return CaptureOutcome::failed(format!("photo not found: {}", source.display()));
    }
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        return CaptureOutcome::failed(format!(
            "cannot create capture directory {}: {e}",
            dir.display()
        ));
    }

    let dest = capture_file_name(dir, &uuid::Uuid::new_v4().to_string());
    match tokio::fs::copy(source, &dest).await {
        Ok(bytes) => {
            tracing::info!(source = %source.display(), dest = %dest.display(), bytes, "photo imported");
            CaptureOutcome::saved(dest)
        }
        Err(e) => CaptureOutcome::failed(format!("failed to import {}: {e}", source.display())),
    }
}
