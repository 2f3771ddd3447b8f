use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by `ModelHandle::ensure_ready` and `Recognizer::predict`
#[derive(Error, Debug)]
pub enum RecognitionError {
    /// Artifact file is absent; the deployment must be fixed
    #[error("model artifact not found at {}; set MODEL_PATH to a valid artifact file", path.display())]
    Configuration { path: PathBuf },

    /// Artifact file exists but does not hold a usable model and scaler
    #[error("invalid model artifact {}: {reason}", path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error("image file could not be read: {0}")]
    Decode(#[from] image::ImageError),

    #[error("no digits detected in image")]
    Segmentation,
}

impl RecognitionError {
    pub(crate) fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RecognitionError::Integrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when a new upload (re-upload, retake) can fix the failure
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            RecognitionError::Decode(_) | RecognitionError::Segmentation
        )
    }
}
