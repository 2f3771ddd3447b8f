use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::classifier::artifact::ModelArtifact;
use crate::error::RecognitionError;

/// An artifact that passed validation, with the time it became active
#[derive(Debug)]
pub struct LoadedModel {
    pub artifact: ModelArtifact,
    pub loaded_at: OffsetDateTime,
}

/// Lazily loaded, shared classifier artifact.
///
/// The first successful [`ModelHandle::ensure_ready`] parses the file and keeps
/// it for the life of the handle. A failed load leaves the handle unloaded so
/// a later call retries from disk.
#[derive(Debug)]
pub struct ModelHandle {
    path: PathBuf,
    model: Mutex<Option<Arc<LoadedModel>>>,
}

impl ModelHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            model: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    pub fn loaded_at(&self) -> Option<OffsetDateTime> {
        self.lock().as_ref().map(|m| m.loaded_at)
    }

    /// Load time as `YYYY-MM-DDTHH:MM:SSZ`, if loaded
    pub fn last_loaded_at(&self) -> Option<String> {
        self.loaded_at().and_then(format_utc_seconds)
    }

    /// Load the artifact unless already loaded. Idempotent once successful.
    pub fn ensure_ready(&self) -> Result<(), RecognitionError> {
        self.acquire().map(|_| ())
    }

    /// Shared reference to the loaded artifact, loading it on first use.
    ///
    /// Concurrent first callers serialize on the lock; exactly one of them
    /// reads the file and the rest observe its result.
    pub fn acquire(&self) -> Result<Arc<LoadedModel>, RecognitionError> {
        let mut guard = self.lock();
        if let Some(model) = guard.as_ref() {
            return Ok(Arc::clone(model));
        }

        info!(path = %self.path.display(), "loading model artifact");
        let artifact = ModelArtifact::load(&self.path).inspect_err(|e| {
            warn!(path = %self.path.display(), error = %e, "model artifact unavailable");
        })?;
        let model = Arc::new(LoadedModel {
            artifact,
            loaded_at: OffsetDateTime::now_utc(),
        });
        info!(
            kind = model.artifact.model.kind(),
            classes = model.artifact.model.classes().len(),
            "model artifact loaded"
        );

        *guard = Some(Arc::clone(&model));
        Ok(model)
    }

    // The slot is only ever replaced whole; a poisoned lock is still usable
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<LoadedModel>>> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn format_utc_seconds(at: OffsetDateTime) -> Option<String> {
    at.to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_whole_seconds_in_utc() {
        let at = datetime!(2024-03-05 07:08:09.123456 UTC);
        assert_eq!(format_utc_seconds(at).as_deref(), Some("2024-03-05T07:08:09Z"));
    }

    #[test]
    fn fresh_handle_is_not_ready() {
        let handle = ModelHandle::new("does/not/exist.json");
        assert!(!handle.is_ready());
        assert!(handle.last_loaded_at().is_none());
    }
}
