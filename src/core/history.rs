//! Persisted uploads and the append-only recognition log.
//!
//! Each upload is stored under a unique name next to `recognitions_log.jsonl`,
//! which gets one JSON object per recognition.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use uuid::Uuid;

use crate::models::{DigitComponent, RecognitionResult};

pub const HISTORY_FILE_NAME: &str = "recognitions_log.jsonl";
pub const DEFAULT_UPLOAD_NAME: &str = "capture.jpg";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("upload is empty")]
    EmptyUpload,

    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Caller-supplied context stored alongside each recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub device_id: String,
    pub capture_source: String,
    /// Client capture time, ISO-8601
    pub timestamp: String,
    pub crop_box: Option<String>,
}

impl CaptureMetadata {
    /// Fill unset fields with their defaults; the timestamp defaults to now
    pub fn new(
        device_id: Option<String>,
        capture_source: Option<String>,
        timestamp: Option<String>,
        crop_box: Option<String>,
    ) -> Result<Self, HistoryError> {
        let timestamp = match timestamp {
            Some(t) => t,
            None => now_utc()?,
        };
        Ok(Self {
            device_id: device_id.unwrap_or_else(|| "unknown-device".to_string()),
            capture_source: capture_source.unwrap_or_else(|| "unknown".to_string()),
            timestamp,
            crop_box,
        })
    }
}

/// One line of the recognition log, minus the server timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionRecord {
    pub file_path: PathBuf,
    pub prediction: String,
    pub accuracy: f64,
    pub processing_time_ms: u64,
    pub metadata: CaptureMetadata,
    pub digits: Vec<DigitComponent>,
}

impl RecognitionRecord {
    pub fn new(file_path: PathBuf, result: RecognitionResult, metadata: CaptureMetadata) -> Self {
        Self {
            file_path,
            prediction: result.prediction,
            accuracy: result.accuracy,
            processing_time_ms: result.processing_time_ms,
            metadata,
            digits: result.digits,
        }
    }
}

/// A record as read back from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedRecognition {
    #[serde(flatten)]
    pub record: RecognitionRecord,
    pub logged_at: String,
}

/// Upload directory plus its JSONL history file
#[derive(Debug, Clone)]
pub struct RecognitionLog {
    base_dir: PathBuf,
    history_path: PathBuf,
}

impl RecognitionLog {
    /// Create `base_dir` and an empty history file if missing
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let history_path = base_dir.join(HISTORY_FILE_NAME);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&history_path)?;
        Ok(Self {
            base_dir,
            history_path,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    /// Persist uploaded bytes as `<uuid>_<name>` and return the stored path.
    ///
    /// Only the final component of `file_name` is kept.
    pub fn store_upload(&self, bytes: &[u8], file_name: Option<&str>) -> Result<PathBuf, HistoryError> {
        if bytes.is_empty() {
            return Err(HistoryError::EmptyUpload);
        }
        let name = file_name
            .and_then(|n| Path::new(n).file_name())
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_UPLOAD_NAME);
        let path = self
            .base_dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), name));
        std::fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored upload");
        Ok(path)
    }

    /// Append `record` with the current UTC time as `logged_at`
    pub fn append(&self, record: RecognitionRecord) -> Result<LoggedRecognition, HistoryError> {
        let entry = LoggedRecognition {
            record,
            logged_at: now_utc()?,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().append(true).open(&self.history_path)?;
        file.write_all(line.as_bytes())?;
        Ok(entry)
    }

    /// The last `limit` records in log order
    pub fn latest(&self, limit: usize) -> Result<Vec<LoggedRecognition>, HistoryError> {
        let reader = BufReader::new(File::open(&self.history_path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}

fn now_utc() -> Result<String, HistoryError> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}
