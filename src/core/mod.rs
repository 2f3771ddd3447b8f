pub mod history;

pub use history::{CaptureMetadata, HistoryError, LoggedRecognition, RecognitionLog, RecognitionRecord};
