mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from multidigit for tests
pub use multidigit::classifier::{Classifier, ModelArtifact, ModelHandle};
pub use multidigit::core::{CaptureMetadata, RecognitionLog, RecognitionRecord};
pub use multidigit::detection::{DESCRIPTOR_LEN, extract_descriptor, preprocess, segment_digits};
pub use multidigit::{
    BoundingBox, DebugConfig, RecognitionError, RecognitionResult, Recognizer, RecognizerConfig,
};
