pub mod classifier;
pub mod core;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;

pub use classifier::{Classifier, ModelArtifact, ModelHandle};
pub use error::RecognitionError;
pub use models::{BoundingBox, DigitComponent, RecognitionResult, Segment};
pub use pipeline::{DebugConfig, Recognizer, RecognizerConfig};
