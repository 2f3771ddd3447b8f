//! Pre-trained digit classifier: artifact layout, confidence derivation and
//! the lazily loaded shared handle.

pub mod artifact;
pub mod handle;

pub use artifact::{
    CentroidModel, Classifier, DEFAULT_CONFIDENCE, FeatureScaler, LinearModel, ModelArtifact,
    Prediction,
};
pub use handle::{LoadedModel, ModelHandle};

use crate::detection::Descriptor;

/// Label and confidence percentage for one descriptor
pub fn classify(artifact: &ModelArtifact, descriptor: &Descriptor) -> (String, f64) {
    let Prediction { label, confidence } = artifact.classify(descriptor.as_slice());
    (label, confidence)
}
