use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detection::DESCRIPTOR_LEN;
use crate::error::RecognitionError;
use crate::models::round2;

/// Confidence reported by classifiers that expose no score
pub const DEFAULT_CONFIDENCE: f64 = 75.0;

/// Per-feature standardization learned at training time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl FeatureScaler {
    /// `(x - mean) / scale`; a zero scale leaves the centered value as is
    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect()
    }

    fn validate(&self, dim: usize) -> Result<(), String> {
        if self.mean.len() != dim || self.scale.len() != dim {
            return Err(format!(
                "scaler expects {} features (mean {}, scale {}), descriptors have {}",
                self.mean.len().max(self.scale.len()),
                self.mean.len(),
                self.scale.len(),
                dim
            ));
        }
        Ok(())
    }
}

/// One weight row and bias per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub classes: Vec<String>,
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
}

impl LinearModel {
    /// Raw per-class scores `coef · x + intercept`
    pub fn decision(&self, x: &[f64]) -> Vec<f64> {
        self.coef
            .iter()
            .zip(&self.intercept)
            .map(|(row, bias)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + bias)
            .collect()
    }

    fn validate(&self, dim: usize) -> Result<(), String> {
        validate_classes(&self.classes)?;
        if self.coef.len() != self.classes.len() || self.intercept.len() != self.classes.len() {
            return Err(format!(
                "{} classes but {} weight rows and {} intercepts",
                self.classes.len(),
                self.coef.len(),
                self.intercept.len()
            ));
        }
        if let Some(row) = self.coef.iter().find(|row| row.len() != dim) {
            return Err(format!("weight row has {} entries, expected {}", row.len(), dim));
        }
        Ok(())
    }
}

/// Class means in scaled feature space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidModel {
    pub classes: Vec<String>,
    pub centroids: Vec<Vec<f64>>,
}

impl CentroidModel {
    fn nearest(&self, x: &[f64]) -> usize {
        let distances: Vec<f64> = self
            .centroids
            .iter()
            .map(|c| c.iter().zip(x).map(|(a, b)| (a - b) * (a - b)).sum())
            .collect();
        argmin(&distances)
    }

    fn validate(&self, dim: usize) -> Result<(), String> {
        validate_classes(&self.classes)?;
        if self.centroids.len() != self.classes.len() {
            return Err(format!(
                "{} classes but {} centroids",
                self.classes.len(),
                self.centroids.len()
            ));
        }
        if let Some(c) = self.centroids.iter().find(|c| c.len() != dim) {
            return Err(format!("centroid has {} entries, expected {}", c.len(), dim));
        }
        Ok(())
    }
}

/// A pre-trained classifier, tagged by how it can justify its answer.
///
/// The variant is fixed when the artifact is parsed, so confidence derivation
/// never has to inspect the model per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Classifier {
    /// Linear SVM: exposes decision margins
    #[serde(rename = "linear_svm")]
    MarginScored(LinearModel),
    /// Multinomial logistic regression: exposes class probabilities
    #[serde(rename = "softmax")]
    ProbabilityScored(LinearModel),
    /// Nearest centroid: a label and nothing else
    #[serde(rename = "nearest_centroid")]
    Unscored(CentroidModel),
}

/// Label and confidence percentage for one descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

impl Classifier {
    pub fn classes(&self) -> &[String] {
        match self {
            Classifier::MarginScored(m) | Classifier::ProbabilityScored(m) => &m.classes,
            Classifier::Unscored(m) => &m.classes,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Classifier::MarginScored(_) => "linear_svm",
            Classifier::ProbabilityScored(_) => "softmax",
            Classifier::Unscored(_) => "nearest_centroid",
        }
    }

    /// Predict a label for already-scaled features
    pub fn predict(&self, x: &[f64]) -> Prediction {
        match self {
            Classifier::MarginScored(model) => {
                let scores = model.decision(x);
                let best = argmax(&scores);
                // Logistic of the winning margin's magnitude
                let margin = scores[best].abs();
                Prediction {
                    label: model.classes[best].clone(),
                    confidence: round2(100.0 / (1.0 + (-margin).exp())),
                }
            }
            Classifier::ProbabilityScored(model) => {
                let probabilities = softmax(&model.decision(x));
                let best = argmax(&probabilities);
                Prediction {
                    label: model.classes[best].clone(),
                    confidence: round2(probabilities[best] * 100.0),
                }
            }
            Classifier::Unscored(model) => Prediction {
                label: model.classes[model.nearest(x)].clone(),
                confidence: DEFAULT_CONFIDENCE,
            },
        }
    }

    fn validate(&self, dim: usize) -> Result<(), String> {
        match self {
            Classifier::MarginScored(m) | Classifier::ProbabilityScored(m) => m.validate(dim),
            Classifier::Unscored(m) => m.validate(dim),
        }
    }
}

/// Classifier and scaler pair, exactly as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: Classifier,
    pub scaler: FeatureScaler,
}

impl ModelArtifact {
    /// Read and validate an artifact file.
    ///
    /// A missing file is a configuration error; anything unreadable or
    /// malformed behind an existing path is an integrity error.
    pub fn load(path: &Path) -> Result<Self, RecognitionError> {
        if !path.exists() {
            return Err(RecognitionError::Configuration {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RecognitionError::Configuration {
                path: path.to_path_buf(),
            },
            _ => RecognitionError::integrity(path, format!("cannot read file: {}", e)),
        })?;

        Self::from_json(&contents).map_err(|reason| RecognitionError::integrity(path, reason))
    }

    /// Parse and validate artifact JSON against the descriptor length
    pub fn from_json(contents: &str) -> Result<Self, String> {
        let mut document: serde_json::Value =
            serde_json::from_str(contents).map_err(|e| format!("not valid JSON: {}", e))?;

        let (Some(model), Some(scaler)) = (
            document.get_mut("model").map(serde_json::Value::take),
            document.get_mut("scaler").map(serde_json::Value::take),
        ) else {
            return Err("artifact must contain both 'model' and 'scaler'".to_string());
        };
        if model.is_null() || scaler.is_null() {
            return Err("artifact must contain both 'model' and 'scaler'".to_string());
        }

        let model: Classifier =
            serde_json::from_value(model).map_err(|e| format!("invalid 'model': {}", e))?;
        let scaler: FeatureScaler =
            serde_json::from_value(scaler).map_err(|e| format!("invalid 'scaler': {}", e))?;

        scaler.validate(DESCRIPTOR_LEN)?;
        model.validate(DESCRIPTOR_LEN)?;

        Ok(Self { model, scaler })
    }

    /// Scale a descriptor and classify it
    pub fn classify(&self, features: &[f64]) -> Prediction {
        self.model.predict(&self.scaler.transform(features))
    }
}

fn validate_classes(classes: &[String]) -> Result<(), String> {
    if classes.is_empty() {
        return Err("classifier has no classes".to_string());
    }
    if let Some(bad) = classes.iter().find(|c| c.chars().count() != 1) {
        return Err(format!("class label {:?} is not a single character", bad));
    }
    Ok(())
}

/// Index of the first maximum
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Index of the first minimum
fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v < values[best] {
            best = i;
        }
    }
    best
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
