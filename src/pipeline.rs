use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Result;
use image::{DynamicImage, GrayImage};
use tracing::{debug, info, warn};

use crate::classifier::{ModelHandle, classify};
use crate::detection::{extract_descriptor, preprocess, segment_digits};
use crate::error::RecognitionError;
use crate::models::{DigitComponent, RecognitionResult, Segment, round2};

/// Environment variable naming the model artifact file
pub const MODEL_PATH_ENV: &str = "MODEL_PATH";
pub const DEFAULT_MODEL_PATH: &str = "models/digit_model.json";

/// How a [`Recognizer`] finds and loads its model
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub model_path: PathBuf,
    /// Load the artifact during construction instead of on first use
    pub eager: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            eager: false,
        }
    }
}

impl RecognizerConfig {
    /// Model path from `MODEL_PATH`, or the default location
    pub fn from_env() -> Self {
        let model_path = std::env::var_os(MODEL_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));
        Self {
            model_path,
            eager: false,
        }
    }
}

/// Configuration for saving intermediate images of each request
#[derive(Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
    requests: AtomicUsize,
}

impl DebugConfig {
    /// The directory must be empty or non-existent
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        Ok(Self {
            output_dir,
            requests: AtomicUsize::new(0),
        })
    }

    /// Reserve the next numbered request directory (`01`, `02`, ...)
    fn next_request_dir(&self) -> PathBuf {
        let id = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.output_dir.join(format!("{:02}", id))
    }
}

/// Per-request sink for debug images. Failures are logged and swallowed.
struct DebugSink {
    dir: Option<PathBuf>,
}

impl DebugSink {
    fn new(config: Option<&DebugConfig>) -> Self {
        Self {
            dir: config.map(DebugConfig::next_request_dir),
        }
    }

    fn save(&self, stage: &str, index: usize, image: &DynamicImage) {
        let Some(dir) = &self.dir else {
            return;
        };
        let stage_dir = dir.join(stage);
        let path = stage_dir.join(format!("{:02}.png", index));
        if let Err(e) = save_png(&stage_dir, &path, image) {
            warn!(path = %path.display(), error = %e, "failed to save debug image");
        } else {
            debug!(path = %path.display(), "saved debug image");
        }
    }

    fn save_gray(&self, stage: &str, index: usize, image: &GrayImage) {
        if self.dir.is_some() {
            self.save(stage, index, &DynamicImage::ImageLuma8(image.clone()));
        }
    }
}

fn save_png(stage_dir: &Path, path: &Path, image: &DynamicImage) -> Result<()> {
    std::fs::create_dir_all(stage_dir)?;
    image
        .save(path)
        .map_err(|e| anyhow::anyhow!("Failed to save debug image: {}", e))
}

/// Runs the full recognition chain against a shared model handle.
///
/// A `Recognizer` is `Sync`; one instance can serve concurrent callers.
pub struct Recognizer {
    model: Arc<ModelHandle>,
    debug: Option<DebugConfig>,
}

impl Recognizer {
    /// Build a recognizer for `config`. With `eager` set the artifact is
    /// loaded now and any load error is returned.
    pub fn new(config: RecognizerConfig) -> Result<Self, RecognitionError> {
        let recognizer = Self::with_model(Arc::new(ModelHandle::new(config.model_path)));
        if config.eager {
            recognizer.ensure_ready()?;
        }
        Ok(recognizer)
    }

    /// Use an existing, possibly already loaded, model handle
    pub fn with_model(model: Arc<ModelHandle>) -> Self {
        Self { model, debug: None }
    }

    /// Save intermediate images of every request under `debug.output_dir`
    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    pub fn ensure_ready(&self) -> Result<(), RecognitionError> {
        self.model.ensure_ready()
    }

    /// Recognize the digit sequence in an encoded image.
    ///
    /// `expected_digits` is a hint for the segmenter; zero counts as absent.
    pub fn predict(
        &self,
        image_bytes: &[u8],
        expected_digits: Option<usize>,
    ) -> Result<RecognitionResult, RecognitionError> {
        let model = self.model.acquire()?;
        let image = image::load_from_memory(image_bytes)?;
        let sink = DebugSink::new(self.debug.as_ref());
        sink.save("00_input", 1, &image);

        let started = Instant::now();

        let preprocessed = preprocess(&image);
        sink.save_gray("01_preprocessed", 1, &preprocessed.image);

        let segments = segment_digits(
            &preprocessed.image,
            preprocessed.contrast,
            expected_digits,
        );
        if segments.is_empty() {
            info!("no digits detected");
            return Err(RecognitionError::Segmentation);
        }

        let digits: Vec<DigitComponent> = segments
            .iter()
            .enumerate()
            .map(|(i, Segment { bbox, crop })| {
                sink.save_gray("02_crops", i + 1, crop);
                let (label, confidence) = classify(&model.artifact, &extract_descriptor(crop));
                DigitComponent {
                    label,
                    confidence,
                    bbox: *bbox,
                }
            })
            .collect();

        let prediction: String = digits.iter().map(|d| d.label.as_str()).collect();
        let accuracy = if digits.is_empty() {
            0.0
        } else {
            round2(digits.iter().map(|d| d.confidence).sum::<f64>() / digits.len() as f64)
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        info!(
            prediction = %prediction,
            accuracy,
            digits = digits.len(),
            processing_time_ms,
            "recognition complete"
        );

        Ok(RecognitionResult {
            prediction,
            accuracy,
            processing_time_ms,
            digits,
        })
    }
}
