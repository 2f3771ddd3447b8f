//! Integration tests for the model artifact and its lazy handle.
//!
//! Tests cover:
//! - Confidence derivation for each classifier kind
//! - Scaler application
//! - Configuration vs integrity failures
//! - Idempotent loading, retry after failure, concurrent first use

mod common;

use std::sync::Arc;

use multidigit::classifier::{DEFAULT_CONFIDENCE, FeatureScaler};
use serde_json::json;

use common::*;

fn zeros() -> Vec<f64> {
    vec![0.0; DESCRIPTOR_LEN]
}

fn parse(value: &serde_json::Value) -> ModelArtifact {
    ModelArtifact::from_json(&value.to_string()).expect("artifact should be valid")
}

#[test]
fn test_margin_confidence_is_logistic_of_winning_score() {
    let artifact = parse(&constant_linear_artifact("linear_svm", &["3", "8"], &[2.0, -1.0]));
    assert!(matches!(artifact.model, Classifier::MarginScored(_)));

    let prediction = artifact.classify(&zeros());
    assert_eq!(prediction.label, "3");
    assert_eq!(prediction.confidence, 88.08);
}

#[test]
fn test_margin_confidence_uses_magnitude_of_max_score() {
    // Winner has the largest (least negative) score; its magnitude drives confidence
    let artifact = parse(&constant_linear_artifact("linear_svm", &["1", "7"], &[-3.0, -0.5]));
    let prediction = artifact.classify(&zeros());
    assert_eq!(prediction.label, "7");
    assert_eq!(prediction.confidence, 62.25);
}

#[test]
fn test_probability_confidence() {
    let artifact = parse(&constant_linear_artifact("softmax", &["4", "9"], &[3f64.ln(), 0.0]));
    assert!(matches!(artifact.model, Classifier::ProbabilityScored(_)));

    let prediction = artifact.classify(&zeros());
    assert_eq!(prediction.label, "4");
    assert_eq!(prediction.confidence, 75.0);
}

#[test]
fn test_unscored_classifier_reports_default_confidence() {
    let artifact = parse(&centroid_artifact(&["0", "5"]));
    assert!(matches!(artifact.model, Classifier::Unscored(_)));

    // Closer to the second centroid at 10.0
    let prediction = artifact.classify(&vec![8.0; DESCRIPTOR_LEN]);
    assert_eq!(prediction.label, "5");
    assert_eq!(prediction.confidence, DEFAULT_CONFIDENCE);
}

#[test]
fn test_scaler_is_applied_before_classifying() {
    // 1. Scaler maps raw 8.0 to 0.0 for every feature
    let mut artifact = centroid_artifact(&["0", "5"]);
    artifact["scaler"] = json!({ "mean": vec![8.0; DESCRIPTOR_LEN], "scale": vec![2.0; DESCRIPTOR_LEN] });

    // 2. Now the origin centroid wins
    let prediction = parse(&artifact).classify(&vec![8.0; DESCRIPTOR_LEN]);
    assert_eq!(prediction.label, "0");
}

#[test]
fn test_zero_scale_is_treated_as_one() {
    let scaler = FeatureScaler {
        mean: vec![1.0, 1.0],
        scale: vec![0.0, 2.0],
    };
    assert_eq!(scaler.transform(&[3.0, 5.0]), vec![2.0, 2.0]);
}

#[test]
fn test_confidence_always_within_percent_range() {
    for intercept in [-50.0, -1.0, 0.0, 0.3, 40.0] {
        let svm = parse(&constant_linear_artifact("linear_svm", &["1", "2"], &[intercept, -100.0]));
        let c = svm.classify(&zeros()).confidence;
        assert!((0.0..=100.0).contains(&c), "svm confidence {}", c);

        let softmax = parse(&constant_linear_artifact("softmax", &["1", "2"], &[intercept, 0.0]));
        let c = softmax.classify(&zeros()).confidence;
        assert!((0.0..=100.0).contains(&c), "softmax confidence {}", c);
    }
}

#[test]
fn test_integrity_failures() {
    let good = constant_linear_artifact("linear_svm", &["1", "2"], &[0.0, 0.0]);

    let mut no_scaler = good.clone();
    if let Some(fields) = no_scaler.as_object_mut() {
        fields.remove("scaler");
    }

    let mut short_scaler = good.clone();
    short_scaler["scaler"]["mean"] = json!([0.0, 0.0]);

    let mut short_row = good.clone();
    short_row["model"]["coef"][1] = json!([1.0]);

    let mut long_label = good.clone();
    long_label["model"]["classes"] = json!(["1", "12"]);

    let mut unknown_kind = good.clone();
    unknown_kind["model"]["kind"] = json!("random_forest");

    let mut missing_intercept = good.clone();
    missing_intercept["model"]["intercept"] = json!([0.0]);

    for (name, value) in [
        ("no scaler", no_scaler),
        ("short scaler", short_scaler),
        ("short weight row", short_row),
        ("multi-character label", long_label),
        ("unknown kind", unknown_kind),
        ("intercept count", missing_intercept),
        ("empty document", json!({})),
    ] {
        assert!(ModelArtifact::from_json(&value.to_string()).is_err(), "{} should be rejected", name);
    }
    assert!(ModelArtifact::from_json("{ not json").is_err());
}

#[test]
fn test_missing_file_is_configuration_error() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let handle = ModelHandle::new(dir.path().join("absent.json"));

    let err = handle.ensure_ready().unwrap_err();
    assert!(matches!(err, RecognitionError::Configuration { .. }));
    assert!(!err.is_user_recoverable());
    assert!(!handle.is_ready());
    Ok(())
}

#[test]
fn test_malformed_file_is_integrity_error() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = write_artifact(dir.path(), &json!({ "model": { "kind": "softmax" } }))?;
    let handle = ModelHandle::new(&path);

    let err = handle.ensure_ready().unwrap_err();
    match &err {
        RecognitionError::Integrity { path: p, .. } => assert_eq!(p, &path),
        other => panic!("expected integrity error, got {:?}", other),
    }
    assert!(!err.is_user_recoverable());
    Ok(())
}

#[test]
fn test_ensure_ready_is_idempotent() -> anyhow::Result<()> {
    // 1. Load once
    let dir = tempfile::TempDir::new()?;
    let path = write_artifact(dir.path(), &centroid_artifact(&["1"]))?;
    let handle = ModelHandle::new(&path);
    handle.ensure_ready()?;
    let loaded_at = handle.loaded_at();
    assert!(handle.is_ready());
    assert!(loaded_at.is_some());

    // 2. Remove the file: a second call must not touch the disk
    std::fs::remove_file(&path)?;
    handle.ensure_ready()?;
    assert_eq!(handle.loaded_at(), loaded_at);

    // 3. Timestamp renders as whole seconds in UTC
    let stamp = handle.last_loaded_at().expect("loaded handle has a timestamp");
    assert_eq!(stamp.len(), "2024-01-01T00:00:00Z".len());
    assert!(stamp.ends_with('Z'));
    Ok(())
}

#[test]
fn test_failed_load_is_retried() -> anyhow::Result<()> {
    // 1. First attempt: nothing on disk
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("digit_model.json");
    let handle = ModelHandle::new(&path);
    assert!(handle.ensure_ready().is_err());

    // 2. Supply the artifact; the next call loads it
    write_artifact(dir.path(), &centroid_artifact(&["1", "2"]))?;
    handle.ensure_ready()?;
    assert!(handle.is_ready());
    Ok(())
}

#[test]
fn test_concurrent_first_use_loads_once() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = write_artifact(dir.path(), &centroid_artifact(&["1", "2"]))?;
    let handle = ModelHandle::new(&path);

    // 1. Many threads race to load
    let models: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8).map(|_| scope.spawn(|| handle.acquire())).collect();
        workers.into_iter().map(|w| w.join().expect("worker panicked")).collect()
    });

    // 2. All observe the same fully loaded artifact
    let models = models.into_iter().collect::<Result<Vec<_>, _>>()?;
    assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(models[0].artifact.model.classes().len(), 2);
    Ok(())
}
