use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use multidigit::detection::{DESCRIPTOR_LEN, extract_descriptor, preprocess, segment_digits};
use serde_json::{Value, json};

pub const DIGIT_WIDTH: u32 = 24;
pub const DIGIT_HEIGHT: u32 = 40;
pub const STROKE: u32 = 6;
pub const DIGIT_GAP: u32 = 26;
pub const MARGIN: u32 = 20;

pub const PAPER: Luma<u8> = Luma([255]);
pub const INK: Luma<u8> = Luma([0]);

/// Seven-segment strokes (a..g) lit for each digit
fn lit_segments(digit: char) -> &'static str {
    match digit {
        '0' => "abcdef",
        '1' => "bc",
        '2' => "abged",
        '3' => "abgcd",
        '4' => "fgbc",
        '5' => "afgcd",
        '6' => "afgedc",
        '7' => "abc",
        '8' => "abcdefg",
        '9' => "abcdfg",
        _ => "",
    }
}

fn segment_rect(segment: char, x0: i32, y0: i32) -> Option<Rect> {
    let (w, h, t) = (DIGIT_WIDTH, DIGIT_HEIGHT, STROKE);
    let mid = (h - t) / 2;
    let half = h / 2 + t / 2;
    let (x, y, rw, rh) = match segment {
        'a' => (0, 0, w, t),
        'b' => (w - t, 0, t, half),
        'c' => (w - t, mid, t, half),
        'd' => (0, h - t, w, t),
        'e' => (0, mid, t, half),
        'f' => (0, 0, t, half),
        'g' => (0, mid, w, t),
        _ => return None,
    };
    Some(Rect::at(x0 + x as i32, y0 + y as i32).of_size(rw, rh))
}

/// Draw one seven-segment digit with its top-left corner at `(x0, y0)`
pub fn draw_digit(img: &mut GrayImage, digit: char, x0: u32, y0: u32, color: Luma<u8>) {
    for segment in lit_segments(digit).chars() {
        if let Some(rect) = segment_rect(segment, x0 as i32, y0 as i32) {
            draw_filled_rect_mut(img, rect, color);
        }
    }
}

/// Render `text` as well-separated dark digits on white paper
pub fn render_digits(text: &str) -> GrayImage {
    render_digits_with(text, DIGIT_GAP, PAPER, INK)
}

pub fn render_digits_with(text: &str, gap: u32, paper: Luma<u8>, ink: Luma<u8>) -> GrayImage {
    let n = text.chars().count() as u32;
    let width = 2 * MARGIN + n * DIGIT_WIDTH + n.saturating_sub(1) * gap;
    let height = 2 * MARGIN + DIGIT_HEIGHT;
    let mut img = GrayImage::from_pixel(width, height, paper);
    for (i, digit) in text.chars().enumerate() {
        let x0 = MARGIN + i as u32 * (DIGIT_WIDTH + gap);
        draw_digit(&mut img, digit, x0, MARGIN, ink);
    }
    img
}

/// A uniform image with no ink at all
pub fn blank_image(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, PAPER)
}

/// Encode a grayscale image as PNG bytes
pub fn png_bytes(img: &GrayImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img.clone()).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Descriptors of the digits `segment_digits` finds in the encoded image
pub fn segment_descriptors(bytes: &[u8]) -> anyhow::Result<Vec<Vec<f64>>> {
    let decoded = image::load_from_memory(bytes)?;
    let pre = preprocess(&decoded);
    Ok(segment_digits(&pre.image, pre.contrast, None)
        .iter()
        .map(|s| extract_descriptor(&s.crop).0)
        .collect())
}

/// Linear SVM artifact whose weight rows are the unit-length descriptors of
/// the digits in `bytes`, labelled left to right by `labels`.
///
/// Each digit in that image scores highest against its own row.
pub fn template_artifact(bytes: &[u8], labels: &str) -> anyhow::Result<Value> {
    let descriptors = segment_descriptors(bytes)?;
    anyhow::ensure!(
        descriptors.len() == labels.chars().count(),
        "found {} digits for labels {:?}",
        descriptors.len(),
        labels
    );

    let coef: Vec<Vec<f64>> = descriptors
        .into_iter()
        .map(|d| {
            let norm = d.iter().map(|v| v * v).sum::<f64>().sqrt().max(1e-12);
            d.into_iter().map(|v| v / norm).collect()
        })
        .collect();
    let classes: Vec<String> = labels.chars().map(String::from).collect();
    let intercept = vec![0.0; classes.len()];

    Ok(json!({
        "model": { "kind": "linear_svm", "classes": classes, "coef": coef, "intercept": intercept },
        "scaler": identity_scaler(),
    }))
}

/// Zero mean, unit scale
pub fn identity_scaler() -> Value {
    json!({ "mean": vec![0.0; DESCRIPTOR_LEN], "scale": vec![1.0; DESCRIPTOR_LEN] })
}

/// A linear artifact (`linear_svm` or `softmax`) with all-zero weights, so
/// every prediction is decided by the intercepts alone
pub fn constant_linear_artifact(kind: &str, classes: &[&str], intercept: &[f64]) -> Value {
    let coef = vec![vec![0.0; DESCRIPTOR_LEN]; classes.len()];
    json!({
        "model": { "kind": kind, "classes": classes, "coef": coef, "intercept": intercept },
        "scaler": identity_scaler(),
    })
}

/// Nearest-centroid artifact; the first class sits at the origin
pub fn centroid_artifact(classes: &[&str]) -> Value {
    let centroids: Vec<Vec<f64>> = (0..classes.len())
        .map(|i| vec![i as f64 * 10.0; DESCRIPTOR_LEN])
        .collect();
    json!({
        "model": { "kind": "nearest_centroid", "classes": classes, "centroids": centroids },
        "scaler": identity_scaler(),
    })
}

pub fn write_artifact(dir: &Path, artifact: &Value) -> anyhow::Result<PathBuf> {
    let path = dir.join("digit_model.json");
    std::fs::write(&path, serde_json::to_vec(artifact)?)?;
    Ok(path)
}

/// Temp dir holding a "42" template artifact, plus the encoded "42" image
pub fn forty_two_setup() -> anyhow::Result<(tempfile::TempDir, PathBuf, Vec<u8>)> {
    let dir = tempfile::TempDir::new()?;
    let bytes = png_bytes(&render_digits("42"))?;
    let path = write_artifact(dir.path(), &template_artifact(&bytes, "42")?)?;
    Ok((dir, path, bytes))
}
