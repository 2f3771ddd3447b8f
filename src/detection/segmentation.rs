use image::GrayImage;
use image::imageops::{self, invert};
use tracing::debug;

use crate::detection::contours::{MIN_CANDIDATE_AREA, binarize, find_candidates};
use crate::detection::normalize::resize_and_center;
use crate::detection::preprocessing::mean_intensity;
use crate::detection::projection::{column_profile, projection_fallback, projection_split_region};
use crate::models::{BoundingBox, CANONICAL_SIZE, Segment};

/// Mean intensity under which an image is treated as light-on-dark
pub const DARK_BACKGROUND_MEAN: f64 = 127.0;

/// Make digits dark on a light background
pub fn normalize_polarity(gray: &GrayImage) -> GrayImage {
    let mut working = gray.clone();
    if mean_intensity(gray) < DARK_BACKGROUND_MEAN {
        debug!("predominantly dark image, inverting polarity");
        invert(&mut working);
    }
    working
}

/// True when every column of the crop holds ink, i.e. there is no gap that
/// could separate two touching digits
pub fn lacks_column_gap(roi: &GrayImage) -> bool {
    let profile = column_profile(roi);
    !profile.is_empty() && profile.iter().all(|&v| v > 0.0)
}

/// Contour tier: one segment per candidate box, splitting gapless boxes while
/// an expected count is still unmet.
///
/// Returns `None` when the candidates cannot be trusted: none were found, or
/// the count before or after repair disagrees with `expected`.
pub fn contour_segments(
    binary: &GrayImage,
    candidates: &[BoundingBox],
    expected: Option<usize>,
) -> Option<Vec<Segment>> {
    if candidates.is_empty() {
        debug!("no contour candidates");
        return None;
    }
    if let Some(n) = expected {
        if candidates.len() != n {
            debug!(found = candidates.len(), expected = n, "contour count disagrees");
            return None;
        }
    }

    let below_expected = expected.is_some_and(|n| candidates.len() < n);
    let mut segments = Vec::with_capacity(candidates.len());
    for &bbox in candidates {
        let roi = imageops::crop_imm(binary, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
        if below_expected && lacks_column_gap(&roi) {
            debug!(x = bbox.x, width = bbox.width, "splitting merged region");
            segments.extend(projection_split_region(&roi, bbox.x, bbox.y));
        } else {
            segments.push(Segment {
                bbox,
                crop: resize_and_center(&roi, CANONICAL_SIZE),
            });
        }
    }

    if let Some(n) = expected {
        if segments.len() != n {
            debug!(found = segments.len(), expected = n, "repaired count disagrees");
            return None;
        }
    }

    segments.sort_by_key(|s| s.bbox.x);
    Some(segments)
}

/// Locate digits in a preprocessed grayscale image, left to right.
///
/// Tries contour candidates first and falls back to the projection profile of
/// the polarity-normalized image. An empty result means no digits were found.
///
/// An expected count above the image width is capped at the width, the most
/// one-column regions the image can hold.
pub fn segment_digits(gray: &GrayImage, contrast: f64, expected: Option<usize>) -> Vec<Segment> {
    let max_regions = usize::try_from(gray.width()).unwrap_or(usize::MAX).max(1);
    let expected = expected.filter(|&n| n > 0).map(|n| n.min(max_regions));
    let working = normalize_polarity(gray);
    let binary = binarize(&working, contrast);
    let candidates = find_candidates(&binary, MIN_CANDIDATE_AREA);
    debug!(candidates = candidates.len(), ?expected, "contour candidates");

    contour_segments(&binary, &candidates, expected).unwrap_or_else(|| {
        debug!("using projection fallback");
        projection_fallback(&working, expected)
    })
}
