//! Column projection profiles and the segmentation tiers built on them.
//!
//! A projection profile is the per-column ink sum of a binary image. The tiers
//! here locate digits from that profile when contour detection is unreliable:
//!
//! - [`projection_fallback`]: smoothed global profile, thresholded at a fraction
//!   of its peak, with count-driven splitting and uniform slicing behind it
//! - [`projection_split_region`]: split one merged contour box on its own profile
//! - [`split_big_regions`]: widen coverage by dividing the widest column ranges

use image::GrayImage;
use tracing::debug;

use crate::detection::contours::otsu_binarize_inv;
use crate::detection::normalize::segment_from;
use crate::models::{BoundingBox, Segment};

pub const PROFILE_KERNEL_LEN: usize = 21;
pub const PROFILE_KERNEL_SIGMA: f64 = 4.0;
/// Fraction of the smoothed peak a column must exceed to count as ink
pub const PROFILE_PEAK_RATIO: f64 = 0.12;
/// Fraction of a region's own peak used when splitting a merged region
pub const REGION_SPLIT_RATIO: f64 = 0.25;
/// Ranges narrower than this are never divided further
pub const MIN_SPLIT_WIDTH: u32 = 5;
/// Ranges narrower than this are too thin to hold a digit
pub const MIN_RANGE_WIDTH: u32 = 2;

/// Half-open column interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRange {
    pub start: u32,
    pub end: u32,
}

impl ColumnRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// Normalized 1-D Gaussian kernel. Even lengths are bumped to the next odd one.
pub fn gaussian_kernel1d(length: usize, sigma: f64) -> Vec<f64> {
    let length = if length % 2 == 0 { length + 1 } else { length };
    let half = (length / 2) as i64;
    let kernel: Vec<f64> = (-half..=half)
        .map(|x| (-((x * x) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.into_iter().map(|k| k / sum).collect()
}

/// Per-column sum of foreground intensity
pub fn column_profile(binary: &GrayImage) -> Vec<f64> {
    let mut profile = vec![0.0; binary.width() as usize];
    for (x, _, pixel) in binary.enumerate_pixels() {
        profile[x as usize] += pixel[0] as f64;
    }
    profile
}

/// Centered convolution with zero padding; output has the profile's length
pub fn smooth_profile(profile: &[f64], kernel: &[f64]) -> Vec<f64> {
    let half = (kernel.len() / 2) as i64;
    let n = profile.len() as i64;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = i + half - k as i64;
                    (0..n).contains(&j).then(|| profile[j as usize] * w)
                })
                .sum()
        })
        .collect()
}

/// Maximal runs of `true` in the mask, as column ranges
pub fn contiguous_runs(mask: &[bool]) -> Vec<ColumnRange> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &on) in mask.iter().enumerate() {
        match (on, start) {
            (true, None) => start = Some(i as u32),
            (false, Some(s)) => {
                runs.push(ColumnRange::new(s, i as u32));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(ColumnRange::new(s, mask.len() as u32));
    }
    runs
}

/// Slice `[0, width)` into `count` equal ranges; the last absorbs the remainder.
///
/// Never returns more ranges than `width`, since each needs a column.
pub fn uniform_slices(width: u32, count: usize) -> Vec<ColumnRange> {
    // Past one slice per column every further slice would be empty
    let count = u32::try_from(count).unwrap_or(u32::MAX).min(width);
    if count == 0 {
        return Vec::new();
    }
    let step = width / count;
    (0..count)
        .map(|idx| {
            let start = idx * step;
            let end = if idx == count - 1 {
                width
            } else {
                (idx + 1) * step
            };
            ColumnRange::new(start, end)
        })
        .collect()
}

/// Divide the widest ranges until `expected` ranges exist.
///
/// Ranges are visited widest first. A range at least `min_width` wide is cut
/// into at most `deficit + 1` near-equal pieces (fewer if the pieces would drop
/// below `min_width`), and each extra piece consumes one unit of deficit.
/// Returns `None` when the total still falls short of `expected`.
pub fn split_big_regions(
    regions: &[ColumnRange],
    expected: usize,
    min_width: u32,
) -> Option<Vec<ColumnRange>> {
    if regions.is_empty() {
        return None;
    }

    let mut by_width = regions.to_vec();
    by_width.sort_by(|a, b| b.width().cmp(&a.width()));

    let mut deficit = expected.saturating_sub(by_width.len());
    if deficit == 0 {
        by_width.sort_by_key(|r| r.start);
        return Some(by_width);
    }

    let mut output = Vec::new();
    for range in by_width {
        let span = range.width();
        if span < min_width || deficit == 0 {
            output.push(range);
            continue;
        }

        let deficit_pieces = u32::try_from(deficit).unwrap_or(u32::MAX).saturating_add(1);
        let pieces = deficit_pieces.min((span / min_width.max(1)).max(1));
        let piece_width = (span / pieces).max(1);
        let mut cursor = range.start;
        for idx in 0..pieces {
            let end = if idx == pieces - 1 {
                range.end
            } else {
                cursor + piece_width
            };
            if end - cursor >= MIN_RANGE_WIDTH {
                output.push(ColumnRange::new(cursor, end));
            }
            cursor = end;
        }
        deficit = deficit.saturating_sub(pieces as usize - 1);
    }

    if output.len() < expected {
        return None;
    }
    output.sort_by_key(|r| r.start);
    Some(output)
}

/// Turn full-height column ranges into segments, dropping ranges thinner than `min_width`
fn ranges_to_segments(binary: &GrayImage, ranges: &[ColumnRange], min_width: u32) -> Vec<Segment> {
    let height = binary.height();
    let mut segments: Vec<Segment> = ranges
        .iter()
        .filter(|r| r.width() >= min_width)
        .map(|r| segment_from(binary, BoundingBox::new(r.start, 0, r.width(), height)))
        .collect();
    segments.sort_by_key(|s| s.bbox.x);
    segments
}

/// Locate digits from the smoothed column profile of an Otsu-binarized image.
///
/// With an expected count, a short result is first widened with
/// [`split_big_regions`]; if the count still disagrees the image is sliced
/// into exactly `expected` equal-width columns.
pub fn projection_fallback(working: &GrayImage, expected: Option<usize>) -> Vec<Segment> {
    let binary = otsu_binarize_inv(working);
    let width = binary.width();

    let kernel = gaussian_kernel1d(PROFILE_KERNEL_LEN, PROFILE_KERNEL_SIGMA);
    let smooth = smooth_profile(&column_profile(&binary), &kernel);
    let peak = smooth.iter().copied().fold(0.0, f64::max);
    let threshold = peak * PROFILE_PEAK_RATIO;
    let mask: Vec<bool> = smooth.iter().map(|&v| v > threshold).collect();

    let mut regions = contiguous_runs(&mask);
    debug!(regions = regions.len(), peak, "projection profile regions");

    let Some(n) = expected else {
        return ranges_to_segments(&binary, &regions, MIN_RANGE_WIDTH);
    };

    if regions.len() < n {
        if let Some(split) = split_big_regions(&regions, n, MIN_SPLIT_WIDTH) {
            debug!(before = regions.len(), after = split.len(), "split wide regions");
            regions = split;
        }
    }

    if regions.len() == n {
        return ranges_to_segments(&binary, &regions, MIN_RANGE_WIDTH);
    }

    debug!(found = regions.len(), expected = n, "falling back to uniform slicing");
    // Forced slices are kept even when thin so the expected count is met
    ranges_to_segments(&binary, &uniform_slices(width, n), 1)
}

/// Split one merged region on its own column profile.
///
/// `roi` is the binary crop of the region and `(origin_x, origin_y)` its
/// position in the full image. Columns above a quarter of the crop's peak
/// form the sub-digits; runs narrower than two columns are dropped.
pub fn projection_split_region(roi: &GrayImage, origin_x: u32, origin_y: u32) -> Vec<Segment> {
    let profile = column_profile(roi);
    let peak = profile.iter().copied().fold(0.0, f64::max);
    let mask: Vec<bool> = profile.iter().map(|&v| v > peak * REGION_SPLIT_RATIO).collect();

    contiguous_runs(&mask)
        .into_iter()
        .filter(|r| r.width() >= MIN_RANGE_WIDTH)
        .map(|r| {
            let local = BoundingBox::new(r.start, 0, r.width(), roi.height());
            let mut segment = segment_from(roi, local);
            segment.bbox = BoundingBox::new(origin_x + r.start, origin_y, r.width(), roi.height());
            segment
        })
        .collect()
}
