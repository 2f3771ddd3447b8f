use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::filter::separable_filter_equal;
use imageproc::morphology::{Mask, grayscale_erode, grayscale_open};
use tracing::debug;

use crate::detection::preprocessing::apply_blur;
use crate::detection::projection::gaussian_kernel1d;
use crate::models::BoundingBox;

/// Contrast statistic above which a single global threshold is trusted
pub const GLOBAL_THRESHOLD_CONTRAST: f64 = 50.0;
pub const ADAPTIVE_BLOCK_SIZE: usize = 15;
pub const ADAPTIVE_OFFSET: i16 = 5;
/// Minimum bounding-box area (px²) for a contour to count as a digit candidate
pub const MIN_CANDIDATE_AREA: u64 = 60;

const INK: Luma<u8> = Luma([255]);

/// Global Otsu threshold, inverted so dark ink becomes foreground (255).
///
/// A single-valued image has no bimodal split and yields an empty mask.
pub fn otsu_binarize_inv(img: &GrayImage) -> GrayImage {
    let raw = img.as_raw();
    let is_flat = raw.first().is_none_or(|&first| raw.iter().all(|&p| p == first));
    if is_flat {
        return GrayImage::new(img.width(), img.height());
    }
    let level = otsu_level(img);
    threshold(img, level, ThresholdType::BinaryInverted)
}

/// Gaussian-weighted local threshold, inverted: a pixel is ink when it is at
/// least `offset` darker than its neighbourhood
pub fn adaptive_binarize_inv(img: &GrayImage, block_size: usize, offset: i16) -> GrayImage {
    if img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    // Same sigma a Gaussian of this size gets when none is specified
    let sigma = 0.3 * ((block_size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let kernel: Vec<f32> = gaussian_kernel1d(block_size, sigma)
        .into_iter()
        .map(|k| k as f32)
        .collect();
    let local_mean = separable_filter_equal(img, &kernel);

    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let mean = local_mean.get_pixel(x, y)[0] as i16;
        if pixel[0] as i16 - mean <= -offset {
            out.put_pixel(x, y, INK);
        }
    }
    out
}

/// 2x2 square structuring element centred on its bottom-right cell
pub fn square_2x2() -> Mask {
    Mask::from_image(&GrayImage::from_pixel(2, 2, INK), 1, 1)
}

/// Remove speckle from an adaptive threshold: an opening, then one more erosion
pub fn clean_speckle(binary: &GrayImage) -> GrayImage {
    let mask = square_2x2();
    grayscale_erode(&grayscale_open(binary, &mask), &mask)
}

/// Binarize the polarity-normalized image, choosing the branch by contrast.
///
/// High-contrast images take a global Otsu threshold. Everything else takes a
/// local Gaussian threshold, which is noisier, so it is cleaned with an opening
/// and one extra erosion.
pub fn binarize(working: &GrayImage, contrast: f64) -> GrayImage {
    if contrast > GLOBAL_THRESHOLD_CONTRAST {
        debug!(contrast, "binarizing with global Otsu threshold");
        return otsu_binarize_inv(working);
    }

    debug!(contrast, "binarizing with adaptive Gaussian threshold");
    let blurred = apply_blur(working);
    clean_speckle(&adaptive_binarize_inv(&blurred, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET))
}

/// Bounding boxes of outermost foreground contours, left to right.
///
/// Boxes smaller than `min_area` are discarded as noise.
pub fn find_candidates(binary: &GrayImage, min_area: u64) -> Vec<BoundingBox> {
    let mut boxes: Vec<BoundingBox> = find_contours::<u32>(binary)
        .into_iter()
        .filter(|c| c.parent.is_none() && !c.points.is_empty())
        .map(|c| {
            let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
            let (mut max_x, mut max_y) = (0, 0);
            for p in &c.points {
                min_x = min_x.min(p.x);
                min_y = min_y.min(p.y);
                max_x = max_x.max(p.x);
                max_y = max_y.max(p.y);
            }
            BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
        })
        .filter(|b| b.area() >= min_area)
        .collect();

    boxes.sort_by_key(|b| b.x);
    boxes
}
