use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::separable_filter_equal;
use tracing::debug;

/// Contrast statistic below which the image is treated as flat and equalized
pub const LOW_CONTRAST_THRESHOLD: f64 = 40.0;
pub const CLAHE_CLIP_LIMIT: f64 = 2.0;
pub const CLAHE_GRID: u32 = 8;

/// Normalized 3-tap Gaussian (sigma 0.8), applied separably as a 3x3 blur
const BLUR_KERNEL: [f32; 3] = [0.25, 0.5, 0.25];

/// Output of the preprocessing stage
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Blurred, possibly contrast-equalized grayscale image
    pub image: GrayImage,
    /// Standard deviation of the first blurred image; measured once per request
    pub contrast: f64,
}

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Apply a light 3x3 Gaussian blur to suppress sensor noise
pub fn apply_blur(img: &GrayImage) -> GrayImage {
    if img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    separable_filter_equal(img, &BLUR_KERNEL)
}

/// Mean intensity of a grayscale image (0.0 for an empty image)
pub fn mean_intensity(img: &GrayImage) -> f64 {
    let n = img.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    img.as_raw().iter().map(|&p| p as f64).sum::<f64>() / n as f64
}

/// Population standard deviation of pixel intensities
pub fn contrast_statistic(img: &GrayImage) -> f64 {
    let n = img.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    let mean = mean_intensity(img);
    let variance = img
        .as_raw()
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    variance.sqrt()
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is divided into a `grid` x `grid` set of tiles. Each tile gets its
/// own clipped-histogram lookup table, and every pixel is mapped by bilinear
/// interpolation between the four nearest tile tables.
pub fn apply_clahe(img: &GrayImage, clip_limit: f64, grid: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let tile_w = width.div_ceil(grid.clamp(1, width));
    let tile_h = height.div_ceil(grid.clamp(1, height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(img, x0, y0, x1, y1, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    let mut out = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let (tx1, tx2, ax) = interpolation_span(x, tile_w, tiles_x);
        let (ty1, ty2, ay) = interpolation_span(y, tile_h, tiles_y);
        let v = pixel[0] as usize;

        let top = lut_at(tx1, ty1)[v] as f64 * (1.0 - ax) + lut_at(tx2, ty1)[v] as f64 * ax;
        let bottom = lut_at(tx1, ty2)[v] as f64 * (1.0 - ax) + lut_at(tx2, ty2)[v] as f64 * ax;
        let value = top * (1.0 - ay) + bottom * ay;

        out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }

    out
}

/// Neighbouring tile indices and the weight of the second one for a coordinate
fn interpolation_span(pos: u32, tile: u32, tiles: u32) -> (u32, u32, f64) {
    let f = pos as f64 / tile as f64 - 0.5;
    let lower = f.floor();
    let weight = f - lower;
    let last = tiles as i64 - 1;
    let first = (lower as i64).clamp(0, last) as u32;
    let second = (lower as i64 + 1).clamp(0, last) as u32;
    (first, second, weight)
}

fn tile_lut(img: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f64) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = (x1 - x0) * (y1 - y0);

    let limit = ((clip_limit * area as f64 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    // Redistribute the clipped mass evenly, spreading the remainder
    let batch = excess / 256;
    let residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in hist.iter_mut().step_by(step).take(residual as usize) {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f64;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (value, count) in hist.iter().enumerate() {
        cdf += count;
        lut[value] = (cdf as f64 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Run the full preprocessing stage on a decoded image.
///
/// Flat images (contrast below [`LOW_CONTRAST_THRESHOLD`]) are equalized with
/// CLAHE and blurred again; everything else passes through the first blur.
pub fn preprocess(img: &DynamicImage) -> Preprocessed {
    let gray = to_grayscale(img);
    let blurred = apply_blur(&gray);
    let contrast = contrast_statistic(&blurred);

    let image = if contrast < LOW_CONTRAST_THRESHOLD {
        debug!(contrast, "low contrast image, applying CLAHE");
        let enhanced = apply_clahe(&blurred, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        apply_blur(&enhanced)
    } else {
        debug!(contrast, "contrast sufficient, using blurred image");
        blurred
    };

    Preprocessed { image, contrast }
}
