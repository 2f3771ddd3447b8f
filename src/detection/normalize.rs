use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::models::{BoundingBox, CANONICAL_SIZE, Segment};

/// Downscale by averaging the source area under each destination pixel.
///
/// Upscaling has no area to average over and uses bilinear interpolation.
pub fn resize_area(src: &GrayImage, new_w: u32, new_h: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    if (w, h) == (new_w, new_h) {
        return src.clone();
    }
    if new_w > w || new_h > h {
        return imageops::resize(src, new_w, new_h, FilterType::Triangle);
    }

    let sx = w as f64 / new_w as f64;
    let sy = h as f64 / new_h as f64;
    let mut out = GrayImage::new(new_w, new_h);

    for dy in 0..new_h {
        let y0 = dy as f64 * sy;
        let y1 = y0 + sy;
        for dx in 0..new_w {
            let x0 = dx as f64 * sx;
            let x1 = x0 + sx;

            let mut sum = 0.0;
            let mut weight = 0.0;
            for y in (y0.floor() as u32)..(y1.ceil() as u32).min(h) {
                let wy = y1.min(y as f64 + 1.0) - y0.max(y as f64);
                if wy <= 0.0 {
                    continue;
                }
                for x in (x0.floor() as u32)..(x1.ceil() as u32).min(w) {
                    let wx = x1.min(x as f64 + 1.0) - x0.max(x as f64);
                    if wx <= 0.0 {
                        continue;
                    }
                    sum += src.get_pixel(x, y)[0] as f64 * wx * wy;
                    weight += wx * wy;
                }
            }

            let value = if weight > 0.0 { sum / weight } else { 0.0 };
            out.put_pixel(dx, dy, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Fit a crop into a zero-filled `size` x `size` square, preserving aspect
/// ratio and centering it. Empty crops give an all-background square.
pub fn resize_and_center(crop: &GrayImage, size: u32) -> GrayImage {
    let mut canvas = GrayImage::new(size, size);
    let (w, h) = crop.dimensions();
    if w == 0 || h == 0 {
        return canvas;
    }

    let scale = size as f64 / w.max(h) as f64;
    let new_w = ((w as f64 * scale) as u32).clamp(1, size);
    let new_h = ((h as f64 * scale) as u32).clamp(1, size);
    let resized = resize_area(crop, new_w, new_h);

    let offset_x = (size - new_w) / 2;
    let offset_y = (size - new_h) / 2;
    imageops::overlay(&mut canvas, &resized, offset_x.into(), offset_y.into());
    canvas
}

/// Cut `bbox` out of a binary image and normalize it to the canonical square
pub fn segment_from(binary: &GrayImage, bbox: BoundingBox) -> Segment {
    let roi = imageops::crop_imm(binary, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    Segment {
        bbox,
        crop: resize_and_center(&roi, CANONICAL_SIZE),
    }
}
