//! Integration tests for the HOG descriptor.

mod common;

use image::{GrayImage, Luma};
use multidigit::detection::normalize::resize_area;

use common::*;

#[test]
fn test_descriptor_has_fixed_length() {
    assert_eq!(DESCRIPTOR_LEN, 1296);

    let canonical = GrayImage::from_fn(28, 28, |x, y| Luma([((x * 9 + y * 3) % 256) as u8]));
    assert_eq!(extract_descriptor(&canonical).len(), DESCRIPTOR_LEN);

    // Non-canonical crops are resized first
    let odd = GrayImage::from_fn(13, 41, |x, _| Luma([if x > 6 { 255 } else { 0 }]));
    assert_eq!(extract_descriptor(&odd).len(), DESCRIPTOR_LEN);
}

#[test]
fn test_descriptor_is_deterministic() -> anyhow::Result<()> {
    // 1. Same crop twice, from two independent decodes
    let bytes = png_bytes(&render_digits("8"))?;
    let first = segment_descriptors(&bytes)?;
    let second = segment_descriptors(&bytes)?;

    // 2. Bitwise identical vectors
    assert_eq!(first.len(), 1);
    let same_bits = first[0]
        .iter()
        .zip(&second[0])
        .all(|(a, b)| a.to_bits() == b.to_bits());
    assert!(same_bits);
    Ok(())
}

#[test]
fn test_flat_crop_has_zero_descriptor() {
    let flat = GrayImage::from_pixel(28, 28, Luma([200]));
    assert!(extract_descriptor(&flat).as_slice().iter().all(|&v| v == 0.0));
}

#[test]
fn test_descriptor_blocks_are_normalized() {
    // 1. Vertical edge through the middle
    let edge = GrayImage::from_fn(28, 28, |x, _| Luma([if x >= 14 { 255 } else { 0 }]));
    let descriptor = extract_descriptor(&edge);

    // 2. Every value is in [0, 1] and each non-empty block has unit length
    assert!(descriptor.as_slice().iter().all(|&v| (0.0..=1.0).contains(&v)));
    for block in descriptor.as_slice().chunks(36) {
        let norm = block.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(norm < 1e-9 || (norm - 1.0).abs() < 1e-3, "block norm {}", norm);
    }

    // 3. Different digits give different descriptors
    let other = GrayImage::from_fn(28, 28, |_, y| Luma([if y >= 14 { 255 } else { 0 }]));
    assert_ne!(extract_descriptor(&other), descriptor);
}

#[test]
fn test_area_resize_averages() {
    // 2x2 checkerboard blocks average to mid gray
    let src = GrayImage::from_fn(4, 4, |x, y| Luma([if (x + y) % 2 == 0 { 0 } else { 200 }]));
    let out = resize_area(&src, 2, 2);
    assert_eq!(out.dimensions(), (2, 2));
    assert!(out.pixels().all(|p| p[0] == 100));
}
