//! Histogram-of-oriented-gradients descriptor for canonical digit crops.
//!
//! Layout follows the common HOG formulation: unsigned orientations binned
//! over `[0, 180)` degrees per cell, cells grouped into overlapping blocks,
//! each block L2-Hys normalized, and all blocks concatenated in row-major
//! block order (then cell row, cell column, orientation).

use image::GrayImage;

use crate::detection::normalize::resize_area;
use crate::models::CANONICAL_SIZE;

pub const ORIENTATIONS: usize = 9;
pub const CELL_SIZE: usize = 4;
pub const BLOCK_CELLS: usize = 2;

const CELLS: usize = CANONICAL_SIZE as usize / CELL_SIZE;
const BLOCKS: usize = CELLS - BLOCK_CELLS + 1;

/// Length of every descriptor produced by [`extract_descriptor`]
pub const DESCRIPTOR_LEN: usize = BLOCKS * BLOCKS * BLOCK_CELLS * BLOCK_CELLS * ORIENTATIONS;

const L2HYS_CLIP: f64 = 0.2;
const NORM_EPS: f64 = 1e-5;

/// Fixed-length feature vector of a canonical crop
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor(pub Vec<f64>);

impl Descriptor {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compute the HOG descriptor of a crop.
///
/// Crops that are not already canonical are area-resized to 28x28 first.
pub fn extract_descriptor(crop: &GrayImage) -> Descriptor {
    let canonical;
    let crop = if crop.dimensions() == (CANONICAL_SIZE, CANONICAL_SIZE) {
        crop
    } else {
        canonical = resize_area(crop, CANONICAL_SIZE, CANONICAL_SIZE);
        &canonical
    };

    let size = CANONICAL_SIZE as usize;
    // Square-root gamma compression
    let pixels: Vec<f64> = crop.as_raw().iter().map(|&p| (p as f64).sqrt()).collect();
    let at = |row: usize, col: usize| pixels[row * size + col];

    // Central differences; border rows/columns have zero gradient along that axis
    let mut magnitude = vec![0.0; size * size];
    let mut orientation = vec![0.0; size * size];
    for row in 0..size {
        for col in 0..size {
            let g_row = if row == 0 || row == size - 1 {
                0.0
            } else {
                at(row + 1, col) - at(row - 1, col)
            };
            let g_col = if col == 0 || col == size - 1 {
                0.0
            } else {
                at(row, col + 1) - at(row, col - 1)
            };
            magnitude[row * size + col] = g_col.hypot(g_row);
            orientation[row * size + col] = g_row.atan2(g_col).to_degrees().rem_euclid(180.0);
        }
    }

    // Per-cell orientation histograms, averaged over the cell area
    let bin_width = 180.0 / ORIENTATIONS as f64;
    let cell_area = (CELL_SIZE * CELL_SIZE) as f64;
    let mut cells = vec![[0.0f64; ORIENTATIONS]; CELLS * CELLS];
    for row in 0..size {
        for col in 0..size {
            let idx = row * size + col;
            let bin = ((orientation[idx] / bin_width) as usize).min(ORIENTATIONS - 1);
            cells[(row / CELL_SIZE) * CELLS + col / CELL_SIZE][bin] += magnitude[idx] / cell_area;
        }
    }

    let mut features = Vec::with_capacity(DESCRIPTOR_LEN);
    let mut block = Vec::with_capacity(BLOCK_CELLS * BLOCK_CELLS * ORIENTATIONS);
    for block_row in 0..BLOCKS {
        for block_col in 0..BLOCKS {
            block.clear();
            for cell_row in block_row..block_row + BLOCK_CELLS {
                for cell_col in block_col..block_col + BLOCK_CELLS {
                    block.extend_from_slice(&cells[cell_row * CELLS + cell_col]);
                }
            }
            normalize_l2_hys(&mut block);
            features.extend_from_slice(&block);
        }
    }

    Descriptor(features)
}

/// L2 normalize, clip at 0.2, renormalize
fn normalize_l2_hys(block: &mut [f64]) {
    let l2 = |b: &[f64]| (b.iter().map(|v| v * v).sum::<f64>() + NORM_EPS * NORM_EPS).sqrt();

    let norm = l2(block);
    for v in block.iter_mut() {
        *v = (*v / norm).min(L2HYS_CLIP);
    }
    let norm = l2(block);
    for v in block.iter_mut() {
        *v /= norm;
    }
}
