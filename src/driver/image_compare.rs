//! Screenshot similarity by pixel difference
//!
//! The captured frame is resized to the reference's dimensions, then every
//! pixel whose channels differ by more than the tolerance counts as a
//! mismatch. Similarity is `1 - mismatched / total`.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};

use crate::error::Result;

/// Default allowed mismatch ratio (require >= 90% similarity)
pub const DEFAULT_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct CompareOptions {
    /// Largest per-channel difference still considered equal
    pub channel_tolerance: u8,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            channel_tolerance: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    /// 0.0 (every pixel differs) to 1.0 (identical)
    pub ratio: f64,
    pub mismatched: u64,
    pub total: u64,
}

impl Similarity {
    /// Passes when similarity is at least `1 - threshold`
    pub fn passes(&self, threshold: f64) -> bool {
        self.ratio >= required_similarity(threshold)
    }
}

pub fn required_similarity(threshold: f64) -> f64 {
    1.0 - threshold.clamp(0.0, 1.0)
}

/// Compare two decoded images
pub fn compare_images(
    reference: &DynamicImage,
    actual: &DynamicImage,
    options: &CompareOptions,
) -> Similarity {
    let (width, height) = reference.dimensions();
    let reference = reference.to_rgba8();
    let actual: RgbaImage = if actual.dimensions() == (width, height) {
        actual.to_rgba8()
    } else {
        image::imageops::resize(&actual.to_rgba8(), width, height, FilterType::Nearest)
    };

    let total = width as u64 * height as u64;
    if total == 0 {
        return Similarity {
            ratio: 1.0,
            mismatched: 0,
            total,
        };
    }

    let mismatched = reference
        .pixels()
        .zip(actual.pixels())
        .filter(|(a, b)| {
            a.0.iter()
                .zip(b.0.iter())
                .any(|(x, y)| x.abs_diff(*y) > options.channel_tolerance)
        })
        .count() as u64;

    Similarity {
        ratio: 1.0 - mismatched as f64 / total as f64,
        mismatched,
        total,
    }
}

/// Compare two encoded images (PNG, JPEG, ...)
pub fn compare_bytes(reference: &[u8], actual: &[u8], options: &CompareOptions) -> Result<Similarity> {
    let reference = image::load_from_memory(reference)?;
    let actual = image::load_from_memory(actual)?;
    Ok(compare_images(&reference, &actual, options))
}
