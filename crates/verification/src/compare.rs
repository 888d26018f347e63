//! Image comparison utilities for verification
//!
//! GPU output is compared against the CPU reference engine with a per-channel
//! tolerance: texture filtering hardware uses fixed-point weights, and the work
//! buffers may be stored at half precision.

/// Result of comparing two images
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareResult {
    /// Every channel of every pixel is within tolerance
    Match {
        /// Largest absolute difference seen, per channel
        max_error: [f32; 4],
    },
    /// Images have different dimensions
    DimensionMismatch {
        reference_dimensions: (u32, u32),
        actual_dimensions: (u32, u32),
    },
    /// Images have matching dimensions but some pixels differ beyond tolerance
    PixelMismatch {
        /// Largest absolute difference seen, per channel
        max_error: [f32; 4],
        /// Number of pixels with at least one channel out of tolerance
        mismatched_pixels: usize,
        /// First mismatching pixel in row-major order
        first_mismatch: (u32, u32),
    },
}

impl CompareResult {
    pub fn is_match(&self) -> bool {
        matches!(self, CompareResult::Match { .. })
    }
}

/// Compares two RGBA32F images channel by channel
///
/// # Arguments
/// * `reference` - Expected image, usually from the CPU reference engine
/// * `actual` - Image under test
/// * `tolerance` - Largest accepted absolute difference per channel
pub fn compare_images(reference: &image::Rgba32FImage, actual: &image::Rgba32FImage, tolerance: f32) -> CompareResult {
    if reference.dimensions() != actual.dimensions() {
        return CompareResult::DimensionMismatch {
            reference_dimensions: reference.dimensions(),
            actual_dimensions: actual.dimensions(),
        };
    }

    let mut max_error = [0.0f32; 4];
    let mut mismatched_pixels = 0;
    let mut first_mismatch = None;

    for ((x, y, expected), found) in reference.enumerate_pixels().zip(actual.pixels()) {
        let mut mismatched = false;
        for i in 0..4 {
            let error = (expected[i] - found[i]).abs();
            // NaN never compares within tolerance
            if !(error <= tolerance) {
                mismatched = true;
            }
            if error > max_error[i] || error.is_nan() {
                max_error[i] = error;
            }
        }
        if mismatched {
            mismatched_pixels += 1;
            first_mismatch.get_or_insert((x, y));
        }
    }

    match first_mismatch {
        None => CompareResult::Match { max_error },
        Some(first_mismatch) => CompareResult::PixelMismatch {
            max_error,
            mismatched_pixels,
            first_mismatch,
        },
    }
}
