//! Disc sampling kernel of the bokeh pass

use crate::presets::BokehQuality;

/// Samples added by each ring, multiplied by the ring index
const SAMPLES_PER_RING_STEP: u32 = 7;

/// Number of samples of the largest kernel, sizes the GPU kernel buffer
pub const MAX_KERNEL_SAMPLES: usize = kernel_len(4);

const fn kernel_len(rings: u32) -> usize {
    // 1 + 7 * (1 + 2 + ... + rings)
    1 + (SAMPLES_PER_RING_STEP * rings * (rings + 1) / 2) as usize
}

/// Sample offsets of the bokeh disc, in units of the disc radius
///
/// Ring `k` of `R` sits at radius `k / R` and holds `7k` evenly spaced samples, so
/// sample density is uniform over the disc and all samples share one weight.
#[derive(Debug, Clone, PartialEq)]
pub struct BokehKernel {
    quality: BokehQuality,
    samples: Vec<[f32; 2]>,
}

impl BokehKernel {
    pub fn new(quality: BokehQuality) -> Self {
        let rings = quality.ring_count();
        let mut samples = Vec::with_capacity(kernel_len(rings));
        samples.push([0.0, 0.0]);

        for ring in 1..=rings {
            let radius = ring as f32 / rings as f32;
            let count = ring * SAMPLES_PER_RING_STEP;
            for i in 0..count {
                let angle = std::f32::consts::TAU * i as f32 / count as f32;
                samples.push([angle.cos() * radius, angle.sin() * radius]);
            }
        }

        Self { quality, samples }
    }

    pub fn quality(&self) -> BokehQuality {
        self.quality
    }

    pub fn samples(&self) -> &[[f32; 2]] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_counts() {
        assert_eq!(BokehKernel::new(BokehQuality::Small).len(), 22);
        assert_eq!(BokehKernel::new(BokehQuality::Medium).len(), 43);
        assert_eq!(BokehKernel::new(BokehQuality::Large).len(), 71);
        assert_eq!(MAX_KERNEL_SAMPLES, 71);
    }

    #[test]
    fn test_kernels_fit_gpu_buffer() {
        for quality in BokehQuality::ALL {
            assert!(BokehKernel::new(quality).len() <= MAX_KERNEL_SAMPLES);
        }
    }

    #[test]
    fn test_samples_inside_unit_disc() {
        let kernel = BokehKernel::new(BokehQuality::Large);
        assert_eq!(kernel.samples()[0], [0.0, 0.0]);
        for &[x, y] in kernel.samples() {
            assert!((x * x + y * y).sqrt() <= 1.0 + 1e-6);
        }
        // The outer ring reaches the disc edge
        let max_radius = kernel.samples().iter().map(|&[x, y]| (x * x + y * y).sqrt()).fold(0.0f32, f32::max);
        assert!((max_radius - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_kernel_is_centered() {
        for quality in BokehQuality::ALL {
            let kernel = BokehKernel::new(quality);
            let (sx, sy) = kernel.samples().iter().fold((0.0f32, 0.0f32), |(ax, ay), &[x, y]| (ax + x, ay + y));
            assert!(sx.abs() < 1e-4 && sy.abs() < 1e-4, "{} kernel is biased: ({sx}, {sy})", quality.name());
        }
    }
}
