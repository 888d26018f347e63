//! Circle of confusion math
//!
//! Host-side twin of the per-pixel functions in `wgsl/`. The shaders and these
//! functions must agree: the CPU reference engine and the tests rely on them to
//! predict what the GPU writes.
//!
//! Sign convention: a negative CoC is nearer than the focus band, a positive CoC
//! is farther. The magnitude is always in `[0, 1]`.

use crate::{DofError, DofParams};

/// Lower bound of the divisor of the CoC ramp, keeps the function finite when
/// the focus range degenerates
pub const MIN_FOCUS_RAMP: f32 = 1e-4;

/// CoC magnitude below which the combine pass keeps the sharp image untouched
pub const BLEND_START: f32 = 0.1;

/// How the depth image encodes scene depth
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DepthEncoding {
    /// Samples already hold linear eye-space distance
    #[default]
    Linear,
    /// Standard `[0, 1]` perspective depth, 0 at the near plane
    Perspective { near: f32, far: f32 },
    /// Reversed-Z perspective depth, 1 at the near plane
    ReversedPerspective { near: f32, far: f32 },
}

impl DepthEncoding {
    /// Checks that the projection planes can be used to linearize depth
    pub fn validate(&self) -> Result<(), DofError> {
        match *self {
            DepthEncoding::Linear => Ok(()),
            DepthEncoding::Perspective { near, far } | DepthEncoding::ReversedPerspective { near, far } => {
                if near > 0.0 && far > near && far.is_finite() {
                    Ok(())
                } else {
                    Err(DofError::InvalidDepthEncoding { near, far })
                }
            }
        }
    }

    /// Identifier of the linearization mode as seen by the shaders
    pub fn mode(&self) -> u32 {
        match self {
            DepthEncoding::Linear => 0,
            DepthEncoding::Perspective { .. } => 1,
            DepthEncoding::ReversedPerspective { .. } => 2,
        }
    }

    /// Returns the `(near, far)` planes, zero for linear depth
    pub fn planes(&self) -> (f32, f32) {
        match *self {
            DepthEncoding::Linear => (0.0, 0.0),
            DepthEncoding::Perspective { near, far } | DepthEncoding::ReversedPerspective { near, far } => (near, far),
        }
    }

    /// Converts a raw depth sample into linear eye-space distance
    pub fn linearize(&self, raw: f32) -> f32 {
        match *self {
            DepthEncoding::Linear => raw,
            DepthEncoding::Perspective { near, far } => near * far / (far - raw * (far - near)),
            DepthEncoding::ReversedPerspective { near, far } => near * far / (near + raw * (far - near)),
        }
    }
}

/// Signed circle of confusion of a pixel at `distance` from the camera
///
/// Zero inside `focus_distance ± focus_range / 2`, ramping linearly to a magnitude
/// of 1 over one more `focus_range` beyond each band edge.
pub fn circle_of_confusion(distance: f32, params: &DofParams) -> f32 {
    let offset = distance - params.focus_distance();
    let half_band = params.focus_range() * 0.5;
    let ramp = params.focus_range().max(MIN_FOCUS_RAMP);
    let magnitude = ((offset.abs() - half_band) / ramp).clamp(0.0, 1.0);
    if offset < 0.0 { -magnitude } else { magnitude }
}

/// Disc radius, in half-resolution texels, of the bokeh gathered for a CoC value
pub fn bokeh_radius_texels(coc: f32, params: &DofParams) -> f32 {
    coc.abs().min(1.0) * params.bokeh_radius()
}

/// Hermite interpolation matching WGSL `smoothstep`
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Weight of the blurred image in the combine pass, 0 keeps the sharp source
pub fn blend_factor(coc: f32) -> f32 {
    smoothstep(BLEND_START, 1.0, coc.abs())
}

/// Linear blend used by the combine pass, exact at both ends
pub fn blend(sharp: f32, blurred: f32, factor: f32) -> f32 {
    sharp * (1.0 - factor) + blurred * factor
}
