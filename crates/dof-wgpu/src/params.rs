//! Depth of field parameter set
//!
//! The three user-facing controls of the effect and their declared ranges. Values
//! are clamped (or rejected) here, at the configuration boundary, so the rest of
//! the pipeline can assume they are always valid.

use crate::DofError;
use std::ops::RangeInclusive;

/// Valid range of the focus distance, in scene units
pub const FOCUS_DISTANCE_RANGE: RangeInclusive<f32> = 0.1..=100.0;
/// Valid range of the focus range, in scene units
pub const FOCUS_RANGE_RANGE: RangeInclusive<f32> = 0.1..=10.0;
/// Valid range of the bokeh radius, in half-resolution texels
pub const BOKEH_RADIUS_RANGE: RangeInclusive<f32> = 1.0..=10.0;

/// The tunable controls of the depth of field effect
///
/// Fields are private so the range invariant cannot be bypassed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DofParams {
    focus_distance: f32,
    focus_range: f32,
    bokeh_radius: f32,
}

impl Default for DofParams {
    fn default() -> Self {
        Self {
            focus_distance: 10.0,
            focus_range: 3.0,
            bokeh_radius: 4.0,
        }
    }
}

fn clamp_to(name: &'static str, value: f32, range: &RangeInclusive<f32>) -> f32 {
    // NaN is treated as the lower bound
    let clamped = if value.is_nan() { *range.start() } else { value.clamp(*range.start(), *range.end()) };
    if clamped != value {
        tracing::warn!(parameter = name, value, clamped, "depth of field parameter out of range, clamping");
    }
    clamped
}

fn check(name: &'static str, value: f32, range: &RangeInclusive<f32>) -> Result<f32, DofError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(DofError::ParameterOutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

impl DofParams {
    /// Creates a parameter set, clamping every value into its declared range
    ///
    /// # Arguments
    /// * `focus_distance` - Distance of the sharpest plane from the camera
    /// * `focus_range` - Width of the band around the focus distance that stays sharp
    /// * `bokeh_radius` - Maximum blur radius, in half-resolution texels
    pub fn new(focus_distance: f32, focus_range: f32, bokeh_radius: f32) -> Self {
        Self {
            focus_distance: clamp_to("focus_distance", focus_distance, &FOCUS_DISTANCE_RANGE),
            focus_range: clamp_to("focus_range", focus_range, &FOCUS_RANGE_RANGE),
            bokeh_radius: clamp_to("bokeh_radius", bokeh_radius, &BOKEH_RADIUS_RANGE),
        }
    }

    /// Creates a parameter set, rejecting any value outside its declared range
    ///
    /// # Returns
    /// The parameter set, or [`DofError::ParameterOutOfRange`] naming the first offending value
    pub fn try_new(focus_distance: f32, focus_range: f32, bokeh_radius: f32) -> Result<Self, DofError> {
        Ok(Self {
            focus_distance: check("focus_distance", focus_distance, &FOCUS_DISTANCE_RANGE)?,
            focus_range: check("focus_range", focus_range, &FOCUS_RANGE_RANGE)?,
            bokeh_radius: check("bokeh_radius", bokeh_radius, &BOKEH_RADIUS_RANGE)?,
        })
    }

    pub fn focus_distance(&self) -> f32 {
        self.focus_distance
    }

    pub fn focus_range(&self) -> f32 {
        self.focus_range
    }

    pub fn bokeh_radius(&self) -> f32 {
        self.bokeh_radius
    }

    pub fn set_focus_distance(&mut self, focus_distance: f32) {
        self.focus_distance = clamp_to("focus_distance", focus_distance, &FOCUS_DISTANCE_RANGE);
    }

    pub fn set_focus_range(&mut self, focus_range: f32) {
        self.focus_range = clamp_to("focus_range", focus_range, &FOCUS_RANGE_RANGE);
    }

    pub fn set_bokeh_radius(&mut self, bokeh_radius: f32) {
        self.bokeh_radius = clamp_to("bokeh_radius", bokeh_radius, &BOKEH_RADIUS_RANGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let params = DofParams::default();
        assert_eq!(params.focus_distance(), 10.0);
        assert_eq!(params.focus_range(), 3.0);
        assert_eq!(params.bokeh_radius(), 4.0);
    }

    #[test]
    fn test_new_clamps_out_of_range_values() {
        let params = DofParams::new(0.0, 25.0, 0.5);
        assert_eq!(params.focus_distance(), 0.1);
        assert_eq!(params.focus_range(), 10.0);
        assert_eq!(params.bokeh_radius(), 1.0);

        let params = DofParams::new(1000.0, -1.0, f32::NAN);
        assert_eq!(params.focus_distance(), 100.0);
        assert_eq!(params.focus_range(), 0.1);
        assert_eq!(params.bokeh_radius(), 1.0);
    }

    #[test]
    fn test_new_keeps_in_range_values() {
        let params = DofParams::new(42.0, 0.1, 10.0);
        assert_eq!(params.focus_distance(), 42.0);
        assert_eq!(params.focus_range(), 0.1);
        assert_eq!(params.bokeh_radius(), 10.0);
    }

    #[test]
    fn test_try_new_rejects_out_of_range_values() {
        assert!(DofParams::try_new(5.0, 1.0, 2.0).is_ok());

        match DofParams::try_new(5.0, 11.0, 2.0) {
            Err(DofError::ParameterOutOfRange { name, value, min, max }) => {
                assert_eq!(name, "focus_range");
                assert_eq!(value, 11.0);
                assert_eq!(min, 0.1);
                assert_eq!(max, 10.0);
            }
            other => panic!("expected ParameterOutOfRange, got {other:?}"),
        }

        assert!(matches!(
            DofParams::try_new(f32::NAN, 1.0, 2.0),
            Err(DofError::ParameterOutOfRange { name: "focus_distance", .. })
        ));
    }

    #[test]
    fn test_setters_clamp() {
        let mut params = DofParams::default();
        params.set_focus_distance(150.0);
        params.set_focus_range(0.0);
        params.set_bokeh_radius(7.5);
        assert_eq!(params.focus_distance(), 100.0);
        assert_eq!(params.focus_range(), 0.1);
        assert_eq!(params.bokeh_radius(), 7.5);
    }
}
