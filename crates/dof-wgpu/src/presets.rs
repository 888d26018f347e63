//! Bokeh quality presets
//!
//! This module provides predefined disc kernel sizes for the bokeh pass, trading
//! sampling cost for smoother out-of-focus discs.

/// Quality presets that control how many samples the bokeh pass gathers per pixel
///
/// Each preset adds one ring of samples to the disc kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BokehQuality {
    /// Two rings, 22 samples
    Small,
    /// Three rings, 43 samples
    #[default]
    Medium,
    /// Four rings, 71 samples
    Large,
}

impl BokehQuality {
    /// All presets, from cheapest to most expensive
    pub const ALL: [BokehQuality; 3] = [BokehQuality::Small, BokehQuality::Medium, BokehQuality::Large];

    /// Returns the human-readable name of this preset
    pub fn name(&self) -> &'static str {
        match self {
            BokehQuality::Small => "Small",
            BokehQuality::Medium => "Medium",
            BokehQuality::Large => "Large",
        }
    }

    /// Returns the number of sample rings around the kernel center
    pub fn ring_count(&self) -> u32 {
        match self {
            BokehQuality::Small => 2,
            BokehQuality::Medium => 3,
            BokehQuality::Large => 4,
        }
    }
}

impl std::str::FromStr for BokehQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(BokehQuality::Small),
            "medium" => Ok(BokehQuality::Medium),
            "large" => Ok(BokehQuality::Large),
            _ => Err(format!("Invalid bokeh quality '{s}'. Valid presets: small, medium, large")),
        }
    }
}
