//! Error types for the depth of field pipeline

use crate::executable_pipeline::{DofStage, TextureSlot};

/// Which caller-supplied frame image an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Source,
    Depth,
    Destination,
}

impl ImageRole {
    /// Returns the lowercase name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ImageRole::Source => "source",
            ImageRole::Depth => "depth",
            ImageRole::Destination => "destination",
        }
    }
}

impl std::fmt::Display for ImageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors produced while configuring or running the depth of field pipeline
///
/// Configuration errors are raised by the parameter layer only. Everything else
/// is raised by [`crate::DepthOfField::render`] and is fatal for that invocation;
/// scratch textures acquired before the failure are always released.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DofError {
    /// A parameter was rejected by the strict configuration constructor
    #[error("{name} must lie in [{min}, {max}], got {value}")]
    ParameterOutOfRange { name: &'static str, value: f32, min: f32, max: f32 },

    /// The depth encoding cannot be linearized (non-positive near plane, far <= near, ...)
    #[error("invalid depth encoding: near={near}, far={far}")]
    InvalidDepthEncoding { near: f32, far: f32 },

    /// A frame image does not have the same size as the source image
    #[error("{image} image is {actual:?} but the source image is {expected:?}")]
    SizeMismatch { image: ImageRole, expected: (u32, u32), actual: (u32, u32) },

    /// The frame cannot be halved for the work buffers
    #[error("frame of {width}x{height} is too small, both sides must be at least 2 pixels")]
    FrameTooSmall { width: u32, height: u32 },

    /// A frame image lacks a usage the pipeline relies on
    #[error("{image} image is missing the {usage} usage")]
    MissingUsage { image: ImageRole, usage: &'static str },

    /// The depth image is in a format the circle of confusion pass cannot read
    #[error("depth image format {0} cannot be read as scene depth")]
    UnsupportedDepthFormat(String),

    /// A frame image has a format or layout the passes cannot read or write
    #[error("{image} image of format {format_name} is unusable: {reason}")]
    IncompatibleImage { image: ImageRole, format_name: String, reason: &'static str },

    /// The destination is also one of the pipeline inputs
    #[error("destination image must be distinct from the source and depth images")]
    AliasedDestination,

    /// A scratch texture could not be allocated
    #[error("failed to acquire {label} scratch texture of {width}x{height}: {reason}")]
    ScratchAllocation { label: &'static str, width: u32, height: u32, reason: String },

    /// A pass referenced a texture slot that has no backing image in this invocation
    #[error("{stage} pass references unbound texture slot {slot:?}")]
    UnboundSlot { stage: DofStage, slot: TextureSlot },

    /// A context failed to record a pass
    #[error("{stage} pass failed: {reason}")]
    Pass { stage: DofStage, reason: String },
}
