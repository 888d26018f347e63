//! Executable pipeline definitions
//!
//! This module defines the data structures describing the depth of field pass
//! graph: which textures exist, at which resolution, and how every pass reads and
//! writes them. The description is plain data so that pass wiring can be checked
//! without a GPU; contexts turn it into real work.

/// Represents a rational scale factor as a fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor {
    /// The numerator of the scale factor fraction
    pub numerator: u32,
    /// The denominator of the scale factor fraction
    pub denominator: u32,
}

impl ScaleFactor {
    /// Same size as the frame
    pub const FULL: ScaleFactor = ScaleFactor { numerator: 1, denominator: 1 };
    /// Half the frame size, rounded down
    pub const HALF: ScaleFactor = ScaleFactor { numerator: 1, denominator: 2 };

    /// Scales a frame dimension, rounding down
    pub fn apply(&self, size: u32) -> u32 {
        (size as u64 * self.numerator as u64 / self.denominator as u64) as u32
    }
}

/// Texture sampling filter modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerFilterMode {
    /// Nearest neighbor sampling - sharp, pixelated
    Nearest,
    /// Linear interpolation sampling - smooth, blurred
    Linear,
}

/// The five stages of the depth of field pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DofStage {
    CircleOfConfusion,
    PreFilter,
    Bokeh,
    PostFilter,
    Combine,
}

impl DofStage {
    /// All stages in the order they are issued
    pub const ALL: [DofStage; 5] = [DofStage::CircleOfConfusion, DofStage::PreFilter, DofStage::Bokeh, DofStage::PostFilter, DofStage::Combine];

    pub fn name(&self) -> &'static str {
        match self {
            DofStage::CircleOfConfusion => "CircleOfConfusion",
            DofStage::PreFilter => "PreFilter",
            DofStage::Bokeh => "Bokeh",
            DofStage::PostFilter => "PostFilter",
            DofStage::Combine => "Combine",
        }
    }
}

impl std::fmt::Display for DofStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A named texture in the pass graph
///
/// `Source`, `Depth` and `Destination` are borrowed from the caller; the others
/// are scratch textures owned by one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Source,
    Depth,
    CircleOfConfusion,
    Work0,
    Work1,
    Destination,
}

impl TextureSlot {
    /// Whether the texture is supplied by the caller
    pub fn is_frame_image(&self) -> bool {
        matches!(self, TextureSlot::Source | TextureSlot::Depth | TextureSlot::Destination)
    }
}

/// Pixel format class of a scratch texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchFormat {
    /// Single channel signed half float
    SignedHalf,
    /// Same format as the source image, when the context can render to and filter it
    MatchSource,
}

/// Color space a scratch texture is read and written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// Values are stored as written, no sRGB conversion
    Linear,
    /// Whatever the resolved format implies
    Default,
}

/// A scratch texture the pipeline acquires for one invocation
#[derive(Debug, Clone)]
pub struct ScratchTexture {
    /// The slot passes use to address this texture
    pub slot: TextureSlot,
    /// Human-readable name for debugging
    pub label: &'static str,
    /// Scale factors for width and height relative to the frame
    pub scale_factor: (ScaleFactor, ScaleFactor),
    /// Bits of depth attachment, always 0 for this pipeline
    pub depth_bits: u32,
    pub format: ScratchFormat,
    pub color_space: ColorSpace,
}

/// How a pass reads one of its input textures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Exact texel fetch at the output texel's coordinates, same resolution
    Load,
    /// Exact fetch of the 2x2 block covering the output texel, input is twice the output resolution
    Footprint2x2,
    /// Hardware filtered sampling at the output texel's normalized coordinates, any resolution
    Filtered(SamplerFilterMode),
}

/// A complete pass graph ready for execution
#[derive(Debug, Clone)]
pub struct ExecutablePipeline {
    /// Human-readable name for debugging
    pub name: &'static str,
    /// Scratch textures acquired at the start of every invocation, in acquisition order
    pub scratch_textures: &'static [ScratchTexture],
    /// Sampler filter modes required by this pipeline
    pub samplers: &'static [SamplerFilterMode],
    /// Passes to execute in sequence
    pub passes: &'static [ExecutablePass],
}

impl ExecutablePipeline {
    /// Finds the scratch texture backing a slot
    pub fn scratch_index(&self, slot: TextureSlot) -> Option<usize> {
        self.scratch_textures.iter().position(|scratch| scratch.slot == slot)
    }

    /// Resolution of a slot relative to the frame
    pub fn scale_factor(&self, slot: TextureSlot) -> Option<(ScaleFactor, ScaleFactor)> {
        if slot.is_frame_image() {
            Some((ScaleFactor::FULL, ScaleFactor::FULL))
        } else {
            self.scratch_index(slot).map(|index| self.scratch_textures[index].scale_factor)
        }
    }

    pub fn pass(&self, stage: DofStage) -> Option<&'static ExecutablePass> {
        self.passes.iter().find(|pass| pass.stage == stage)
    }
}

/// A single full-screen pass within a pipeline
#[derive(Debug, Clone)]
pub struct ExecutablePass {
    /// Human-readable name for debugging
    pub name: &'static str,
    pub stage: DofStage,
    /// WGSL fragment program, concatenated after the shared prelude
    pub shader: &'static str,
    /// Input texture bindings for this pass
    pub input_textures: &'static [InputTextureBinding],
    /// The texture every pixel of which this pass writes
    pub output_texture: TextureSlot,
    /// Sampler bindings for this pass
    pub samplers: &'static [SamplerBinding],
    /// Binding of the bokeh kernel storage buffer, if the pass reads it
    pub kernel_binding: Option<u32>,
}

/// Binding point of the parameter uniform block in every pass
pub const UNIFORM_BINDING: u32 = 0;

/// Binding information for an input texture
#[derive(Debug, Clone)]
pub struct InputTextureBinding {
    /// Shader binding point index
    pub binding: u32,
    /// The texture to bind
    pub slot: TextureSlot,
    /// How the pass reads it
    pub sample_mode: SampleMode,
}

/// Binding information for a texture sampler
#[derive(Debug, Clone)]
pub struct SamplerBinding {
    /// Shader binding point index
    pub binding: u32,
    /// Filter mode for this sampler
    pub filter_mode: SamplerFilterMode,
}
