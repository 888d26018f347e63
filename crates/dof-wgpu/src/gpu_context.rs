//! The seam between the pipeline orchestrator and whatever executes it
//!
//! [`crate::DepthOfField`] only sequences work. A [`GpuContext`] owns the actual
//! resources: wgpu in production, the CPU reference engine for verification and
//! recording mocks in tests.

use crate::{
    BokehKernel, DepthEncoding, DofError, DofParams,
    executable_pipeline::{ExecutablePass, ScratchFormat, ColorSpace},
};

/// What the orchestrator needs to know about a frame image before using it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Can be bound as a sampled texture
    pub sampled: bool,
    /// Can be rendered to
    pub render_target: bool,
    /// Holds scene depth in a format the CoC pass can read
    pub depth_readable: bool,
    /// Color format read and written as floating point (unorm, snorm, float or sRGB)
    pub float_color: bool,
    pub sample_count: u32,
    pub layers: u32,
    /// Display name of the pixel format, for diagnostics
    pub format_name: String,
}

impl ImageInfo {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the image is a plain 2D image: one sample per texel, one layer
    pub fn is_single_sampled_2d(&self) -> bool {
        self.sample_count == 1 && self.layers == 1
    }
}

/// Request for a temporary texture, valid for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub depth_bits: u32,
    pub format: ScratchFormat,
    pub color_space: ColorSpace,
}

/// Everything bound to the program at the start of an invocation
#[derive(Debug, Clone, Copy)]
pub struct ProgramParameters<'a> {
    pub params: DofParams,
    pub depth_encoding: DepthEncoding,
    pub kernel: &'a BokehKernel,
}

/// Executes the pass graph on behalf of [`crate::DepthOfField`]
///
/// Contexts record work; they never wait for it. Passes are recorded in call
/// order and must execute in that order.
pub trait GpuContext {
    /// A texture, either borrowed from the caller or acquired as scratch
    type Texture;
    /// The compiled pass programs and their parameter storage
    type Program;

    /// Describes a caller-supplied frame image
    fn describe(&self, texture: &Self::Texture) -> ImageInfo;

    /// Whether two handles refer to the same underlying texture
    fn is_same_texture(&self, a: &Self::Texture, b: &Self::Texture) -> bool;

    /// Builds the program; called at most once per orchestrator
    fn create_program(&mut self) -> Result<Self::Program, DofError>;

    /// Pushes the invocation's parameters to the program
    fn bind_parameters(&mut self, program: &mut Self::Program, parameters: &ProgramParameters<'_>);

    /// Acquires a scratch texture; `source` decides [`ScratchFormat::MatchSource`]
    fn acquire(&mut self, descriptor: &ScratchDescriptor, source: &Self::Texture) -> Result<Self::Texture, DofError>;

    /// Returns a scratch texture acquired with [`GpuContext::acquire`]
    fn release(&mut self, texture: Self::Texture);

    /// Records one full-screen pass
    ///
    /// `inputs` follow the order of `pass.input_textures`.
    fn dispatch(&mut self, program: &mut Self::Program, pass: &'static ExecutablePass, inputs: &[&Self::Texture], output: &Self::Texture) -> Result<(), DofError>;
}
