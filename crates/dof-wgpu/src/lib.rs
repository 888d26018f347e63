//! Screen-space depth of field for wgpu
//!
//! Blurs a color image according to each pixel's distance from a focus plane,
//! read from a matching depth image. The effect runs as five full-screen passes:
//! circle of confusion, half resolution pre-filter, bokeh gather, post-filter
//! tent and the final combine with the sharp source.
//!
//! [`DofRenderer`] is the ready-to-use wgpu front end. [`DepthOfField`] is the
//! orchestrator underneath, generic over a [`GpuContext`] so the same sequencing
//! can drive other executors.

pub mod coc;
mod depth_of_field;
mod error;
pub mod executable_pipeline;
mod gpu_context;
mod kernel;
mod params;
mod pipeline_executor;
pub mod pipelines;
pub mod presets;
mod renderer;
pub mod scratch;

#[cfg(test)]
mod test_support;

pub use coc::DepthEncoding;
pub use depth_of_field::{DepthOfField, FrameImages, PipelineState, validate_frame};
pub use error::{DofError, ImageRole};
pub use executable_pipeline::{DofStage, ExecutablePipeline};
pub use gpu_context::{GpuContext, ImageInfo, ProgramParameters, ScratchDescriptor};
pub use kernel::{BokehKernel, MAX_KERNEL_SAMPLES};
pub use params::{BOKEH_RADIUS_RANGE, DofParams, FOCUS_DISTANCE_RANGE, FOCUS_RANGE_RANGE};
pub use pipeline_executor::{COC_FORMAT, DepthBinding, DofUniforms, FALLBACK_WORK_FORMAT, WgpuContext, WgpuProgram, shader_source, work_format};
pub use presets::BokehQuality;
pub use renderer::{DofRenderer, POOL_IDLE_FRAMES};
pub use scratch::ScratchPool;
