//! Depth of field pipeline orchestrator
//!
//! [`DepthOfField`] owns the program and the parameters and drives one
//! invocation per frame: validate the frame, make sure the program exists, bind
//! parameters, acquire scratch textures, record the five passes, release the
//! scratch textures.

use crate::{
    BokehKernel, BokehQuality, DepthEncoding, DofError, DofParams, GpuContext,
    error::ImageRole,
    executable_pipeline::ExecutablePipeline,
    gpu_context::{ImageInfo, ProgramParameters},
    pipelines::DEPTH_OF_FIELD,
    scratch::ScratchScope,
};

/// The caller-supplied images of one invocation
#[derive(Debug)]
pub struct FrameImages<'a, T> {
    /// Full-resolution color image, read only
    pub source: &'a T,
    /// Full-resolution scene depth, read only
    pub depth: &'a T,
    /// Full-resolution color image, fully overwritten
    pub destination: &'a T,
    /// How `depth` encodes distance from the camera
    pub depth_encoding: DepthEncoding,
}

impl<T> Clone for FrameImages<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FrameImages<'_, T> {}

impl<'a, T> FrameImages<'a, T> {
    pub fn new(source: &'a T, depth: &'a T, destination: &'a T, depth_encoding: DepthEncoding) -> Self {
        Self {
            source,
            depth,
            destination,
            depth_encoding,
        }
    }
}

/// Where the orchestrator is in its per-invocation state machine
///
/// Every invocation walks `Idle → ProgramReady → BuffersAcquired` and returns to
/// `Idle` once the passes are recorded and the scratch textures are released.
/// A failed invocation still releases its scratch textures but leaves the state
/// it had reached, so callers can tell an allocation failure (`ProgramReady`)
/// from a pass failure (`BuffersAcquired`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ProgramReady,
    BuffersAcquired,
}

/// Screen-space depth of field effect
///
/// Generic over the context's program type so the program can be owned here and
/// survive across invocations.
#[derive(Debug)]
pub struct DepthOfField<P> {
    pipeline: &'static ExecutablePipeline,
    params: DofParams,
    kernel: BokehKernel,
    program: Option<P>,
    state: PipelineState,
}

impl<P> Default for DepthOfField<P> {
    fn default() -> Self {
        Self::new(DofParams::default())
    }
}

impl<P> DepthOfField<P> {
    pub fn new(params: DofParams) -> Self {
        Self {
            pipeline: &DEPTH_OF_FIELD,
            params,
            kernel: BokehKernel::new(BokehQuality::default()),
            program: None,
            state: PipelineState::Idle,
        }
    }

    pub fn params(&self) -> &DofParams {
        &self.params
    }

    /// Parameters take effect at the start of the next invocation
    pub fn params_mut(&mut self) -> &mut DofParams {
        &mut self.params
    }

    pub fn set_params(&mut self, params: DofParams) {
        self.params = params;
    }

    pub fn quality(&self) -> BokehQuality {
        self.kernel.quality()
    }

    pub fn set_quality(&mut self, quality: BokehQuality) {
        if self.kernel.quality() != quality {
            self.kernel = BokehKernel::new(quality);
        }
    }

    pub fn kernel(&self) -> &BokehKernel {
        &self.kernel
    }

    pub fn pipeline(&self) -> &'static ExecutablePipeline {
        self.pipeline
    }

    /// Whether the program has been created by a previous invocation
    pub fn is_program_ready(&self) -> bool {
        self.program.is_some()
    }

    pub fn program(&self) -> Option<&P> {
        self.program.as_ref()
    }

    /// State reached by the last invocation; `Idle` after a complete one
    ///
    /// After a failed invocation this is the last state reached before the error.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Records the full depth of field pipeline for one frame
    ///
    /// # Arguments
    /// * `gpu` - The context that owns resources and records passes
    /// * `frame` - Source, depth and destination images of this frame
    ///
    /// # Returns
    /// `Ok(())` once all five passes are recorded. On error nothing has been
    /// recorded into `frame.destination`, and every scratch texture acquired by
    /// this call has been released.
    pub fn render<G>(&mut self, gpu: &mut G, frame: &FrameImages<'_, G::Texture>) -> Result<(), DofError>
    where
        G: GpuContext<Program = P>,
    {
        self.state = PipelineState::Idle;
        let frame_size = validate_frame(gpu, frame)?;
        tracing::debug!(width = frame_size.0, height = frame_size.1, params = ?self.params, "rendering depth of field");

        let program = match self.program.take() {
            Some(program) => program,
            None => {
                let program = gpu.create_program()?;
                tracing::info!(pipeline = self.pipeline.name, "created depth of field program");
                program
            }
        };
        let program = self.program.insert(program);
        self.state = PipelineState::ProgramReady;

        gpu.bind_parameters(
            program,
            &ProgramParameters {
                params: self.params,
                depth_encoding: frame.depth_encoding,
                kernel: &self.kernel,
            },
        );

        // Scratch textures are released once this returns, whatever the result
        match issue_passes(gpu, self.pipeline, program, frame, frame_size, &mut self.state) {
            Ok(()) => {
                self.state = PipelineState::Idle;
                Ok(())
            }
            Err(error) => {
                tracing::debug!(%error, state = ?self.state, "depth of field invocation failed");
                Err(error)
            }
        }
    }
}

/// Acquires scratch textures and records every pass; the scratch scope ends with this call
fn issue_passes<G: GpuContext>(
    gpu: &mut G,
    pipeline: &'static ExecutablePipeline,
    program: &mut G::Program,
    frame: &FrameImages<'_, G::Texture>,
    frame_size: (u32, u32),
    state: &mut PipelineState,
) -> Result<(), DofError> {
    let mut scope = ScratchScope::new(gpu, pipeline);
    scope.acquire_all(frame_size, frame.source)?;
    *state = PipelineState::BuffersAcquired;

    for pass in pipeline.passes {
        tracing::trace!(pass = pass.name, "recording pass");
        scope.dispatch(program, pass, frame)?;
    }
    Ok(())
}

/// Checks every precondition of an invocation before anything is acquired
///
/// # Returns
/// The frame size shared by all three images
pub fn validate_frame<G: GpuContext>(gpu: &G, frame: &FrameImages<'_, G::Texture>) -> Result<(u32, u32), DofError> {
    frame.depth_encoding.validate()?;

    let source = gpu.describe(frame.source);
    let depth = gpu.describe(frame.depth);
    let destination = gpu.describe(frame.destination);

    if !source.sampled {
        return Err(DofError::MissingUsage {
            image: ImageRole::Source,
            usage: "TEXTURE_BINDING",
        });
    }
    if !depth.sampled {
        return Err(DofError::MissingUsage {
            image: ImageRole::Depth,
            usage: "TEXTURE_BINDING",
        });
    }
    if !depth.depth_readable {
        return Err(DofError::UnsupportedDepthFormat(depth.format_name));
    }
    if !destination.render_target {
        return Err(DofError::MissingUsage {
            image: ImageRole::Destination,
            usage: "RENDER_ATTACHMENT",
        });
    }
    for (image, info) in [(ImageRole::Source, &source), (ImageRole::Destination, &destination)] {
        if !info.float_color {
            return Err(incompatible(image, info, "not a floating point color format"));
        }
    }
    for (image, info) in [(ImageRole::Source, &source), (ImageRole::Depth, &depth), (ImageRole::Destination, &destination)] {
        if !info.is_single_sampled_2d() {
            return Err(incompatible(image, info, "not a single-sampled image with one layer"));
        }
    }

    let size = source.size();
    for (image, info) in [(ImageRole::Depth, &depth), (ImageRole::Destination, &destination)] {
        if info.size() != size {
            return Err(DofError::SizeMismatch {
                image,
                expected: size,
                actual: info.size(),
            });
        }
    }
    if size.0 < 2 || size.1 < 2 {
        return Err(DofError::FrameTooSmall { width: size.0, height: size.1 });
    }

    if gpu.is_same_texture(frame.source, frame.destination) || gpu.is_same_texture(frame.depth, frame.destination) {
        return Err(DofError::AliasedDestination);
    }

    Ok(size)
}

fn incompatible(image: ImageRole, info: &ImageInfo, reason: &'static str) -> DofError {
    DofError::IncompatibleImage {
        image,
        format_name: info.format_name.clone(),
        reason,
    }
}
