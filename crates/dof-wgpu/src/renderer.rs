//! Ready-to-use wgpu front end

use crate::{BokehQuality, DepthOfField, DofError, DofParams, FrameImages, ScratchPool, WgpuContext, WgpuProgram};

/// Frames an idle scratch texture survives in the pool before being dropped
pub const POOL_IDLE_FRAMES: u64 = 8;

/// Depth of field on wgpu textures
///
/// Owns the effect and its scratch texture pool. Each [`DofRenderer::render`]
/// call records the five passes into the caller's encoder; nothing is submitted.
///
/// # Example
/// ```no_run
/// # fn run(device: &wgpu::Device, queue: &wgpu::Queue, source: &wgpu::Texture, depth: &wgpu::Texture, destination: &wgpu::Texture) -> Result<(), dof_wgpu::DofError> {
/// use dof_wgpu::{DepthEncoding, DofParams, DofRenderer, FrameImages};
///
/// let mut renderer = DofRenderer::new(DofParams::new(10.0, 3.0, 4.0));
/// let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
/// renderer.render(device, queue, &mut encoder, &FrameImages::new(source, depth, destination, DepthEncoding::Linear))?;
/// queue.submit(Some(encoder.finish()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct DofRenderer {
    effect: DepthOfField<WgpuProgram>,
    pool: ScratchPool,
}

impl DofRenderer {
    pub fn new(params: DofParams) -> Self {
        Self {
            effect: DepthOfField::new(params),
            pool: ScratchPool::new(),
        }
    }

    pub fn params(&self) -> &DofParams {
        self.effect.params()
    }

    pub fn set_params(&mut self, params: DofParams) {
        self.effect.set_params(params);
    }

    pub fn set_quality(&mut self, quality: BokehQuality) {
        self.effect.set_quality(quality);
    }

    pub fn effect(&self) -> &DepthOfField<WgpuProgram> {
        &self.effect
    }

    pub fn effect_mut(&mut self) -> &mut DepthOfField<WgpuProgram> {
        &mut self.effect
    }

    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ScratchPool {
        &mut self.pool
    }

    /// Records depth of field for one frame into `encoder`
    ///
    /// Parameters are uploaded through `queue` and apply to work submitted after
    /// this call.
    pub fn render(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, encoder: &mut wgpu::CommandEncoder, frame: &FrameImages<'_, wgpu::Texture>) -> Result<(), DofError> {
        self.pool.next_frame();
        let result = {
            let mut context = WgpuContext::new(device, queue, encoder, &mut self.pool);
            self.effect.render(&mut context, frame)
        };
        self.pool.trim(POOL_IDLE_FRAMES);
        result
    }
}
