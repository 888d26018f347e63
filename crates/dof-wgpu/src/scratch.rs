//! Scratch texture management
//!
//! [`ScratchScope`] ties the scratch textures of one invocation to a Rust scope:
//! whatever was acquired is released when the scope is dropped, on success and on
//! every early return. [`ScratchPool`] is the wgpu-side recycler the scope
//! releases into.

use crate::{
    DofError, FrameImages, GpuContext,
    executable_pipeline::{ExecutablePass, ExecutablePipeline, ScratchTexture, TextureSlot},
    gpu_context::ScratchDescriptor,
};

impl ScratchTexture {
    /// Builds the allocation request for a frame of the given size
    pub fn descriptor(&self, frame_size: (u32, u32)) -> ScratchDescriptor {
        ScratchDescriptor {
            label: self.label,
            width: self.scale_factor.0.apply(frame_size.0),
            height: self.scale_factor.1.apply(frame_size.1),
            depth_bits: self.depth_bits,
            format: self.format,
            color_space: self.color_space,
        }
    }
}

/// Scratch textures held by one pipeline invocation
///
/// Holds the context mutably for its whole life, so passes are recorded through
/// the scope.
pub struct ScratchScope<'g, G: GpuContext> {
    gpu: &'g mut G,
    pipeline: &'static ExecutablePipeline,
    /// Acquired textures, index-aligned with `pipeline.scratch_textures`
    held: Vec<G::Texture>,
}

impl<'g, G: GpuContext> ScratchScope<'g, G> {
    pub fn new(gpu: &'g mut G, pipeline: &'static ExecutablePipeline) -> Self {
        Self {
            gpu,
            pipeline,
            held: Vec::with_capacity(pipeline.scratch_textures.len()),
        }
    }

    /// Acquires every scratch texture of the pipeline, in declaration order
    ///
    /// Stops at the first failure; textures acquired so far stay held and are
    /// released with the scope.
    pub fn acquire_all(&mut self, frame_size: (u32, u32), source: &G::Texture) -> Result<(), DofError> {
        for scratch in &self.pipeline.scratch_textures[self.held.len()..] {
            let descriptor = scratch.descriptor(frame_size);
            let texture = self.gpu.acquire(&descriptor, source)?;
            self.held.push(texture);
        }
        Ok(())
    }

    /// Number of scratch textures currently held
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Records one pass, resolving its texture slots against the frame and the held scratch textures
    pub fn dispatch(&mut self, program: &mut G::Program, pass: &'static ExecutablePass, frame: &FrameImages<'_, G::Texture>) -> Result<(), DofError> {
        let inputs = pass
            .input_textures
            .iter()
            .map(|input| resolve(self.pipeline, &self.held, frame, pass, input.slot))
            .collect::<Result<Vec<_>, _>>()?;
        let output = resolve(self.pipeline, &self.held, frame, pass, pass.output_texture)?;

        self.gpu.dispatch(program, pass, &inputs, output)
    }
}

impl<G: GpuContext> Drop for ScratchScope<'_, G> {
    fn drop(&mut self) {
        for texture in self.held.drain(..).rev() {
            self.gpu.release(texture);
        }
    }
}

fn resolve<'a, T>(pipeline: &ExecutablePipeline, held: &'a [T], frame: &FrameImages<'a, T>, pass: &ExecutablePass, slot: TextureSlot) -> Result<&'a T, DofError> {
    match slot {
        TextureSlot::Source => Ok(frame.source),
        TextureSlot::Depth => Ok(frame.depth),
        TextureSlot::Destination => Ok(frame.destination),
        _ => pipeline
            .scratch_index(slot)
            .and_then(|index| held.get(index))
            .ok_or(DofError::UnboundSlot { stage: pass.stage, slot }),
    }
}

/// Textures waiting in the pool are identified by everything that affects compatibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PoolKey {
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

#[derive(Debug)]
struct PooledTexture {
    key: PoolKey,
    texture: wgpu::Texture,
    released_at: u64,
}

/// Recycles scratch textures across invocations
///
/// Released textures are kept and handed out again to requests with the same
/// size and format. Contents are never preserved in any meaningful way; every
/// pass overwrites the full texture it renders to.
#[derive(Debug, Default)]
pub struct ScratchPool {
    free: Vec<PooledTexture>,
    frame: u64,
}

/// Usages of every scratch texture: rendered to by one pass, sampled by the next
pub const SCRATCH_TEXTURE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT.union(wgpu::TextureUsages::TEXTURE_BINDING);

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of idle textures in the pool
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Marks the start of a new frame for idle tracking
    pub fn next_frame(&mut self) {
        self.frame += 1;
    }

    /// Drops idle textures released more than `max_idle_frames` frames ago
    pub fn trim(&mut self, max_idle_frames: u64) {
        let frame = self.frame;
        let before = self.free.len();
        self.free.retain(|pooled| frame.saturating_sub(pooled.released_at) <= max_idle_frames);
        if self.free.len() != before {
            tracing::debug!(dropped = before - self.free.len(), kept = self.free.len(), "trimmed scratch pool");
        }
    }

    /// Drops every idle texture
    pub fn clear(&mut self) {
        self.free.clear();
    }

    /// Takes a matching idle texture or creates a new one
    ///
    /// Creation runs inside out-of-memory and validation error scopes, so a
    /// failed allocation comes back as [`DofError::ScratchAllocation`] instead
    /// of reaching the device's uncaptured error handler.
    pub(crate) fn acquire(&mut self, device: &wgpu::Device, label: &'static str, width: u32, height: u32, format: wgpu::TextureFormat) -> Result<wgpu::Texture, DofError> {
        let key = PoolKey { width, height, format };

        if let Some(index) = self.free.iter().position(|pooled| pooled.key == key) {
            tracing::debug!(label, width, height, ?format, "reusing pooled scratch texture");
            return Ok(self.free.swap_remove(index).texture);
        }

        tracing::debug!(label, width, height, ?format, "creating scratch texture");
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: SCRATCH_TEXTURE_USAGE,
            view_formats: &[],
        });
        let validation_error = pollster::block_on(device.pop_error_scope());
        let memory_error = pollster::block_on(device.pop_error_scope());

        match memory_error.or(validation_error) {
            None => Ok(texture),
            Some(error) => {
                tracing::warn!(label, width, height, ?format, %error, "scratch texture allocation failed");
                Err(DofError::ScratchAllocation {
                    label,
                    width,
                    height,
                    reason: error.to_string(),
                })
            }
        }
    }

    /// Returns a texture to the pool
    pub(crate) fn release(&mut self, texture: wgpu::Texture) {
        let key = PoolKey {
            width: texture.width(),
            height: texture.height(),
            format: texture.format(),
        };
        self.free.push(PooledTexture {
            key,
            texture,
            released_at: self.frame,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DepthEncoding,
        executable_pipeline::{ColorSpace, DofStage, ScratchFormat},
        pipelines::DEPTH_OF_FIELD,
        test_support::{Event, MockContext, test_device},
    };

    const WORK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

    #[test]
    fn test_descriptors_for_odd_frame() {
        let descriptors: Vec<_> = DEPTH_OF_FIELD.scratch_textures.iter().map(|scratch| scratch.descriptor((641, 361))).collect();

        assert_eq!(descriptors.len(), 3);
        assert_eq!((descriptors[0].width, descriptors[0].height), (641, 361));
        assert_eq!(descriptors[0].format, ScratchFormat::SignedHalf);
        assert_eq!(descriptors[0].color_space, ColorSpace::Linear);
        for work in &descriptors[1..] {
            assert_eq!((work.width, work.height), (320, 180));
            assert_eq!(work.format, ScratchFormat::MatchSource);
            assert_eq!(work.depth_bits, 0);
        }
    }

    #[test]
    fn test_scope_releases_on_drop() {
        let mut gpu = MockContext::new();
        let (source, depth, destination) = gpu.frame(8, 8);
        {
            let mut scope = ScratchScope::new(&mut gpu, &DEPTH_OF_FIELD);
            scope.acquire_all((8, 8), &source).unwrap();
            assert_eq!(scope.held(), 3);
        }
        let _ = (depth, destination);

        assert_eq!(gpu.acquired(), 3);
        assert_eq!(gpu.released(), 3);
        assert!(gpu.outstanding().is_empty());
    }

    #[test]
    fn test_scope_releases_partial_acquisition() {
        let mut gpu = MockContext::new();
        gpu.fail_acquire_at = Some(2);
        let (source, _, _) = gpu.frame(8, 8);
        {
            let mut scope = ScratchScope::new(&mut gpu, &DEPTH_OF_FIELD);
            let result = scope.acquire_all((8, 8), &source);
            assert!(matches!(result, Err(DofError::ScratchAllocation { label: "DoF Work 1", .. })));
            assert_eq!(scope.held(), 2);
        }
        assert_eq!(gpu.acquired(), 2);
        assert_eq!(gpu.released(), 2);
    }

    #[test]
    fn test_dispatch_resolves_slots() {
        let mut gpu = MockContext::new();
        let (source, depth, destination) = gpu.frame(16, 8);
        let frame = FrameImages::new(&source, &depth, &destination, DepthEncoding::Linear);
        let mut program = gpu.create_program().unwrap();
        {
            let mut scope = ScratchScope::new(&mut gpu, &DEPTH_OF_FIELD);
            scope.acquire_all((16, 8), &source).unwrap();
            let pass = DEPTH_OF_FIELD.pass(DofStage::Combine).unwrap();
            scope.dispatch(&mut program, pass, &frame).unwrap();
        }

        let dispatch = gpu
            .events
            .iter()
            .find_map(|event| match event {
                Event::Dispatch { stage, inputs, output } => Some((*stage, inputs.clone(), output.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(dispatch.0, DofStage::Combine);
        assert_eq!(dispatch.1, vec!["source".to_string(), "DoF CoC".to_string(), "DoF Work 0".to_string()]);
        assert_eq!(dispatch.2, "destination");
    }

    #[test]
    fn test_pool_reuses_released_textures() {
        let Some((device, _queue)) = test_device() else {
            eprintln!("no adapter available, skipping");
            return;
        };
        let mut pool = ScratchPool::new();

        let texture = pool.acquire(&device, "DoF Work 0", 16, 8, WORK_FORMAT).unwrap();
        pool.release(texture.clone());
        assert_eq!(pool.len(), 1);

        let reused = pool.acquire(&device, "DoF Work 1", 16, 8, WORK_FORMAT).unwrap();
        assert_eq!(reused, texture);
        assert!(pool.is_empty());

        // Different size or format never matches
        pool.release(reused);
        let other = pool.acquire(&device, "DoF Work 0", 8, 8, WORK_FORMAT).unwrap();
        assert_ne!(other, texture);
        let coc = pool.acquire(&device, "DoF CoC", 16, 8, wgpu::TextureFormat::R16Float).unwrap();
        assert_ne!(coc, texture);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_trim_drops_idle_textures() {
        let Some((device, _queue)) = test_device() else {
            eprintln!("no adapter available, skipping");
            return;
        };
        let mut pool = ScratchPool::new();
        let old = pool.acquire(&device, "DoF Work 0", 16, 16, WORK_FORMAT).unwrap();
        pool.release(old);

        for _ in 0..3 {
            pool.next_frame();
        }
        let recent = pool.acquire(&device, "DoF Work 1", 8, 8, WORK_FORMAT).unwrap();
        pool.release(recent.clone());

        pool.trim(3);
        assert_eq!(pool.len(), 2);

        pool.next_frame();
        pool.trim(3);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.acquire(&device, "DoF Work 1", 8, 8, WORK_FORMAT).unwrap(), recent);

        pool.release(recent);
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_rejected_creation_is_reported() {
        let Some((device, _queue)) = test_device() else {
            eprintln!("no adapter available, skipping");
            return;
        };
        let mut pool = ScratchPool::new();

        // Shared exponent floats can be sampled but never rendered to
        let result = pool.acquire(&device, "DoF Work 0", 16, 16, wgpu::TextureFormat::Rgb9e5Ufloat);
        assert!(matches!(
            result,
            Err(DofError::ScratchAllocation {
                label: "DoF Work 0",
                width: 16,
                height: 16,
                ..
            })
        ));
        assert!(pool.is_empty());

        // The device stays usable
        assert!(pool.acquire(&device, "DoF Work 0", 16, 16, WORK_FORMAT).is_ok());
    }
}
