//! Recording context used by the unit tests

use crate::{
    DepthEncoding, DofError, DofParams, GpuContext,
    executable_pipeline::{DofStage, ExecutablePass},
    gpu_context::{ImageInfo, ProgramParameters, ScratchDescriptor},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MockTexture {
    pub id: u32,
    pub label: String,
    pub info: ImageInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateProgram,
    BindParameters { params: DofParams, depth_encoding: DepthEncoding, kernel_len: usize },
    Acquire { id: u32, label: String, width: u32, height: u32 },
    Release { id: u32 },
    Dispatch { stage: DofStage, inputs: Vec<String>, output: String },
}

#[derive(Debug, Default)]
pub struct MockProgram {
    pub binds: usize,
}

#[derive(Debug, Default)]
pub struct MockContext {
    pub events: Vec<Event>,
    /// Zero-based index of the acquire call that fails
    pub fail_acquire_at: Option<usize>,
    /// Stage whose dispatch fails
    pub fail_stage: Option<DofStage>,
    next_id: u32,
    acquire_calls: usize,
}

/// Opens a device on the default adapter, or `None` where no adapter exists
pub fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance.request_adapter(&wgpu::RequestAdapterOptions::default()).await.ok()?;
        adapter.request_device(&wgpu::DeviceDescriptor::default()).await.ok()
    })
}

pub fn color_info(width: u32, height: u32) -> ImageInfo {
    ImageInfo {
        width,
        height,
        sampled: true,
        render_target: true,
        depth_readable: false,
        float_color: true,
        sample_count: 1,
        layers: 1,
        format_name: "Rgba16Float".to_string(),
    }
}

pub fn depth_info(width: u32, height: u32) -> ImageInfo {
    ImageInfo {
        width,
        height,
        sampled: true,
        render_target: false,
        depth_readable: true,
        float_color: false,
        sample_count: 1,
        layers: 1,
        format_name: "Depth32Float".to_string(),
    }
}

impl MockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(&mut self, label: &str, info: ImageInfo) -> MockTexture {
        self.next_id += 1;
        MockTexture {
            id: self.next_id,
            label: label.to_string(),
            info,
        }
    }

    /// Creates a valid `(source, depth, destination)` frame
    pub fn frame(&mut self, width: u32, height: u32) -> (MockTexture, MockTexture, MockTexture) {
        let source = self.texture("source", color_info(width, height));
        let depth = self.texture("depth", depth_info(width, height));
        let destination = self.texture("destination", color_info(width, height));
        (source, depth, destination)
    }

    pub fn acquired(&self) -> usize {
        self.events.iter().filter(|event| matches!(event, Event::Acquire { .. })).count()
    }

    pub fn released(&self) -> usize {
        self.events.iter().filter(|event| matches!(event, Event::Release { .. })).count()
    }

    /// Ids of scratch textures acquired and never released
    pub fn outstanding(&self) -> Vec<u32> {
        let mut outstanding = Vec::new();
        for event in &self.events {
            match event {
                Event::Acquire { id, .. } => outstanding.push(*id),
                Event::Release { id } => outstanding.retain(|held| held != id),
                _ => {}
            }
        }
        outstanding
    }

    pub fn dispatched_stages(&self) -> Vec<DofStage> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Dispatch { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }
}

impl GpuContext for MockContext {
    type Texture = MockTexture;
    type Program = MockProgram;

    fn describe(&self, texture: &MockTexture) -> ImageInfo {
        texture.info.clone()
    }

    fn is_same_texture(&self, a: &MockTexture, b: &MockTexture) -> bool {
        a.id == b.id
    }

    fn create_program(&mut self) -> Result<MockProgram, DofError> {
        self.events.push(Event::CreateProgram);
        Ok(MockProgram::default())
    }

    fn bind_parameters(&mut self, program: &mut MockProgram, parameters: &ProgramParameters<'_>) {
        program.binds += 1;
        self.events.push(Event::BindParameters {
            params: parameters.params,
            depth_encoding: parameters.depth_encoding,
            kernel_len: parameters.kernel.len(),
        });
    }

    fn acquire(&mut self, descriptor: &ScratchDescriptor, _source: &MockTexture) -> Result<MockTexture, DofError> {
        let call = self.acquire_calls;
        self.acquire_calls += 1;
        if self.fail_acquire_at == Some(call) {
            return Err(DofError::ScratchAllocation {
                label: descriptor.label,
                width: descriptor.width,
                height: descriptor.height,
                reason: "out of memory".to_string(),
            });
        }

        let texture = self.texture(descriptor.label, color_info(descriptor.width, descriptor.height));
        self.events.push(Event::Acquire {
            id: texture.id,
            label: texture.label.clone(),
            width: descriptor.width,
            height: descriptor.height,
        });
        Ok(texture)
    }

    fn release(&mut self, texture: MockTexture) {
        self.events.push(Event::Release { id: texture.id });
    }

    fn dispatch(&mut self, _program: &mut MockProgram, pass: &'static ExecutablePass, inputs: &[&MockTexture], output: &MockTexture) -> Result<(), DofError> {
        if self.fail_stage == Some(pass.stage) {
            return Err(DofError::Pass {
                stage: pass.stage,
                reason: "device lost".to_string(),
            });
        }

        self.events.push(Event::Dispatch {
            stage: pass.stage,
            inputs: inputs.iter().map(|texture| texture.label.clone()).collect(),
            output: output.label.clone(),
        });
        Ok(())
    }
}
