//! wgpu execution of the depth of field pass graph
//!
//! Every pass is a full-screen triangle drawn into its output texture. Bind group
//! layouts are derived from the pass tables in [`crate::pipelines`], and render
//! pipelines are compiled lazily for each combination of output format and depth
//! binding the caller actually uses.

use std::collections::HashMap;

use crate::{
    DofError, GpuContext, MAX_KERNEL_SAMPLES,
    executable_pipeline::{ColorSpace, DofStage, ExecutablePass, SampleMode, SamplerFilterMode, ScratchFormat, TextureSlot, UNIFORM_BINDING},
    gpu_context::{ImageInfo, ProgramParameters, ScratchDescriptor},
    pipelines::DEPTH_OF_FIELD,
    scratch::{SCRATCH_TEXTURE_USAGE, ScratchPool},
};

const PRELUDE: &str = include_str!("../wgsl/prelude.wgsl");
const DEPTH_TEXTURE_PRELUDE: &str = include_str!("../wgsl/depth_texture.wgsl");
const DEPTH_FLOAT_PRELUDE: &str = include_str!("../wgsl/depth_float.wgsl");

/// Format of the signed circle of confusion buffer
pub const COC_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;
/// Work buffer format when the source format cannot be rendered to and filtered
pub const FALLBACK_WORK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Uniform block shared by all passes, laid out as `DofUniforms` in the WGSL prelude
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DofUniforms {
    pub focus_distance: f32,
    pub focus_range: f32,
    pub bokeh_radius: f32,
    pub kernel_len: u32,
    pub depth_near: f32,
    pub depth_far: f32,
    pub depth_mode: u32,
    pub _padding: u32,
}

impl DofUniforms {
    pub fn new(parameters: &ProgramParameters<'_>) -> Self {
        let (depth_near, depth_far) = parameters.depth_encoding.planes();
        Self {
            focus_distance: parameters.params.focus_distance(),
            focus_range: parameters.params.focus_range(),
            bokeh_radius: parameters.params.bokeh_radius(),
            kernel_len: parameters.kernel.len() as u32,
            depth_near,
            depth_far,
            depth_mode: parameters.depth_encoding.mode(),
            _padding: 0,
        }
    }
}

/// How the depth image is exposed to the circle of confusion pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthBinding {
    /// A depth attachment format, bound as `texture_depth_2d`
    DepthTexture,
    /// A single channel float color format, bound as `texture_2d<f32>`
    FloatTexture,
}

impl DepthBinding {
    pub fn for_format(format: wgpu::TextureFormat) -> Option<Self> {
        use wgpu::TextureFormat::*;

        match format {
            Depth16Unorm | Depth24Plus | Depth24PlusStencil8 | Depth32Float | Depth32FloatStencil8 => Some(Self::DepthTexture),
            R16Float | R32Float => Some(Self::FloatTexture),
            _ => None,
        }
    }
}

/// Assembles the WGSL module for a pass
pub fn shader_source(pass: &ExecutablePass, depth: Option<DepthBinding>) -> String {
    let mut source = String::from(PRELUDE);
    match depth {
        Some(DepthBinding::DepthTexture) => source.push_str(DEPTH_TEXTURE_PRELUDE),
        Some(DepthBinding::FloatTexture) => source.push_str(DEPTH_FLOAT_PRELUDE),
        None => {}
    }
    source.push_str(pass.shader);
    source
}

/// Picks the work buffer format for a source format
///
/// Work buffers keep the source format when it can be both rendered to and
/// filtered, so the blur does not change precision or encoding.
pub fn work_format(device: &wgpu::Device, source: wgpu::TextureFormat) -> wgpu::TextureFormat {
    let features = source.guaranteed_format_features(device.features());
    if !source.is_depth_stencil_format()
        && features.allowed_usages.contains(SCRATCH_TEXTURE_USAGE)
        && features.flags.contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
    {
        source
    } else {
        FALLBACK_WORK_FORMAT
    }
}

/// Whether shaders read and write `format` as `vec4<f32>` color
fn is_float_color(format: wgpu::TextureFormat) -> bool {
    !format.is_depth_stencil_format() && matches!(format.sample_type(None, None), Some(wgpu::TextureSampleType::Float { .. }))
}

/// Everything a compiled pass variant is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PassKey {
    stage: DofStage,
    target_format: wgpu::TextureFormat,
    depth: Option<DepthBinding>,
}

#[derive(Debug)]
struct PreparedPass {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

/// GPU side state of a [`crate::DepthOfField`] instance
///
/// Created once and reused across invocations. Parameters are rewritten with
/// `Queue::write_buffer` at the start of each invocation, which takes effect
/// at the next submit.
#[derive(Debug)]
pub struct WgpuProgram {
    uniform_buffer: wgpu::Buffer,
    kernel_buffer: wgpu::Buffer,
    samplers: HashMap<SamplerFilterMode, wgpu::Sampler>,
    prepared: HashMap<PassKey, PreparedPass>,
}

impl WgpuProgram {
    fn new(device: &wgpu::Device, filter_modes: &[SamplerFilterMode]) -> Self {
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DoF Uniforms"),
            size: size_of::<DofUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let kernel_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DoF Kernel"),
            size: (MAX_KERNEL_SAMPLES * size_of::<[f32; 2]>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let samplers = filter_modes
            .iter()
            .map(|filter_mode| {
                let filter = match filter_mode {
                    SamplerFilterMode::Nearest => wgpu::FilterMode::Nearest,
                    SamplerFilterMode::Linear => wgpu::FilterMode::Linear,
                };
                let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some(&format!("DoF Sampler {filter_mode:?}")),
                    address_mode_u: wgpu::AddressMode::ClampToEdge,
                    address_mode_v: wgpu::AddressMode::ClampToEdge,
                    address_mode_w: wgpu::AddressMode::ClampToEdge,
                    mag_filter: filter,
                    min_filter: filter,
                    mipmap_filter: wgpu::FilterMode::Nearest,
                    lod_min_clamp: 0.0,
                    lod_max_clamp: 0.0,
                    compare: None,
                    anisotropy_clamp: 1,
                    border_color: None,
                });
                (*filter_mode, sampler)
            })
            .collect();

        Self {
            uniform_buffer,
            kernel_buffer,
            samplers,
            prepared: HashMap::new(),
        }
    }

    /// Number of compiled pass variants
    pub fn compiled_passes(&self) -> usize {
        self.prepared.len()
    }

    fn prepare(&mut self, device: &wgpu::Device, pass: &ExecutablePass, key: PassKey) {
        if self.prepared.contains_key(&key) {
            return;
        }

        tracing::debug!(pass = pass.name, format = ?key.target_format, depth = ?key.depth, "compiling pass");

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(pass.name),
            source: wgpu::ShaderSource::Wgsl(shader_source(pass, key.depth).into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(pass.name),
            entries: &layout_entries(pass, key.depth),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(pass.name),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(pass.name),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader_module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        self.prepared.insert(key, PreparedPass { bind_group_layout, pipeline });
    }
}

/// Bind group layout entries for a pass, sorted by binding number
fn layout_entries(pass: &ExecutablePass, depth: Option<DepthBinding>) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: UNIFORM_BINDING,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(size_of::<DofUniforms>() as u64),
        },
        count: None,
    }];

    for input in pass.input_textures {
        let sample_type = match (input.slot, depth, input.sample_mode) {
            (TextureSlot::Depth, Some(DepthBinding::DepthTexture), _) => wgpu::TextureSampleType::Depth,
            (_, _, SampleMode::Filtered(SamplerFilterMode::Linear)) => wgpu::TextureSampleType::Float { filterable: true },
            _ => wgpu::TextureSampleType::Float { filterable: false },
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: input.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }

    for sampler in pass.samplers {
        let binding_type = match sampler.filter_mode {
            SamplerFilterMode::Nearest => wgpu::SamplerBindingType::NonFiltering,
            SamplerFilterMode::Linear => wgpu::SamplerBindingType::Filtering,
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: sampler.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(binding_type),
            count: None,
        });
    }

    if let Some(binding) = pass.kernel_binding {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }

    entries.sort_by_key(|entry| entry.binding);
    entries
}

/// Records depth of field passes into a caller's command encoder
///
/// Scratch textures come from and return to the borrowed [`ScratchPool`].
pub struct WgpuContext<'a> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    encoder: &'a mut wgpu::CommandEncoder,
    pool: &'a mut ScratchPool,
}

impl<'a> WgpuContext<'a> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue, encoder: &'a mut wgpu::CommandEncoder, pool: &'a mut ScratchPool) -> Self {
        Self { device, queue, encoder, pool }
    }

    fn resolve_format(&self, descriptor: &ScratchDescriptor, source: &wgpu::Texture) -> wgpu::TextureFormat {
        let format = match descriptor.format {
            ScratchFormat::SignedHalf => COC_FORMAT,
            ScratchFormat::MatchSource => work_format(self.device, source.format()),
        };
        match descriptor.color_space {
            ColorSpace::Linear => format.remove_srgb_suffix(),
            ColorSpace::Default => format,
        }
    }
}

impl GpuContext for WgpuContext<'_> {
    type Texture = wgpu::Texture;
    type Program = WgpuProgram;

    fn describe(&self, texture: &wgpu::Texture) -> ImageInfo {
        let usage = texture.usage();
        let format = texture.format();
        ImageInfo {
            width: texture.width(),
            height: texture.height(),
            sampled: usage.contains(wgpu::TextureUsages::TEXTURE_BINDING),
            render_target: usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT),
            depth_readable: DepthBinding::for_format(format).is_some(),
            float_color: is_float_color(format),
            sample_count: texture.sample_count(),
            layers: texture.depth_or_array_layers(),
            format_name: format!("{format:?}"),
        }
    }

    fn is_same_texture(&self, a: &wgpu::Texture, b: &wgpu::Texture) -> bool {
        a == b
    }

    fn create_program(&mut self) -> Result<WgpuProgram, DofError> {
        Ok(WgpuProgram::new(self.device, DEPTH_OF_FIELD.samplers))
    }

    fn bind_parameters(&mut self, program: &mut WgpuProgram, parameters: &ProgramParameters<'_>) {
        let uniforms = DofUniforms::new(parameters);
        self.queue.write_buffer(&program.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        self.queue.write_buffer(&program.kernel_buffer, 0, bytemuck::cast_slice(parameters.kernel.samples()));
    }

    fn acquire(&mut self, descriptor: &ScratchDescriptor, source: &wgpu::Texture) -> Result<wgpu::Texture, DofError> {
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        let reason = if descriptor.depth_bits != 0 {
            Some("depth attachments are not supported for scratch textures".to_string())
        } else if descriptor.width == 0 || descriptor.height == 0 {
            Some("empty extent".to_string())
        } else if descriptor.width > max_dimension || descriptor.height > max_dimension {
            Some(format!("exceeds the device limit of {max_dimension} texels"))
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(DofError::ScratchAllocation {
                label: descriptor.label,
                width: descriptor.width,
                height: descriptor.height,
                reason,
            });
        }

        let format = self.resolve_format(descriptor, source);
        self.pool.acquire(self.device, descriptor.label, descriptor.width, descriptor.height, format)
    }

    fn release(&mut self, texture: wgpu::Texture) {
        self.pool.release(texture);
    }

    fn dispatch(&mut self, program: &mut WgpuProgram, pass: &'static ExecutablePass, inputs: &[&wgpu::Texture], output: &wgpu::Texture) -> Result<(), DofError> {
        let depth = match pass.input_textures.iter().zip(inputs).find(|(input, _)| input.slot == TextureSlot::Depth) {
            Some((_, texture)) => Some(DepthBinding::for_format(texture.format()).ok_or_else(|| DofError::UnsupportedDepthFormat(format!("{:?}", texture.format())))?),
            None => None,
        };
        let key = PassKey {
            stage: pass.stage,
            target_format: output.format(),
            depth,
        };
        program.prepare(self.device, pass, key);
        let prepared = program.prepared.get(&key).ok_or_else(|| DofError::Pass {
            stage: pass.stage,
            reason: "pass was not compiled".to_string(),
        })?;

        let input_views: Vec<_> = pass
            .input_textures
            .iter()
            .zip(inputs)
            .map(|(input, texture)| {
                let aspect = if input.slot == TextureSlot::Depth && depth == Some(DepthBinding::DepthTexture) {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                };
                (
                    input.binding,
                    texture.create_view(&wgpu::TextureViewDescriptor {
                        aspect,
                        ..Default::default()
                    }),
                )
            })
            .collect();

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: UNIFORM_BINDING,
            resource: program.uniform_buffer.as_entire_binding(),
        }];
        for (binding, view) in &input_views {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        for sampler in pass.samplers {
            let sampler_resource = program.samplers.get(&sampler.filter_mode).ok_or_else(|| DofError::Pass {
                stage: pass.stage,
                reason: format!("no {:?} sampler", sampler.filter_mode),
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: sampler.binding,
                resource: wgpu::BindingResource::Sampler(sampler_resource),
            });
        }
        if let Some(binding) = pass.kernel_binding {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: program.kernel_buffer.as_entire_binding(),
            });
        }
        entries.sort_by_key(|entry| entry.binding);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(pass.name),
            layout: &prepared.bind_group_layout,
            entries: &entries,
        });

        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());
        let mut render_pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(pass.name),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &output_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        render_pass.set_pipeline(&prepared.pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BokehKernel, BokehQuality, DepthEncoding, DofParams};

    fn validate(source: &str) -> Result<naga::valid::ModuleInfo, String> {
        let module = naga::front::wgsl::parse_str(source).map_err(|error| error.emit_to_string(source))?;
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
            .validate(&module)
            .map_err(|error| format!("{error:?}"))
    }

    #[test]
    fn test_every_pass_shader_validates() {
        for pass in DEPTH_OF_FIELD.passes {
            let variants: &[Option<DepthBinding>] = if pass.input_textures.iter().any(|input| input.slot == TextureSlot::Depth) {
                &[Some(DepthBinding::DepthTexture), Some(DepthBinding::FloatTexture)]
            } else {
                &[None]
            };
            for depth in variants {
                let source = shader_source(pass, *depth);
                if let Err(error) = validate(&source) {
                    panic!("{} ({depth:?}) failed validation:\n{error}", pass.name);
                }
            }
        }
    }

    #[test]
    fn test_shaders_declare_their_bindings() {
        for pass in DEPTH_OF_FIELD.passes {
            let depth = pass.input_textures.iter().any(|input| input.slot == TextureSlot::Depth).then_some(DepthBinding::FloatTexture);
            let source = shader_source(pass, depth);
            for entry in layout_entries(pass, depth) {
                assert!(source.contains(&format!("@binding({})", entry.binding)), "{} does not declare binding {}", pass.name, entry.binding);
            }
        }
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(size_of::<DofUniforms>(), 32);
        assert_eq!(size_of::<DofUniforms>() % 16, 0);
    }

    #[test]
    fn test_uniforms_from_parameters() {
        let params = DofParams::new(12.0, 2.0, 6.0);
        let kernel = BokehKernel::new(BokehQuality::Large);
        let uniforms = DofUniforms::new(&ProgramParameters {
            params,
            depth_encoding: DepthEncoding::ReversedPerspective { near: 0.1, far: 500.0 },
            kernel: &kernel,
        });

        assert_eq!(uniforms.focus_distance, 12.0);
        assert_eq!(uniforms.focus_range, 2.0);
        assert_eq!(uniforms.bokeh_radius, 6.0);
        assert_eq!(uniforms.kernel_len, 71);
        assert_eq!((uniforms.depth_near, uniforms.depth_far), (0.1, 500.0));
        assert_eq!(uniforms.depth_mode, 2);
    }

    #[test]
    fn test_depth_bindings() {
        assert_eq!(DepthBinding::for_format(wgpu::TextureFormat::Depth32Float), Some(DepthBinding::DepthTexture));
        assert_eq!(DepthBinding::for_format(wgpu::TextureFormat::Depth24PlusStencil8), Some(DepthBinding::DepthTexture));
        assert_eq!(DepthBinding::for_format(wgpu::TextureFormat::R32Float), Some(DepthBinding::FloatTexture));
        assert_eq!(DepthBinding::for_format(wgpu::TextureFormat::Rgba8Unorm), None);
    }

    #[test]
    fn test_layout_marks_depth_and_filtered_inputs() {
        let coc = DEPTH_OF_FIELD.pass(DofStage::CircleOfConfusion).unwrap();
        let entries = layout_entries(coc, Some(DepthBinding::DepthTexture));
        assert!(matches!(
            entries[1].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                ..
            }
        ));

        let combine = DEPTH_OF_FIELD.pass(DofStage::Combine).unwrap();
        let entries = layout_entries(combine, None);
        let bindings: Vec<_> = entries.iter().map(|entry| entry.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3, 4]);
        assert!(matches!(
            entries[3].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                ..
            }
        ));
        assert!(matches!(entries[4].ty, wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)));
    }

    #[test]
    fn test_float_color_formats() {
        assert!(is_float_color(wgpu::TextureFormat::Rgba16Float));
        assert!(is_float_color(wgpu::TextureFormat::Rgba32Float));
        assert!(is_float_color(wgpu::TextureFormat::Bgra8UnormSrgb));
        assert!(!is_float_color(wgpu::TextureFormat::Rgba8Uint));
        assert!(!is_float_color(wgpu::TextureFormat::R32Sint));
        assert!(!is_float_color(wgpu::TextureFormat::Depth32Float));
    }

    #[test]
    fn test_program_samplers_follow_pipeline_table() {
        let Some((device, queue)) = crate::test_support::test_device() else {
            eprintln!("no adapter available, skipping");
            return;
        };
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        let mut pool = ScratchPool::new();
        let mut context = WgpuContext::new(&device, &queue, &mut encoder, &mut pool);

        let program = context.create_program().unwrap();

        assert_eq!(program.samplers.len(), DEPTH_OF_FIELD.samplers.len());
        for filter_mode in DEPTH_OF_FIELD.samplers {
            assert!(program.samplers.contains_key(filter_mode), "missing {filter_mode:?} sampler");
        }
        assert_eq!(program.compiled_passes(), 0);
    }
}
