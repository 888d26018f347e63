//! wgpu utility functions for verification
//!
//! Device setup plus upload and readback of the textures the depth of field
//! effect consumes and produces.

use half::f16;

/// Usage of input textures: sampled by the effect, filled by the host
pub const TEXTURE_USAGE_INPUT: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING.union(wgpu::TextureUsages::COPY_DST);

/// Usage of the destination texture: rendered by the effect, read back by the host
pub const TEXTURE_USAGE_OUTPUT: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT.union(wgpu::TextureUsages::COPY_SRC);

#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    #[error("no suitable adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to open device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("failed to wait for the device: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("failed to map readback buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("readback channel closed before the buffer was mapped")]
    MapChannelClosed,

    #[error("unsupported texture format for readback: {0:?}")]
    UnsupportedFormat(wgpu::TextureFormat),

    #[error("expected {expected} values for a {width}x{height} texture, got {actual}")]
    DataSize { width: u32, height: u32, expected: usize, actual: usize },
}

/// Device and queue used by the verification tools
pub struct GpuHarness {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuHarness {
    /// Opens the default high performance adapter
    ///
    /// 32-bit float filtering is requested when available so that work buffers
    /// keep the full precision of `Rgba32Float` sources.
    pub async fn new() -> Result<Self, HelperError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;

        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("DoF Verification"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await?;

        Ok(Self { adapter, device, queue })
    }

    pub fn has_float32_filterable(&self) -> bool {
        self.device.features().contains(wgpu::Features::FLOAT32_FILTERABLE)
    }

    /// Destination format for readback: `Rgba32Float` where the adapter can
    /// render to it, `Rgba16Float` on downlevel adapters that cannot
    pub fn color_target_format(&self) -> wgpu::TextureFormat {
        let features = self.adapter.get_texture_format_features(wgpu::TextureFormat::Rgba32Float);
        if features.allowed_usages.contains(TEXTURE_USAGE_OUTPUT) {
            wgpu::TextureFormat::Rgba32Float
        } else {
            wgpu::TextureFormat::Rgba16Float
        }
    }

    pub fn create_texture(&self, label: &str, width: u32, height: u32, format: wgpu::TextureFormat, usage: wgpu::TextureUsages) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
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
            usage,
            view_formats: &[],
        })
    }

    /// Uploads a color image as an `Rgba32Float` texture
    pub fn upload_color(&self, label: &str, image: &image::Rgba32FImage) -> wgpu::Texture {
        let (width, height) = image.dimensions();
        let texture = self.create_texture(label, width, height, wgpu::TextureFormat::Rgba32Float, TEXTURE_USAGE_INPUT);
        self.write(&texture, bytemuck::cast_slice(image.as_raw()), 16);
        texture
    }

    /// Uploads raw depth samples as an `R32Float` texture
    pub fn upload_depth(&self, label: &str, width: u32, height: u32, values: &[f32]) -> Result<wgpu::Texture, HelperError> {
        let expected = (width * height) as usize;
        if values.len() != expected {
            return Err(HelperError::DataSize {
                width,
                height,
                expected,
                actual: values.len(),
            });
        }

        let texture = self.create_texture(label, width, height, wgpu::TextureFormat::R32Float, TEXTURE_USAGE_INPUT);
        self.write(&texture, bytemuck::cast_slice(values), 4);
        Ok(texture)
    }

    fn write(&self, texture: &wgpu::Texture, data: &[u8], bytes_per_pixel: u32) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texture.width() * bytes_per_pixel),
                rows_per_image: Some(texture.height()),
            },
            texture.size(),
        );
    }

    /// Reads an `Rgba32Float` or `Rgba16Float` texture back as an RGBA32F image
    pub fn read_color(&self, texture: &wgpu::Texture) -> Result<image::Rgba32FImage, HelperError> {
        let format = texture.format();
        let bytes_per_pixel = match format {
            wgpu::TextureFormat::Rgba32Float => 16,
            wgpu::TextureFormat::Rgba16Float => 8,
            _ => return Err(HelperError::UnsupportedFormat(format)),
        };
        let (width, height) = (texture.width(), texture.height());
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            texture.size(),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device.poll(wgpu::PollType::Wait)?;
        pollster::block_on(receiver.receive()).ok_or(HelperError::MapChannelClosed)??;

        let data = buffer_slice.get_mapped_range();
        let mut values = Vec::with_capacity((width * height * 4) as usize);
        for row in data.chunks(bytes_per_row as usize) {
            let row = &row[..unpadded_bytes_per_row as usize];
            match format {
                wgpu::TextureFormat::Rgba16Float => values.extend(bytemuck::cast_slice::<u8, f16>(row).iter().map(|value| value.to_f32())),
                _ => values.extend_from_slice(bytemuck::cast_slice::<u8, f32>(row)),
            }
        }
        drop(data);
        buffer.unmap();

        let expected = values.len();
        image::Rgba32FImage::from_raw(width, height, values).ok_or(HelperError::DataSize {
            width,
            height,
            expected: (width * height * 4) as usize,
            actual: expected,
        })
    }
}
