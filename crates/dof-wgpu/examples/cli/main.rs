//! Depth of field CLI
//!
//! Applies depth of field to an image, reading scene depth from a second
//! grayscale image of the same size.
//!
//! # Usage
//! ```bash
//! dof-cli color.png depth.png output.png --focus-distance 12 --focus-range 4 --bokeh-radius 6 --quality large
//! ```
//!
//! By default the depth image's luminance is mapped linearly from `--near` (black)
//! to `--far` (white). With `--perspective`, luminance is treated as raw `[0, 1]`
//! device depth of a projection with those planes instead.

use clap::Parser;
use dof_wgpu::{BokehQuality, DepthEncoding, DofParams, DofRenderer, FrameImages};
use image::GenericImageView;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "CLI tool for applying depth of field to an image")]
struct Args {
    /// Color image file path
    input: PathBuf,

    /// Depth image file path, grayscale
    depth: PathBuf,

    /// Output image file path
    output: PathBuf,

    /// Distance of the focus plane
    #[arg(long, default_value_t = 10.0)]
    focus_distance: f32,

    /// Depth extent around the focus plane that stays sharp
    #[arg(long, default_value_t = 3.0)]
    focus_range: f32,

    /// Maximum blur radius in half resolution texels
    #[arg(long, default_value_t = 4.0)]
    bokeh_radius: f32,

    /// Bokeh kernel size (small, medium, large)
    #[arg(long, short, default_value = "medium")]
    quality: BokehQuality,

    /// Distance encoded by a black depth pixel
    #[arg(long, default_value_t = 0.1)]
    near: f32,

    /// Distance encoded by a white depth pixel
    #[arg(long, default_value_t = 100.0)]
    far: f32,

    /// Treat depth pixels as perspective device depth between `near` and `far`
    #[arg(long)]
    perspective: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let params = DofParams::try_new(args.focus_distance, args.focus_range, args.bokeh_radius)?;
    let (depth_encoding, map_depth): (DepthEncoding, Box<dyn Fn(f32) -> f32>) = if args.perspective {
        (DepthEncoding::Perspective { near: args.near, far: args.far }, Box::new(|luma| luma))
    } else {
        let (near, far) = (args.near, args.far);
        (DepthEncoding::Linear, Box::new(move |luma| near + luma * (far - near)))
    };
    depth_encoding.validate()?;

    println!("Loading image from: {}", args.input.display());
    let color_image = image::open(&args.input)?;
    let depth_image = image::open(&args.depth)?;
    let (width, height) = color_image.dimensions();
    if depth_image.dimensions() != (width, height) {
        return Err(format!("depth image is {:?}, color image is {:?}", depth_image.dimensions(), (width, height)).into());
    }
    println!("Input image: {width}x{height}");

    println!("Initializing GPU...");
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: None,
        required_features: wgpu::Features::FLOAT32_FILTERABLE,
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))?;

    let color = color_image.to_rgba32f();
    let source = create_texture(&device, "Source", width, height, wgpu::TextureFormat::Rgba32Float, wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST);
    upload(&queue, &source, bytemuck::cast_slice(color.as_raw()), 16);

    let depth_values: Vec<f32> = depth_image.to_luma32f().as_raw().iter().map(|&luma| map_depth(luma)).collect();
    let depth = create_texture(&device, "Depth", width, height, wgpu::TextureFormat::R32Float, wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST);
    upload(&queue, &depth, bytemuck::cast_slice(&depth_values), 4);

    let destination = create_texture(&device, "Destination", width, height, wgpu::TextureFormat::Rgba32Float, wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC);

    let mut renderer = DofRenderer::new(params);
    renderer.set_quality(args.quality);

    println!("Rendering depth of field ({} kernel)...", args.quality.name());
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Depth of Field") });
    renderer.render(&device, &queue, &mut encoder, &FrameImages::new(&source, &depth, &destination, depth_encoding))?;
    queue.submit(std::iter::once(encoder.finish()));
    device.poll(wgpu::PollType::Wait)?;

    println!("Saving result to: {}", args.output.display());
    let pixels = read_texture(&device, &queue, &destination)?;
    let output = image::Rgba32FImage::from_raw(width, height, pixels).ok_or("Failed to create RGBA32F image from data")?;
    image::DynamicImage::ImageRgba32F(output).to_rgba8().save(&args.output)?;

    println!("Done");
    Ok(())
}

fn create_texture(device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat, usage: wgpu::TextureUsages) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
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

fn upload(queue: &wgpu::Queue, texture: &wgpu::Texture, data: &[u8], bytes_per_pixel: u32) {
    queue.write_texture(
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

/// Reads back an `Rgba32Float` texture, dropping row padding
fn read_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let (width, height) = (texture.width(), texture.height());
    let unpadded_bytes_per_row = width * 16;
    let bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Output Buffer"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Copy Encoder") });
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
    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });
    device.poll(wgpu::PollType::Wait)?;
    pollster::block_on(receiver.receive()).ok_or("Failed to map buffer for reading")??;

    let data = buffer_slice.get_mapped_range();
    let pixels = data
        .chunks(bytes_per_row as usize)
        .flat_map(|row| bytemuck::cast_slice::<u8, f32>(&row[..unpadded_bytes_per_row as usize]).to_vec())
        .collect();
    Ok(pixels)
}
