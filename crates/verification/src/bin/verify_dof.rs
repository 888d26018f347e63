//! Depth of field verification binary
//!
//! Renders an image through the wgpu implementation and through the CPU
//! reference engine, then compares the two outputs.

use clap::Parser;
use dof_wgpu::{BokehQuality, DepthEncoding, DepthOfField, DofParams, DofRenderer, FrameImages, executable_pipeline::DofStage};
use dof_wgpu_verification::{
    compare::{CompareResult, compare_images},
    reference_engine::{CpuContext, CpuProgram, CpuTexture},
    wgpu_helpers::{GpuHarness, TEXTURE_USAGE_OUTPUT},
};
use image::GenericImageView;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Compares wgpu depth of field output against the CPU reference engine")]
struct Args {
    /// Color image file path
    input: PathBuf,

    /// Grayscale depth image, mapped linearly from `near` to `far`; a horizontal ramp is used when omitted
    #[arg(long)]
    depth: Option<PathBuf>,

    #[arg(long, default_value_t = 10.0)]
    focus_distance: f32,

    #[arg(long, default_value_t = 3.0)]
    focus_range: f32,

    #[arg(long, default_value_t = 4.0)]
    bokeh_radius: f32,

    /// Bokeh kernel size (small, medium, large)
    #[arg(long, short, default_value = "medium")]
    quality: BokehQuality,

    #[arg(long, default_value_t = 0.1)]
    near: f32,

    #[arg(long, default_value_t = 30.0)]
    far: f32,

    /// Largest accepted per-channel difference
    #[arg(long, short, default_value_t = 0.02)]
    tolerance: f32,

    /// Directory to write every reference stage and both outputs to
    #[arg(long)]
    dump_stages: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let params = DofParams::try_new(args.focus_distance, args.focus_range, args.bokeh_radius)?;

    let input_image = image::open(&args.input).map_err(|e| format!("Failed to open input image: {e}"))?;
    let (width, height) = input_image.dimensions();
    let color = input_image.to_rgba32f();

    let depth_values: Vec<f32> = match &args.depth {
        Some(path) => {
            let depth_image = image::open(path).map_err(|e| format!("Failed to open depth image: {e}"))?;
            if depth_image.dimensions() != (width, height) {
                return Err(format!("depth image is {:?}, color image is {:?}", depth_image.dimensions(), (width, height)).into());
            }
            depth_image.to_luma32f().as_raw().iter().map(|&luma| args.near + luma * (args.far - args.near)).collect()
        }
        None => (0..height)
            .flat_map(|_| (0..width).map(|x| args.near + (args.far - args.near) * x as f32 / (width - 1).max(1) as f32))
            .collect(),
    };

    // CPU reference
    let started = Instant::now();
    let mut cpu = CpuContext::new().with_stage_capture();
    let cpu_source = CpuTexture::color("source", color.clone());
    let cpu_depth = CpuTexture::depth("depth", width, height, &depth_values);
    let cpu_destination = CpuTexture::render_target("destination", width, height);
    let mut reference_effect = DepthOfField::<CpuProgram>::new(params);
    reference_effect.set_quality(args.quality);
    reference_effect.render(&mut cpu, &FrameImages::new(&cpu_source, &cpu_depth, &cpu_destination, DepthEncoding::Linear))?;
    let reference = cpu_destination.to_image();
    let cpu_duration = started.elapsed();

    // wgpu
    let harness = GpuHarness::new().await?;
    if !harness.has_float32_filterable() {
        println!("Adapter lacks FLOAT32_FILTERABLE, work buffers fall back to Rgba16Float");
    }
    let destination_format = harness.color_target_format();
    if destination_format != wgpu::TextureFormat::Rgba32Float {
        println!("Adapter cannot render to Rgba32Float, reading back {destination_format:?}");
    }
    let started = Instant::now();
    let source = harness.upload_color("Source", &color);
    let depth = harness.upload_depth("Depth", width, height, &depth_values)?;
    let destination = harness.create_texture("Destination", width, height, destination_format, TEXTURE_USAGE_OUTPUT);

    let mut renderer = DofRenderer::new(params);
    renderer.set_quality(args.quality);
    let mut encoder = harness.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Depth of Field") });
    renderer.render(&harness.device, &harness.queue, &mut encoder, &FrameImages::new(&source, &depth, &destination, DepthEncoding::Linear))?;
    harness.queue.submit(std::iter::once(encoder.finish()));
    let actual = harness.read_color(&destination)?;
    let gpu_duration = started.elapsed();

    if let Some(directory) = &args.dump_stages {
        std::fs::create_dir_all(directory)?;
        for stage in DofStage::ALL {
            if let Some(image) = cpu.capture(stage) {
                let mut image = image.clone();
                if stage == DofStage::CircleOfConfusion {
                    // Near in red, far in green
                    for pixel in image.pixels_mut() {
                        let coc = pixel[0];
                        pixel.0 = [(-coc).max(0.0), coc.max(0.0), 0.0, 1.0];
                    }
                }
                image::DynamicImage::ImageRgba32F(image).to_rgba8().save(directory.join(format!("{}.png", stage.name())))?;
            }
        }
        image::DynamicImage::ImageRgba32F(reference.clone()).to_rgba8().save(directory.join("reference.png"))?;
        image::DynamicImage::ImageRgba32F(actual.clone()).to_rgba8().save(directory.join("wgpu.png"))?;
    }

    match compare_images(&reference, &actual, args.tolerance) {
        CompareResult::Match { max_error } => {
            println!("✓ Outputs match (max error {max_error:?}, CPU: {cpu_duration:.2?}, wgpu: {gpu_duration:.2?})");
            Ok(())
        }
        CompareResult::DimensionMismatch {
            reference_dimensions,
            actual_dimensions,
        } => Err(format!("✗ Dimension mismatch: reference {reference_dimensions:?}, wgpu {actual_dimensions:?}").into()),
        CompareResult::PixelMismatch {
            max_error,
            mismatched_pixels,
            first_mismatch,
        } => Err(format!("✗ {mismatched_pixels} pixels differ beyond {}, first at {first_mismatch:?}, max error {max_error:?}", args.tolerance).into()),
    }
}
