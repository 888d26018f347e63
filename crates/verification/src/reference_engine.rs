//! CPU reference engine
//!
//! Runs the depth of field pass graph on the CPU, one function per pass, so the
//! wgpu output can be checked against a straightforward per-pixel model. Texture
//! reads follow WGPU semantics: integer loads for `SampleMode::Load` and
//! footprints, bilinear clamp-to-edge sampling for filtered inputs.

use dof_wgpu::{
    DepthEncoding, DofError, DofParams, GpuContext, ImageInfo, ProgramParameters, ScratchDescriptor,
    coc::{blend, blend_factor, bokeh_radius_texels, circle_of_confusion},
    executable_pipeline::{DofStage, ExecutablePass, ScratchFormat},
};
use half::f16;
use image::{Rgba, Rgba32FImage};
use std::cell::RefCell;

/// A texture held by the reference engine
///
/// Pixels live behind a `RefCell` so passes can write through the shared
/// references the orchestrator hands out.
#[derive(Debug)]
pub struct CpuTexture {
    label: String,
    pixels: RefCell<Rgba32FImage>,
    sampled: bool,
    render_target: bool,
    depth: bool,
    /// Stores values rounded to half precision, like an `R16Float` target
    half_precision: bool,
}

impl CpuTexture {
    /// A sampled color image
    pub fn color(label: &str, image: Rgba32FImage) -> Self {
        Self {
            label: label.to_string(),
            pixels: RefCell::new(image),
            sampled: true,
            render_target: false,
            depth: false,
            half_precision: false,
        }
    }

    /// A depth image; `values` are raw samples in row-major order
    pub fn depth(label: &str, width: u32, height: u32, values: &[f32]) -> Self {
        let image = Rgba32FImage::from_fn(width, height, |x, y| {
            let value = values.get((y * width + x) as usize).copied().unwrap_or(0.0);
            Rgba([value, 0.0, 0.0, 1.0])
        });
        Self {
            depth: true,
            ..Self::color(label, image)
        }
    }

    /// A depth image holding the same raw sample everywhere
    pub fn flat_depth(label: &str, width: u32, height: u32, value: f32) -> Self {
        Self::depth(label, width, height, &vec![value; (width * height) as usize])
    }

    /// An empty render target
    pub fn render_target(label: &str, width: u32, height: u32) -> Self {
        Self {
            render_target: true,
            sampled: false,
            ..Self::color(label, Rgba32FImage::new(width, height))
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.borrow().dimensions()
    }

    /// Copies the current contents out
    pub fn to_image(&self) -> Rgba32FImage {
        self.pixels.borrow().clone()
    }

    /// Overrides the usage flags reported to the orchestrator
    pub fn with_usages(mut self, sampled: bool, render_target: bool) -> Self {
        self.sampled = sampled;
        self.render_target = render_target;
        self
    }
}

/// Parameters captured by [`GpuContext::bind_parameters`]
#[derive(Debug, Default)]
pub struct CpuProgram {
    params: DofParams,
    depth_encoding: DepthEncoding,
    kernel: Vec<[f32; 2]>,
    binds: usize,
}

impl CpuProgram {
    /// Number of parameter bindings since creation
    pub fn binds(&self) -> usize {
        self.binds
    }
}

/// Output of one pass, kept when stage capture is enabled
#[derive(Debug, Clone)]
pub struct StageCapture {
    pub stage: DofStage,
    pub image: Rgba32FImage,
}

/// [`GpuContext`] that executes passes immediately on the CPU
#[derive(Debug, Default)]
pub struct CpuContext {
    capture_stages: bool,
    captures: Vec<StageCapture>,
    /// Upper bound on the texels held by live scratch textures
    scratch_budget: Option<u64>,
    live_texels: u64,
    programs_created: usize,
    acquired: usize,
    released: usize,
}

impl CpuContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps a copy of every pass output, see [`CpuContext::captures`]
    pub fn with_stage_capture(mut self) -> Self {
        self.capture_stages = true;
        self
    }

    /// Fails scratch acquisition once live scratch textures would exceed `texels`
    pub fn with_scratch_budget(mut self, texels: u64) -> Self {
        self.scratch_budget = Some(texels);
        self
    }

    pub fn captures(&self) -> &[StageCapture] {
        &self.captures
    }

    /// Most recent output of `stage`
    pub fn capture(&self, stage: DofStage) -> Option<&Rgba32FImage> {
        self.captures.iter().rev().find(|capture| capture.stage == stage).map(|capture| &capture.image)
    }

    pub fn clear_captures(&mut self) {
        self.captures.clear();
    }

    pub fn programs_created(&self) -> usize {
        self.programs_created
    }

    pub fn acquired(&self) -> usize {
        self.acquired
    }

    pub fn released(&self) -> usize {
        self.released
    }

    /// Scratch textures acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.acquired - self.released
    }
}

impl GpuContext for CpuContext {
    type Texture = CpuTexture;
    type Program = CpuProgram;

    fn describe(&self, texture: &CpuTexture) -> ImageInfo {
        let (width, height) = texture.dimensions();
        ImageInfo {
            width,
            height,
            sampled: texture.sampled,
            render_target: texture.render_target,
            depth_readable: texture.depth,
            float_color: !texture.depth,
            sample_count: 1,
            layers: 1,
            format_name: if texture.depth { "Depth32Float" } else { "Rgba32Float" }.to_string(),
        }
    }

    fn is_same_texture(&self, a: &CpuTexture, b: &CpuTexture) -> bool {
        std::ptr::eq(a, b)
    }

    fn create_program(&mut self) -> Result<CpuProgram, DofError> {
        self.programs_created += 1;
        Ok(CpuProgram::default())
    }

    fn bind_parameters(&mut self, program: &mut CpuProgram, parameters: &ProgramParameters<'_>) {
        program.params = parameters.params;
        program.depth_encoding = parameters.depth_encoding;
        program.kernel = parameters.kernel.samples().to_vec();
        program.binds += 1;
    }

    fn acquire(&mut self, descriptor: &ScratchDescriptor, _source: &CpuTexture) -> Result<CpuTexture, DofError> {
        let texels = descriptor.width as u64 * descriptor.height as u64;
        if let Some(budget) = self.scratch_budget {
            if self.live_texels + texels > budget {
                return Err(DofError::ScratchAllocation {
                    label: descriptor.label,
                    width: descriptor.width,
                    height: descriptor.height,
                    reason: format!("scratch budget of {budget} texels exhausted"),
                });
            }
        }

        self.live_texels += texels;
        self.acquired += 1;
        tracing::debug!(label = descriptor.label, width = descriptor.width, height = descriptor.height, "acquired cpu scratch texture");

        let mut texture = CpuTexture::render_target(descriptor.label, descriptor.width, descriptor.height).with_usages(true, true);
        texture.half_precision = descriptor.format == ScratchFormat::SignedHalf;
        Ok(texture)
    }

    fn release(&mut self, texture: CpuTexture) {
        let (width, height) = texture.dimensions();
        self.live_texels = self.live_texels.saturating_sub(width as u64 * height as u64);
        self.released += 1;
    }

    fn dispatch(&mut self, program: &mut CpuProgram, pass: &'static ExecutablePass, inputs: &[&CpuTexture], output: &CpuTexture) -> Result<(), DofError> {
        let missing = |count: usize| DofError::Pass {
            stage: pass.stage,
            reason: format!("expected {count} inputs, got {}", inputs.len()),
        };
        let (width, height) = output.dimensions();

        let mut result = match pass.stage {
            DofStage::CircleOfConfusion => {
                let [depth] = inputs else { return Err(missing(1)) };
                circle_of_confusion_pass(&depth.pixels.borrow(), program, width, height)
            }
            DofStage::PreFilter => {
                let [source] = inputs else { return Err(missing(1)) };
                pre_filter_pass(&source.pixels.borrow(), width, height)
            }
            DofStage::Bokeh => {
                let [work, coc] = inputs else { return Err(missing(2)) };
                bokeh_pass(&work.pixels.borrow(), &coc.pixels.borrow(), program, width, height)
            }
            DofStage::PostFilter => {
                let [bokeh] = inputs else { return Err(missing(1)) };
                post_filter_pass(&bokeh.pixels.borrow(), width, height)
            }
            DofStage::Combine => {
                let [source, coc, blurred] = inputs else { return Err(missing(3)) };
                combine_pass(&source.pixels.borrow(), &coc.pixels.borrow(), &blurred.pixels.borrow(), width, height)
            }
        };

        if output.half_precision {
            for pixel in result.pixels_mut() {
                for channel in pixel.0.iter_mut() {
                    *channel = f16::from_f32(*channel).to_f32();
                }
            }
        }

        tracing::trace!(pass = pass.name, output = output.label(), "executed pass on cpu");
        if self.capture_stages {
            self.captures.push(StageCapture {
                stage: pass.stage,
                image: result.clone(),
            });
        }

        let mut target = output.pixels.try_borrow_mut().map_err(|_| DofError::Pass {
            stage: pass.stage,
            reason: format!("{} is also bound as an input", output.label()),
        })?;
        *target = result;
        Ok(())
    }
}

fn load(image: &Rgba32FImage, x: i64, y: i64) -> [f32; 4] {
    let (width, height) = image.dimensions();
    let x = x.clamp(0, width as i64 - 1) as u32;
    let y = y.clamp(0, height as i64 - 1) as u32;
    image.get_pixel(x, y).0
}

/// Bilinear clamp-to-edge sample at normalized coordinates
pub fn sample_bilinear(image: &Rgba32FImage, uv: [f32; 2]) -> [f32; 4] {
    let (width, height) = image.dimensions();
    let px = uv[0] * width as f32 - 0.5;
    let py = uv[1] * height as f32 - 0.5;
    let (x0, y0) = (px.floor(), py.floor());
    let (fx, fy) = (px - x0, py - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let p00 = load(image, x0, y0);
    let p10 = load(image, x0 + 1, y0);
    let p01 = load(image, x0, y0 + 1);
    let p11 = load(image, x0 + 1, y0 + 1);

    std::array::from_fn(|i| {
        let top = p00[i] + (p10[i] - p00[i]) * fx;
        let bottom = p01[i] + (p11[i] - p01[i]) * fx;
        top + (bottom - top) * fy
    })
}

/// Normalized coordinates of the center of texel `(x, y)` in a `width`x`height` target
fn texel_center(x: u32, y: u32, width: u32, height: u32) -> [f32; 2] {
    [(x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32]
}

fn circle_of_confusion_pass(depth: &Rgba32FImage, program: &CpuProgram, width: u32, height: u32) -> Rgba32FImage {
    Rgba32FImage::from_fn(width, height, |x, y| {
        let distance = program.depth_encoding.linearize(load(depth, x as i64, y as i64)[0]);
        Rgba([circle_of_confusion(distance, &program.params), 0.0, 0.0, 1.0])
    })
}

fn pre_filter_pass(source: &Rgba32FImage, width: u32, height: u32) -> Rgba32FImage {
    Rgba32FImage::from_fn(width, height, |x, y| {
        let (bx, by) = (2 * x as i64, 2 * y as i64);
        let taps = [load(source, bx, by), load(source, bx + 1, by), load(source, bx, by + 1), load(source, bx + 1, by + 1)];
        Rgba(std::array::from_fn(|i| taps.iter().map(|tap| tap[i]).sum::<f32>() * 0.25))
    })
}

/// Largest-magnitude CoC of the 2x2 full resolution block under a half resolution texel
fn footprint_coc(coc: &Rgba32FImage, x: u32, y: u32) -> f32 {
    let (bx, by) = (2 * x as i64, 2 * y as i64);
    [(0, 0), (1, 0), (0, 1), (1, 1)]
        .into_iter()
        .map(|(dx, dy)| load(coc, bx + dx, by + dy)[0])
        .fold(0.0f32, |largest, value| if value.abs() > largest.abs() { value } else { largest })
}

fn bokeh_pass(work: &Rgba32FImage, coc: &Rgba32FImage, program: &CpuProgram, width: u32, height: u32) -> Rgba32FImage {
    let size = [width as f32, height as f32];
    let count = program.kernel.len().max(1) as f32;

    Rgba32FImage::from_fn(width, height, |x, y| {
        let uv = texel_center(x, y, width, height);
        let radius = bokeh_radius_texels(footprint_coc(coc, x, y), &program.params);

        let mut color = [0.0f32; 3];
        for offset in &program.kernel {
            let sample = sample_bilinear(work, [uv[0] + offset[0] * radius / size[0], uv[1] + offset[1] * radius / size[1]]);
            for i in 0..3 {
                color[i] += sample[i];
            }
        }

        let alpha = load(work, x as i64, y as i64)[3];
        Rgba([color[0] / count, color[1] / count, color[2] / count, alpha])
    })
}

fn post_filter_pass(bokeh: &Rgba32FImage, width: u32, height: u32) -> Rgba32FImage {
    let offset = [0.5 / width as f32, 0.5 / height as f32];

    Rgba32FImage::from_fn(width, height, |x, y| {
        let uv = texel_center(x, y, width, height);
        let taps = [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)].map(|(sx, sy)| sample_bilinear(bokeh, [uv[0] + sx * offset[0], uv[1] + sy * offset[1]]));
        Rgba(std::array::from_fn(|i| taps.iter().map(|tap| tap[i]).sum::<f32>() * 0.25))
    })
}

fn combine_pass(source: &Rgba32FImage, coc: &Rgba32FImage, blurred: &Rgba32FImage, width: u32, height: u32) -> Rgba32FImage {
    Rgba32FImage::from_fn(width, height, |x, y| {
        let sharp = load(source, x as i64, y as i64);
        let factor = blend_factor(load(coc, x as i64, y as i64)[0]);
        let soft = sample_bilinear(blurred, texel_center(x, y, width, height));
        Rgba([blend(sharp[0], soft[0], factor), blend(sharp[1], soft[1], factor), blend(sharp[2], soft[2], factor), sharp[3]])
    })
}
