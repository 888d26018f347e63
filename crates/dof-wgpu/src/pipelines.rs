//! The depth of field pass graph
//!
//! CircleOfConfusion → PreFilter → Bokeh → PostFilter → Combine. The two half
//! resolution work buffers ping-pong between PreFilter, Bokeh and PostFilter.

use crate::executable_pipeline::*;

const COC_SHADER: &str = include_str!("../wgsl/coc.wgsl");
const PRE_FILTER_SHADER: &str = include_str!("../wgsl/pre_filter.wgsl");
const BOKEH_SHADER: &str = include_str!("../wgsl/bokeh.wgsl");
const POST_FILTER_SHADER: &str = include_str!("../wgsl/post_filter.wgsl");
const COMBINE_SHADER: &str = include_str!("../wgsl/combine.wgsl");

pub const DEPTH_OF_FIELD: ExecutablePipeline = ExecutablePipeline {
    name: "Depth of Field",
    scratch_textures: &[
        ScratchTexture {
            slot: TextureSlot::CircleOfConfusion,
            label: "DoF CoC",
            scale_factor: (ScaleFactor::FULL, ScaleFactor::FULL),
            depth_bits: 0,
            format: ScratchFormat::SignedHalf,
            color_space: ColorSpace::Linear,
        },
        ScratchTexture {
            slot: TextureSlot::Work0,
            label: "DoF Work 0",
            scale_factor: (ScaleFactor::HALF, ScaleFactor::HALF),
            depth_bits: 0,
            format: ScratchFormat::MatchSource,
            color_space: ColorSpace::Default,
        },
        ScratchTexture {
            slot: TextureSlot::Work1,
            label: "DoF Work 1",
            scale_factor: (ScaleFactor::HALF, ScaleFactor::HALF),
            depth_bits: 0,
            format: ScratchFormat::MatchSource,
            color_space: ColorSpace::Default,
        },
    ],
    samplers: &[SamplerFilterMode::Linear],
    passes: &[
        ExecutablePass {
            name: "DoF CircleOfConfusion",
            stage: DofStage::CircleOfConfusion,
            shader: COC_SHADER,
            input_textures: &[InputTextureBinding {
                binding: 1,
                slot: TextureSlot::Depth,
                sample_mode: SampleMode::Load,
            }],
            output_texture: TextureSlot::CircleOfConfusion,
            samplers: &[],
            kernel_binding: None,
        },
        ExecutablePass {
            name: "DoF PreFilter",
            stage: DofStage::PreFilter,
            shader: PRE_FILTER_SHADER,
            input_textures: &[InputTextureBinding {
                binding: 1,
                slot: TextureSlot::Source,
                sample_mode: SampleMode::Footprint2x2,
            }],
            output_texture: TextureSlot::Work0,
            samplers: &[],
            kernel_binding: None,
        },
        ExecutablePass {
            name: "DoF Bokeh",
            stage: DofStage::Bokeh,
            shader: BOKEH_SHADER,
            input_textures: &[
                InputTextureBinding {
                    binding: 1,
                    slot: TextureSlot::Work0,
                    sample_mode: SampleMode::Filtered(SamplerFilterMode::Linear),
                },
                InputTextureBinding {
                    binding: 2,
                    slot: TextureSlot::CircleOfConfusion,
                    sample_mode: SampleMode::Footprint2x2,
                },
            ],
            output_texture: TextureSlot::Work1,
            samplers: &[SamplerBinding {
                binding: 3,
                filter_mode: SamplerFilterMode::Linear,
            }],
            kernel_binding: Some(4),
        },
        ExecutablePass {
            name: "DoF PostFilter",
            stage: DofStage::PostFilter,
            shader: POST_FILTER_SHADER,
            input_textures: &[InputTextureBinding {
                binding: 1,
                slot: TextureSlot::Work1,
                sample_mode: SampleMode::Filtered(SamplerFilterMode::Linear),
            }],
            output_texture: TextureSlot::Work0,
            samplers: &[SamplerBinding {
                binding: 2,
                filter_mode: SamplerFilterMode::Linear,
            }],
            kernel_binding: None,
        },
        ExecutablePass {
            name: "DoF Combine",
            stage: DofStage::Combine,
            shader: COMBINE_SHADER,
            input_textures: &[
                InputTextureBinding {
                    binding: 1,
                    slot: TextureSlot::Source,
                    sample_mode: SampleMode::Load,
                },
                InputTextureBinding {
                    binding: 2,
                    slot: TextureSlot::CircleOfConfusion,
                    sample_mode: SampleMode::Load,
                },
                InputTextureBinding {
                    binding: 3,
                    slot: TextureSlot::Work0,
                    sample_mode: SampleMode::Filtered(SamplerFilterMode::Linear),
                },
            ],
            output_texture: TextureSlot::Destination,
            samplers: &[SamplerBinding {
                binding: 4,
                filter_mode: SamplerFilterMode::Linear,
            }],
            kernel_binding: None,
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stage_order() {
        let stages: Vec<_> = DEPTH_OF_FIELD.passes.iter().map(|pass| pass.stage).collect();
        assert_eq!(stages, DofStage::ALL);
    }

    #[test]
    fn test_every_slot_is_backed() {
        for pass in DEPTH_OF_FIELD.passes {
            for input in pass.input_textures {
                assert!(DEPTH_OF_FIELD.scale_factor(input.slot).is_some(), "{}: {:?} has no backing texture", pass.name, input.slot);
            }
            assert!(DEPTH_OF_FIELD.scale_factor(pass.output_texture).is_some());
        }
    }

    #[test]
    fn test_inputs_are_written_before_read() {
        let mut written: HashSet<TextureSlot> = [TextureSlot::Source, TextureSlot::Depth].into_iter().collect();
        for pass in DEPTH_OF_FIELD.passes {
            for input in pass.input_textures {
                assert!(written.contains(&input.slot), "{} reads {:?} before any pass wrote it", pass.name, input.slot);
            }
            written.insert(pass.output_texture);
        }
    }

    #[test]
    fn test_no_pass_reads_its_output() {
        for pass in DEPTH_OF_FIELD.passes {
            assert!(pass.input_textures.iter().all(|input| input.slot != pass.output_texture), "{} reads and writes the same texture", pass.name);
        }
    }

    #[test]
    fn test_frame_inputs_are_never_written() {
        for pass in DEPTH_OF_FIELD.passes {
            assert_ne!(pass.output_texture, TextureSlot::Source);
            assert_ne!(pass.output_texture, TextureSlot::Depth);
        }
        let destination_writers: Vec<_> = DEPTH_OF_FIELD.passes.iter().filter(|pass| pass.output_texture == TextureSlot::Destination).collect();
        assert_eq!(destination_writers.len(), 1);
        assert_eq!(destination_writers[0].stage, DofStage::Combine);
        assert!(DEPTH_OF_FIELD.passes.iter().all(|pass| pass.input_textures.iter().all(|input| input.slot != TextureSlot::Destination)));
    }

    #[test]
    fn test_sample_modes_match_resolutions() {
        for pass in DEPTH_OF_FIELD.passes {
            let (out_x, out_y) = DEPTH_OF_FIELD.scale_factor(pass.output_texture).unwrap();
            for input in pass.input_textures {
                let (in_x, in_y) = DEPTH_OF_FIELD.scale_factor(input.slot).unwrap();
                match input.sample_mode {
                    SampleMode::Load => assert_eq!((in_x, in_y), (out_x, out_y), "{}: loads need matching resolution", pass.name),
                    SampleMode::Footprint2x2 => {
                        // Input texel size is half the output texel size
                        assert_eq!(in_x.numerator * out_x.denominator, 2 * out_x.numerator * in_x.denominator, "{}", pass.name);
                        assert_eq!(in_y.numerator * out_y.denominator, 2 * out_y.numerator * in_y.denominator, "{}", pass.name);
                    }
                    SampleMode::Filtered(filter_mode) => {
                        assert!(DEPTH_OF_FIELD.samplers.contains(&filter_mode));
                        assert!(pass.samplers.iter().any(|sampler| sampler.filter_mode == filter_mode), "{} has no {filter_mode:?} sampler", pass.name);
                    }
                }
            }
        }
    }

    #[test]
    fn test_resolutions() {
        let expected = [
            (DofStage::CircleOfConfusion, ScaleFactor::FULL),
            (DofStage::PreFilter, ScaleFactor::HALF),
            (DofStage::Bokeh, ScaleFactor::HALF),
            (DofStage::PostFilter, ScaleFactor::HALF),
            (DofStage::Combine, ScaleFactor::FULL),
        ];
        for (stage, scale) in expected {
            let pass = DEPTH_OF_FIELD.pass(stage).unwrap();
            assert_eq!(DEPTH_OF_FIELD.scale_factor(pass.output_texture), Some((scale, scale)), "{stage}");
        }
    }

    #[test]
    fn test_bindings_are_unique_per_pass() {
        for pass in DEPTH_OF_FIELD.passes {
            let mut bindings = vec![UNIFORM_BINDING];
            bindings.extend(pass.input_textures.iter().map(|input| input.binding));
            bindings.extend(pass.samplers.iter().map(|sampler| sampler.binding));
            bindings.extend(pass.kernel_binding);
            let unique: HashSet<_> = bindings.iter().copied().collect();
            assert_eq!(unique.len(), bindings.len(), "{} has duplicate bindings", pass.name);
        }
    }

    #[test]
    fn test_scale_factor_apply() {
        assert_eq!(ScaleFactor::HALF.apply(1920), 960);
        assert_eq!(ScaleFactor::HALF.apply(1081), 540);
        assert_eq!(ScaleFactor::FULL.apply(7), 7);
    }

    #[test]
    fn test_half_resolution_footprint_stays_in_bounds() {
        for size in 2..64u32 {
            let half = ScaleFactor::HALF.apply(size);
            // The last half-resolution texel reads full-resolution texels 2h-2 and 2h-1
            assert!(2 * half - 1 < size);
        }
    }
}
