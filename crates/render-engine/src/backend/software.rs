//! CPU rasterizer with one kernel per built-in program.
//!
//! Kernels mirror the registry WGSL with nearest-texel sampling at texel
//! centers, so results are deterministic and pass-through is bit-exact.

use std::collections::HashMap;

use reelfx_effect_model::{ShaderProgram, VideoFrame};

use super::{DrawPass, GpuBackend, PassInput, PassUniforms, ProgramId, TargetId};
use crate::error::{GpuError, GpuResult};

/// Draw records kept before the oldest half is dropped.
pub const DRAW_LOG_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    PassThrough,
    Grayscale,
    Invert,
    Sepia,
    BrightnessContrast,
    Blur,
    Pixelate,
    Vignette,
    ChromaticAberration,
    Wave,
    Tint,
}

impl Kernel {
    fn for_entry(entry: &str) -> Option<Self> {
        Some(match entry {
            "pass-through" => Self::PassThrough,
            "grayscale" => Self::Grayscale,
            "invert" => Self::Invert,
            "sepia" => Self::Sepia,
            "brightness-contrast" => Self::BrightnessContrast,
            "blur" => Self::Blur,
            "pixelate" => Self::Pixelate,
            "vignette" => Self::Vignette,
            "chromatic-aberration" => Self::ChromaticAberration,
            "wave" => Self::Wave,
            "tint" => Self::Tint,
            _ => return None,
        })
    }
}

/// A recorded draw call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub entry: &'static str,
    pub input: PassInput,
    pub output: TargetId,
    pub uniforms: PassUniforms,
}

/// Deterministic CPU backend.
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    targets: HashMap<TargetId, VideoFrame>,
    source: Option<VideoFrame>,
    programs: Vec<(&'static str, Kernel)>,
    next_target: u64,
    draws: Vec<DrawRecord>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent draw calls, oldest first. Holds at most [`DRAW_LOG_CAP`].
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn target_size(&self, target: TargetId) -> Option<(u32, u32)> {
        self.targets.get(&target).map(VideoFrame::dimensions)
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn create_target(&mut self, width: u32, height: u32) -> GpuResult<TargetId> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        self.next_target += 1;
        let id = TargetId(self.next_target);
        self.targets.insert(id, VideoFrame::new(width, height));
        Ok(id)
    }

    fn resize_target(&mut self, target: TargetId, width: u32, height: u32) -> GpuResult<()> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        let slot = self
            .targets
            .get_mut(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        if slot.dimensions() != (width, height) {
            *slot = VideoFrame::new(width, height);
        }
        Ok(())
    }

    fn release_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
    }

    fn upload_source(&mut self, frame: &VideoFrame) -> GpuResult<()> {
        if frame.width == 0 || frame.height == 0 {
            return Err(GpuError::InvalidSize {
                width: frame.width,
                height: frame.height,
            });
        }
        self.source = Some(frame.clone());
        Ok(())
    }

    fn compile_program(&mut self, program: &ShaderProgram) -> GpuResult<ProgramId> {
        let kernel = Kernel::for_entry(program.entry).ok_or_else(|| GpuError::Compile {
            entry: program.entry.to_string(),
            message: "no software kernel for this program".to_string(),
        })?;
        self.programs.push((program.entry, kernel));
        Ok(ProgramId(self.programs.len() as u64 - 1))
    }

    fn draw(&mut self, pass: &DrawPass) -> GpuResult<()> {
        let (entry, kernel) = *self
            .programs
            .get(pass.program.0 as usize)
            .ok_or(GpuError::UnknownProgram(pass.program.0))?;

        if pass.input == PassInput::Target(pass.output) {
            return Err(GpuError::Feedback);
        }
        let mut output = self
            .targets
            .remove(&pass.output)
            .ok_or(GpuError::UnknownTarget(pass.output))?;

        let input = match pass.input {
            PassInput::Source => self.source.as_ref().ok_or(GpuError::NoSource),
            PassInput::Target(id) => self.targets.get(&id).ok_or(GpuError::UnknownTarget(id)),
        };
        let result = input.map(|input| shade(kernel, input, &mut output, &pass.uniforms));
        self.targets.insert(pass.output, output);
        result?;

        if self.draws.len() >= DRAW_LOG_CAP {
            self.draws.drain(..DRAW_LOG_CAP / 2);
        }
        self.draws.push(DrawRecord {
            entry,
            input: pass.input,
            output: pass.output,
            uniforms: pass.uniforms,
        });
        Ok(())
    }

    fn read_target(&mut self, target: TargetId) -> GpuResult<VideoFrame> {
        self.targets
            .get(&target)
            .cloned()
            .ok_or(GpuError::UnknownTarget(target))
    }

    fn target_count(&self) -> usize {
        self.targets.len()
    }
}

type Rgba = [f32; 4];

struct Sampler<'a> {
    texture: &'a VideoFrame,
    rect: [f32; 4],
}

impl Sampler<'_> {
    /// Nearest texel, clamp-to-edge, through the crop rect.
    fn sample(&self, uv: [f32; 2]) -> Rgba {
        let u = (self.rect[0] + uv[0] * self.rect[2]).clamp(0.0, 1.0);
        let v = (self.rect[1] + uv[1] * self.rect[3]).clamp(0.0, 1.0);
        let w = self.texture.width;
        let h = self.texture.height;
        let x = ((u * w as f32).floor() as u32).min(w - 1);
        let y = ((v * h as f32).floor() as u32).min(h - 1);
        let p = self.texture.pixel(x, y);
        [
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ]
    }
}

fn quantize(c: Rgba) -> [u8; 4] {
    c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn mix_rgb(c: Rgba, target: [f32; 3], t: f32) -> Rgba {
    [
        mix(c[0], target[0], t),
        mix(c[1], target[1], t),
        mix(c[2], target[2], t),
        c[3],
    ]
}

fn luma(c: [f32; 3]) -> f32 {
    c[0] * 0.299 + c[1] * 0.587 + c[2] * 0.114
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn shade(kernel: Kernel, input: &VideoFrame, output: &mut VideoFrame, u: &PassUniforms) {
    let sampler = Sampler {
        texture: input,
        rect: u.src_rect,
    };
    let (w, h) = output.dimensions();
    let res = [w as f32, h as f32];

    for y in 0..h {
        for x in 0..w {
            let uv = [(x as f32 + 0.5) / res[0], (y as f32 + 0.5) / res[1]];
            let color = shade_pixel(kernel, &sampler, uv, res, u);
            output.set_pixel(x, y, quantize(color));
        }
    }
}

fn shade_pixel(
    kernel: Kernel,
    s: &Sampler<'_>,
    uv: [f32; 2],
    res: [f32; 2],
    u: &PassUniforms,
) -> Rgba {
    match kernel {
        Kernel::PassThrough => s.sample(uv),
        Kernel::Grayscale => {
            let c = s.sample(uv);
            let l = luma([c[0], c[1], c[2]]);
            mix_rgb(c, [l, l, l], u.param(0))
        }
        Kernel::Invert => {
            let c = s.sample(uv);
            mix_rgb(c, [1.0 - c[0], 1.0 - c[1], 1.0 - c[2]], u.param(0))
        }
        Kernel::Sepia => {
            let c = s.sample(uv);
            let toned = [
                (c[0] * 0.393 + c[1] * 0.769 + c[2] * 0.189).clamp(0.0, 1.0),
                (c[0] * 0.349 + c[1] * 0.686 + c[2] * 0.168).clamp(0.0, 1.0),
                (c[0] * 0.272 + c[1] * 0.534 + c[2] * 0.131).clamp(0.0, 1.0),
            ];
            mix_rgb(c, toned, u.param(0))
        }
        Kernel::BrightnessContrast => {
            let c = s.sample(uv);
            let (brightness, contrast) = (u.param(0), u.param(1));
            let adjust = |v: f32| ((v - 0.5) * contrast + 0.5 + brightness).clamp(0.0, 1.0);
            [adjust(c[0]), adjust(c[1]), adjust(c[2]), c[3]]
        }
        Kernel::Blur => {
            let center = s.sample(uv);
            let r = u.param(0).round() as i32;
            if r <= 0 {
                return center;
            }
            let mut acc = [0.0f32; 3];
            for dy in -r..=r {
                for dx in -r..=r {
                    let c = s.sample([uv[0] + dx as f32 / res[0], uv[1] + dy as f32 / res[1]]);
                    acc[0] += c[0];
                    acc[1] += c[1];
                    acc[2] += c[2];
                }
            }
            let n = ((2 * r + 1) * (2 * r + 1)) as f32;
            [acc[0] / n, acc[1] / n, acc[2] / n, center[3]]
        }
        Kernel::Pixelate => {
            let block = u.param(0).round().max(1.0);
            let snap = |t: f32, extent: f32| {
                let px = (t * extent / block).floor() * block + block * 0.5;
                px.min(extent - 0.5) / extent
            };
            s.sample([snap(uv[0], res[0]), snap(uv[1], res[1])])
        }
        Kernel::Vignette => {
            let c = s.sample(uv);
            let (strength, radius) = (u.param(0), u.param(1));
            let dist = ((uv[0] - 0.5).powi(2) + (uv[1] - 0.5).powi(2)).sqrt()
                * std::f32::consts::SQRT_2;
            let shade = 1.0 - strength * smoothstep(radius * 0.5, radius, dist);
            [c[0] * shade, c[1] * shade, c[2] * shade, c[3]]
        }
        Kernel::ChromaticAberration => {
            let shift = u.param(0) / res[0];
            let c = s.sample(uv);
            let r = s.sample([uv[0] + shift, uv[1]])[0];
            let b = s.sample([uv[0] - shift, uv[1]])[2];
            [r, c[1], b, c[3]]
        }
        Kernel::Wave => {
            let (amplitude, frequency, speed) = (u.param(0), u.param(1), u.param(2));
            let phase = uv[1] * frequency + u.time * speed;
            let x = (uv[0] + amplitude * phase.sin()).clamp(0.0, 1.0);
            s.sample([x, uv[1]])
        }
        Kernel::Tint => {
            let c = s.sample(uv);
            let tint = u.param_vec3(0);
            let mut tinted = [c[0] * tint[0], c[1] * tint[1], c[2] * tint[2]];
            if u.param(2) > 0.5 {
                let tl = luma(tinted);
                if tl > 0.0 {
                    let k = luma([c[0], c[1], c[2]]) / tl;
                    tinted = tinted.map(|v| (v * k).clamp(0.0, 1.0));
                }
            }
            mix_rgb(c, tinted, u.param(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelfx_effect_model::registry;

    fn gradient(w: u32, h: u32) -> VideoFrame {
        let mut frame = VideoFrame::new(w, h);
        for y in 0..h {
            for x in 0..w {
                frame.set_pixel(x, y, [(x * 37 % 256) as u8, (y * 53 % 256) as u8, 128, 255]);
            }
        }
        frame
    }

    fn run(entry: &str, params: &[f32], frame: &VideoFrame) -> VideoFrame {
        let mut backend = SoftwareBackend::new();
        let program = ShaderProgram {
            entry: registry::find(entry).map(|e| e.id).unwrap_or("pass-through"),
            wgsl: "",
        };
        let program = backend.compile_program(&program).unwrap();
        let out = backend.create_target(frame.width, frame.height).unwrap();
        backend.upload_source(frame).unwrap();
        let mut uniforms = PassUniforms::new(frame.dimensions(), 0.0, [0.0, 0.0, 1.0, 1.0]);
        for (i, p) in params.iter().enumerate() {
            uniforms.params[i][0] = *p;
        }
        backend
            .draw(&DrawPass {
                program,
                input: PassInput::Source,
                output: out,
                uniforms,
            })
            .unwrap();
        backend.read_target(out).unwrap()
    }

    #[test]
    fn test_every_registry_program_has_a_kernel() {
        let mut backend = SoftwareBackend::new();
        for effect in registry::all() {
            if let Some(shader) = &effect.shader {
                assert!(backend.compile_program(shader).is_ok(), "{}", effect.id);
            }
        }
        assert!(backend.compile_program(&registry::PASS_THROUGH).is_ok());
    }

    #[test]
    fn test_draw_log_stays_bounded() {
        let frame = gradient(4, 4);
        let mut backend = SoftwareBackend::new();
        let program = backend.compile_program(&registry::PASS_THROUGH).unwrap();
        let out = backend.create_target(4, 4).unwrap();
        backend.upload_source(&frame).unwrap();
        for i in 0..1000 {
            let uniforms = PassUniforms::new((4, 4), i as f32, [0.0, 0.0, 1.0, 1.0]);
            backend
                .draw(&DrawPass {
                    program,
                    input: PassInput::Source,
                    output: out,
                    uniforms,
                })
                .unwrap();
        }
        let draws = backend.draws();
        assert!(draws.len() <= DRAW_LOG_CAP);
        assert_eq!(draws.last().unwrap().uniforms.time, 999.0);
    }

    #[test]
    fn test_unknown_program_fails_to_compile() {
        let mut backend = SoftwareBackend::new();
        let bogus = ShaderProgram {
            entry: "bogus",
            wgsl: "",
        };
        assert!(matches!(
            backend.compile_program(&bogus),
            Err(GpuError::Compile { .. })
        ));
    }

    #[test]
    fn test_pass_through_is_exact() {
        let frame = gradient(13, 7);
        let mut backend = SoftwareBackend::new();
        let program = backend.compile_program(&registry::PASS_THROUGH).unwrap();
        let out = backend.create_target(13, 7).unwrap();
        backend.upload_source(&frame).unwrap();
        backend
            .draw(&DrawPass {
                program,
                input: PassInput::Source,
                output: out,
                uniforms: PassUniforms::new((13, 7), 0.0, [0.0, 0.0, 1.0, 1.0]),
            })
            .unwrap();
        assert_eq!(backend.read_target(out).unwrap(), frame);
    }

    #[test]
    fn test_blur_radius_zero_is_identity() {
        let frame = gradient(9, 9);
        assert_eq!(run("blur", &[0.0], &frame), frame);
    }

    #[test]
    fn test_blur_flattens_uniform_image() {
        let frame = VideoFrame::solid(6, 6, [90, 90, 90, 255]);
        assert_eq!(run("blur", &[2.0], &frame), frame);
    }

    #[test]
    fn test_grayscale_equalizes_channels() {
        let out = run("grayscale", &[1.0], &gradient(8, 8));
        for y in 0..8 {
            for x in 0..8 {
                let [r, g, b, a] = out.pixel(x, y);
                assert_eq!(r, g);
                assert_eq!(g, b);
                assert_eq!(a, 255);
            }
        }
    }

    #[test]
    fn test_invert_full_amount() {
        let frame = VideoFrame::solid(2, 2, [0, 100, 255, 255]);
        assert_eq!(run("invert", &[1.0], &frame).pixel(1, 1), [255, 155, 0, 255]);
    }

    #[test]
    fn test_pixelate_size_one_is_identity() {
        let frame = gradient(10, 6);
        assert_eq!(run("pixelate", &[1.0], &frame), frame);
    }

    #[test]
    fn test_crop_rect_samples_center() {
        let mut frame = VideoFrame::solid(4, 2, [0, 0, 0, 255]);
        frame.set_pixel(1, 0, [255, 0, 0, 255]);
        frame.set_pixel(2, 1, [0, 255, 0, 255]);

        let mut backend = SoftwareBackend::new();
        let program = backend.compile_program(&registry::PASS_THROUGH).unwrap();
        let out = backend.create_target(2, 2).unwrap();
        backend.upload_source(&frame).unwrap();
        backend
            .draw(&DrawPass {
                program,
                input: PassInput::Source,
                output: out,
                uniforms: PassUniforms::new((2, 2), 0.0, [0.25, 0.0, 0.5, 1.0]),
            })
            .unwrap();
        let out = backend.read_target(out).unwrap();
        assert_eq!(out.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(out.pixel(1, 1), [0, 255, 0, 255]);
    }

    #[test]
    fn test_feedback_rejected() {
        let mut backend = SoftwareBackend::new();
        let program = backend.compile_program(&registry::PASS_THROUGH).unwrap();
        let target = backend.create_target(2, 2).unwrap();
        let err = backend
            .draw(&DrawPass {
                program,
                input: PassInput::Target(target),
                output: target,
                uniforms: PassUniforms::new((2, 2), 0.0, [0.0, 0.0, 1.0, 1.0]),
            })
            .unwrap_err();
        assert!(matches!(err, GpuError::Feedback));
        assert_eq!(backend.target_count(), 1);
    }

    #[test]
    fn test_release_and_zero_size() {
        let mut backend = SoftwareBackend::new();
        assert!(backend.create_target(0, 4).is_err());
        let t = backend.create_target(4, 4).unwrap();
        backend.resize_target(t, 8, 2).unwrap();
        assert_eq!(backend.target_size(t), Some((8, 2)));
        backend.release_target(t);
        assert_eq!(backend.target_count(), 0);
        assert!(backend.resize_target(t, 1, 1).is_err());
    }
}
