//! GPU backend abstraction.
//!
//! The compositor drives a backend through a small set of operations:
//! target lifecycle, source upload, program compilation, one full-screen
//! draw per pass, and readback. Backends never see the effect chain.

pub mod software;
#[cfg(feature = "wgpu")]
pub mod hardware;

use reelfx_effect_model::{ShaderProgram, VideoFrame};

use crate::error::GpuResult;

pub use software::SoftwareBackend;
#[cfg(feature = "wgpu")]
pub use hardware::WgpuBackend;

/// Number of `vec4` parameter slots in the uniform block.
pub const MAX_PARAMS: usize = 8;

/// Handle to an off-screen render target owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Handle to a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

/// Where a pass reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassInput {
    /// The most recently uploaded source frame.
    Source,
    Target(TargetId),
}

/// Uniform block shared by every program. Layout matches the WGSL prelude.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub _pad: f32,
    /// Normalized input rectangle: `xy` origin, `zw` extent.
    pub src_rect: [f32; 4],
    pub params: [[f32; 4]; MAX_PARAMS],
}

impl PassUniforms {
    pub fn new(resolution: (u32, u32), time: f32, src_rect: [f32; 4]) -> Self {
        Self {
            resolution: [resolution.0 as f32, resolution.1 as f32],
            time,
            _pad: 0.0,
            src_rect,
            params: [[0.0; 4]; MAX_PARAMS],
        }
    }

    /// Scalar in slot `index`, as programs read it (`u.params[i].x`).
    pub fn param(&self, index: usize) -> f32 {
        self.params.get(index).map(|slot| slot[0]).unwrap_or(0.0)
    }

    pub fn param_vec3(&self, index: usize) -> [f32; 3] {
        self.params
            .get(index)
            .map(|slot| [slot[0], slot[1], slot[2]])
            .unwrap_or([0.0; 3])
    }
}

/// One full-screen draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawPass {
    pub program: ProgramId,
    pub input: PassInput,
    pub output: TargetId,
    pub uniforms: PassUniforms,
}

/// Rendering device used by the compositor.
///
/// All calls are synchronous: when a call returns, its effect on targets is
/// complete or ordered before any later call.
pub trait GpuBackend: Send {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    fn create_target(&mut self, width: u32, height: u32) -> GpuResult<TargetId>;

    /// Reallocate a target; its contents are undefined afterwards.
    fn resize_target(&mut self, target: TargetId, width: u32, height: u32) -> GpuResult<()>;

    /// Free a target. Unknown ids are ignored.
    fn release_target(&mut self, target: TargetId);

    /// Replace the source texture with `frame`.
    fn upload_source(&mut self, frame: &VideoFrame) -> GpuResult<()>;

    fn compile_program(&mut self, program: &ShaderProgram) -> GpuResult<ProgramId>;

    fn draw(&mut self, pass: &DrawPass) -> GpuResult<()>;

    /// Copy a target back to host memory as RGBA8.
    fn read_target(&mut self, target: TargetId) -> GpuResult<VideoFrame>;

    /// Number of live targets.
    fn target_count(&self) -> usize;
}

impl<B: GpuBackend + ?Sized> GpuBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn create_target(&mut self, width: u32, height: u32) -> GpuResult<TargetId> {
        (**self).create_target(width, height)
    }

    fn resize_target(&mut self, target: TargetId, width: u32, height: u32) -> GpuResult<()> {
        (**self).resize_target(target, width, height)
    }

    fn release_target(&mut self, target: TargetId) {
        (**self).release_target(target)
    }

    fn upload_source(&mut self, frame: &VideoFrame) -> GpuResult<()> {
        (**self).upload_source(frame)
    }

    fn compile_program(&mut self, program: &ShaderProgram) -> GpuResult<ProgramId> {
        (**self).compile_program(program)
    }

    fn draw(&mut self, pass: &DrawPass) -> GpuResult<()> {
        (**self).draw(pass)
    }

    fn read_target(&mut self, target: TargetId) -> GpuResult<VideoFrame> {
        (**self).read_target(target)
    }

    fn target_count(&self) -> usize {
        (**self).target_count()
    }
}

/// Pick the best available backend: hardware when compiled in and an
/// adapter exists, software otherwise.
pub fn default_backend() -> Box<dyn GpuBackend> {
    #[cfg(feature = "wgpu")]
    {
        match WgpuBackend::new() {
            Ok(backend) => return Box::new(backend),
            Err(e) => tracing::warn!(error = %e, "GPU backend unavailable, using software"),
        }
    }
    Box::new(SoftwareBackend::new())
}
