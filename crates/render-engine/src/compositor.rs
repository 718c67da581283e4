//! Multi-pass effect compositor.
//!
//! Each tick renders the enabled effects of a chain snapshot over the
//! current source frame:
//!
//! ```text
//! source ─▶ pass 0 ─▶ ping[0] ─▶ pass 1 ─▶ ping[1] ─▶ … ─▶ pass N-1 ─▶ surface
//! ```
//!
//! An empty chain is a single pass-through draw from source to surface.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use reelfx_common::clock::Stopwatch;
use reelfx_effect_model::registry::{self, PASS_THROUGH};
use reelfx_effect_model::{
    crop_rect, resolve, AppliedEffectInstance, AspectRatio, CropRect, EffectChain,
    EffectDescriptor, VideoFrame,
};

use crate::backend::{
    DrawPass, GpuBackend, PassInput, PassUniforms, ProgramId, TargetId, MAX_PARAMS,
};
use crate::diagnostics::FpsCounter;
use crate::error::{GpuError, GpuResult};
use crate::ping_pong::PingPong;
use crate::source::FrameSource;
use crate::tap::SurfaceTap;

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// Draw calls issued; equals the enabled chain length, or 1 when empty.
    pub draws: usize,
    pub ping_pong_writes: usize,
    /// Passes rendered as pass-through because their program was unavailable.
    pub degraded: usize,
    pub surface: (u32, u32),
    /// Presentation time of the source frame that was drawn, in seconds.
    pub source_time: f64,
}

/// Why a tick drew nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Detached,
    NoFrame,
    InvalidSource,
    /// Targets could not be resized; retried next tick.
    ResizeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Rendered(TickReport),
    Skipped(SkipReason),
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            Self::Rendered(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ProgramSlot {
    Ready(ProgramId),
    Unavailable,
}

struct Attachment {
    source: Weak<dyn FrameSource>,
    surface: TargetId,
    surface_size: (u32, u32),
    ping_pong: PingPong,
    source_size: (u32, u32),
    crop: CropRect,
    last_frame: Option<Arc<VideoFrame>>,
    needs_resize: bool,
}

/// Compositor bound to at most one frame source.
///
/// Owns every render target it creates; `detach` and drop release them
/// before returning.
pub struct Compositor<B: GpuBackend> {
    backend: B,
    aspect: AspectRatio,
    attachment: Option<Attachment>,
    pass_through: Option<ProgramId>,
    programs: HashMap<&'static str, ProgramSlot>,
    warned: HashSet<String>,
    clock: Stopwatch,
    fps: FpsCounter,
    tap: Arc<SurfaceTap>,
}

impl<B: GpuBackend> Compositor<B> {
    pub fn new(backend: B) -> Self {
        tracing::debug!(backend = backend.name(), "Compositor created");
        Self {
            backend,
            aspect: AspectRatio::Original,
            attachment: None,
            pass_through: None,
            programs: HashMap::new(),
            warned: HashSet::new(),
            clock: Stopwatch::start(),
            fps: FpsCounter::new(),
            tap: SurfaceTap::new(),
        }
    }

    /// Bind to a frame source, creating the surface and ping-pong targets.
    /// Any previous source is detached first.
    pub fn attach<S: FrameSource + 'static>(&mut self, source: &Arc<S>) -> GpuResult<()> {
        self.detach();
        self.pass_through_program()?;

        let source_size = source.dimensions();
        let (width, height) = resolve(source_size.0, source_size.1, self.aspect.ratio())
            .map_err(|_| GpuError::InvalidSize {
                width: source_size.0,
                height: source_size.1,
            })?;

        let surface = self.backend.create_target(width, height)?;
        let ping_pong = match PingPong::create(&mut self.backend, width, height) {
            Ok(pair) => pair,
            Err(e) => {
                self.backend.release_target(surface);
                return Err(e);
            }
        };

        let weak: Weak<S> = Arc::downgrade(source);
        self.attachment = Some(Attachment {
            source: weak,
            surface,
            surface_size: (width, height),
            ping_pong,
            source_size,
            crop: crop_rect(source_size.0, source_size.1, width, height),
            last_frame: None,
            needs_resize: false,
        });
        self.tap.set_dimensions(Some((width, height)));

        tracing::info!(
            source_width = source_size.0,
            source_height = source_size.1,
            width,
            height,
            aspect = %self.aspect,
            "Compositor attached"
        );
        Ok(())
    }

    /// Release all render targets. No-op when detached.
    pub fn detach(&mut self) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        self.backend.release_target(attachment.surface);
        attachment.ping_pong.release(&mut self.backend);
        self.tap.set_dimensions(None);
        self.fps.reset();
        tracing::info!("Compositor detached");
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Change the output aspect ratio; targets are resized on the next tick.
    pub fn set_aspect_ratio(&mut self, aspect: AspectRatio) {
        if aspect == self.aspect {
            return;
        }
        self.aspect = aspect;
        if let Some(attachment) = &mut self.attachment {
            attachment.needs_resize = true;
        }
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect
    }

    /// Render one frame of `chain` into the surface.
    pub fn tick(&mut self, chain: &EffectChain) -> GpuResult<TickOutcome> {
        let Some(mut attachment) = self.attachment.take() else {
            return Ok(TickOutcome::Skipped(SkipReason::Detached));
        };
        let Some(source) = attachment.source.upgrade() else {
            self.attachment = Some(attachment);
            self.detach();
            return Ok(TickOutcome::Skipped(SkipReason::Detached));
        };

        let result = self.render(&mut attachment, source.as_ref(), chain);
        self.attachment = Some(attachment);
        result
    }

    fn render(
        &mut self,
        att: &mut Attachment,
        source: &dyn FrameSource,
        chain: &EffectChain,
    ) -> GpuResult<TickOutcome> {
        let Some(frame) = source.current_frame() else {
            return Ok(TickOutcome::Skipped(SkipReason::NoFrame));
        };

        let frame_size = frame.dimensions();
        if frame_size != att.source_size {
            att.needs_resize = true;
        }
        if att.needs_resize {
            if let Err(reason) = self.apply_resize(att, frame_size) {
                return Ok(TickOutcome::Skipped(reason));
            }
        }

        let fresh = !matches!(&att.last_frame, Some(last) if Arc::ptr_eq(last, &frame));
        if fresh {
            self.backend.upload_source(&frame)?;
            att.last_frame = Some(frame);
        }

        let enabled: Vec<&AppliedEffectInstance> = chain.enabled().collect();
        let time = self.clock.elapsed_secs() as f32;
        let resolution = att.surface_size;
        let mut report = TickReport {
            draws: 0,
            ping_pong_writes: 0,
            degraded: 0,
            surface: resolution,
            source_time: source.timestamp_secs(),
        };

        if enabled.is_empty() {
            let program = self.pass_through_program()?;
            self.backend.draw(&DrawPass {
                program,
                input: PassInput::Source,
                output: att.surface,
                uniforms: PassUniforms::new(resolution, time, att.crop.to_array()),
            })?;
            report.draws = 1;
        } else {
            att.ping_pong.reset();
            let last = enabled.len() - 1;
            let mut input = PassInput::Source;

            for (i, instance) in enabled.iter().enumerate() {
                let (program, descriptor, degraded) = self.program_for(instance)?;
                let rect = if i == 0 { att.crop } else { CropRect::FULL };
                let mut uniforms = PassUniforms::new(resolution, time, rect.to_array());
                if let Some(descriptor) = descriptor {
                    for (slot, param) in descriptor.parameters.iter().take(MAX_PARAMS).enumerate() {
                        let value = instance.resolved_value(param).to_uniform();
                        uniforms.params[slot] = value.to_vec4();
                    }
                }

                let output = if i == last {
                    att.surface
                } else {
                    att.ping_pong.write_target()
                };
                self.backend.draw(&DrawPass {
                    program,
                    input,
                    output,
                    uniforms,
                })?;

                report.draws += 1;
                if degraded {
                    report.degraded += 1;
                }
                if i != last {
                    input = PassInput::Target(att.ping_pong.swap());
                    report.ping_pong_writes += 1;
                }
            }
        }

        self.fps.record(self.clock.elapsed_secs());

        if self.tap.has_subscribers() {
            match self.backend.read_target(att.surface) {
                Ok(presented) => self.tap.publish(presented),
                Err(e) => tracing::warn!(error = %e, "Surface readback failed"),
            }
        }

        Ok(TickOutcome::Rendered(report))
    }

    fn apply_resize(
        &mut self,
        att: &mut Attachment,
        frame_size: (u32, u32),
    ) -> Result<(), SkipReason> {
        let (width, height) = match resolve(frame_size.0, frame_size.1, self.aspect.ratio()) {
            Ok(dims) => dims,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot resolve viewport for source frame");
                return Err(SkipReason::InvalidSource);
            }
        };

        let resized = self
            .backend
            .resize_target(att.surface, width, height)
            .and_then(|()| att.ping_pong.resize(&mut self.backend, width, height));
        if let Err(e) = resized {
            tracing::warn!(error = %e, width, height, "Render target resize failed, skipping tick");
            return Err(SkipReason::ResizeFailed);
        }

        tracing::debug!(
            from = ?att.surface_size,
            to = ?(width, height),
            aspect = %self.aspect,
            "Render targets resized"
        );
        att.surface_size = (width, height);
        att.source_size = frame_size;
        att.crop = crop_rect(frame_size.0, frame_size.1, width, height);
        att.needs_resize = false;
        self.tap.set_dimensions(Some((width, height)));
        Ok(())
    }

    fn pass_through_program(&mut self) -> GpuResult<ProgramId> {
        if let Some(id) = self.pass_through {
            return Ok(id);
        }
        let id = self.backend.compile_program(&PASS_THROUGH)?;
        self.pass_through = Some(id);
        Ok(id)
    }

    /// Program for one chain entry. Missing descriptors, effects without a
    /// shader and compile failures all degrade to pass-through.
    fn program_for(
        &mut self,
        instance: &AppliedEffectInstance,
    ) -> GpuResult<(ProgramId, Option<&'static EffectDescriptor>, bool)> {
        let Some(descriptor) = registry::find(&instance.effect_id) else {
            self.warn_once(&instance.effect_id, "Unknown effect, rendering pass-through");
            return Ok((self.pass_through_program()?, None, true));
        };
        let Some(shader) = descriptor.shader else {
            self.warn_once(descriptor.id, "Effect has no shader program, rendering pass-through");
            return Ok((self.pass_through_program()?, Some(descriptor), true));
        };

        let slot = match self.programs.get(descriptor.id) {
            Some(slot) => *slot,
            None => {
                let slot = match self.backend.compile_program(&shader) {
                    Ok(id) => ProgramSlot::Ready(id),
                    Err(e) => {
                        tracing::warn!(
                            effect = descriptor.id,
                            error = %e,
                            "Effect program failed to compile, rendering pass-through"
                        );
                        self.warned.insert(descriptor.id.to_string());
                        ProgramSlot::Unavailable
                    }
                };
                self.programs.insert(descriptor.id, slot);
                slot
            }
        };

        match slot {
            ProgramSlot::Ready(id) => Ok((id, Some(descriptor), false)),
            ProgramSlot::Unavailable => Ok((self.pass_through_program()?, Some(descriptor), true)),
        }
    }

    fn warn_once(&mut self, effect_id: &str, message: &str) {
        if self.warned.insert(effect_id.to_string()) {
            tracing::warn!(effect = effect_id, "{message}");
        }
    }

    /// Smoothed frames per second over the last second of ticks.
    pub fn fps(&self) -> f64 {
        self.fps.fps()
    }

    /// Seconds since the compositor was created, as passed to programs.
    pub fn elapsed_secs(&self) -> f64 {
        self.clock.elapsed_secs()
    }

    /// The presentable surface, while attached.
    pub fn surface(&self) -> Option<TargetId> {
        self.attachment.as_ref().map(|a| a.surface)
    }

    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.attachment.as_ref().map(|a| a.surface_size)
    }

    /// Read the surface back to host memory.
    pub fn read_surface(&mut self) -> GpuResult<VideoFrame> {
        let surface = self
            .surface()
            .ok_or(GpuError::NoSource)?;
        self.backend.read_target(surface)
    }

    /// Capture handle onto the presented surface.
    pub fn tap(&self) -> Arc<SurfaceTap> {
        Arc::clone(&self.tap)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GpuBackend> Drop for Compositor<B> {
    fn drop(&mut self) {
        self.detach();
    }
}
