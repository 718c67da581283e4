//! wgpu backend: one full-screen-triangle render pass per draw.

use std::collections::HashMap;

use reelfx_effect_model::{ShaderProgram, VideoFrame};

use super::{DrawPass, GpuBackend, PassInput, PassUniforms, ProgramId, TargetId};
use crate::error::{GpuError, GpuResult};

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Shared declarations prepended to every registry program.
const PRELUDE: &str = r#"
struct Uniforms {
    resolution: vec2<f32>,
    time: f32,
    _pad: f32,
    src_rect: vec4<f32>,
    params: array<vec4<f32>, 8>,
}

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_input: sampler;
@group(0) @binding(2) var<uniform> u: Uniforms;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
    var out: VsOut;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    out.pos = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}

fn sample_input(uv: vec2<f32>) -> vec4<f32> {
    let st = u.src_rect.xy + clamp(uv, vec2<f32>(0.0), vec2<f32>(1.0)) * u.src_rect.zw;
    return textureSampleLevel(t_input, s_input, st, 0.0);
}
"#;

struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// Hardware backend on the first available adapter.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    targets: HashMap<TargetId, GpuTarget>,
    source: Option<GpuTarget>,
    programs: Vec<wgpu::RenderPipeline>,
    next_target: u64,
}

impl WgpuBackend {
    /// Create a headless backend. Blocks on adapter and device requests.
    pub fn new() -> GpuResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> GpuResult<Self> {
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
            .await
            .ok_or(GpuError::NoAdapter)?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "GPU adapter selected");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ReelFX Compositor Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::Device(e.to_string()))?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pass Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Pass Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniforms"),
            size: std::mem::size_of::<PassUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            bind_group_layout,
            pipeline_layout,
            sampler,
            uniform_buffer,
            targets: HashMap::new(),
            source: None,
            programs: Vec::new(),
            next_target: 0,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn create_texture(&self, width: u32, height: u32, label: &str) -> GpuTarget {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTarget {
            texture,
            view,
            width,
            height,
        }
    }

    fn input_view(&self, input: PassInput) -> GpuResult<&wgpu::TextureView> {
        match input {
            PassInput::Source => self.source.as_ref().map(|t| &t.view).ok_or(GpuError::NoSource),
            PassInput::Target(id) => self
                .targets
                .get(&id)
                .map(|t| &t.view)
                .ok_or(GpuError::UnknownTarget(id)),
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_target(&mut self, width: u32, height: u32) -> GpuResult<TargetId> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        self.next_target += 1;
        let id = TargetId(self.next_target);
        let target = self.create_texture(width, height, "Compositor Target");
        self.targets.insert(id, target);
        Ok(id)
    }

    fn resize_target(&mut self, target: TargetId, width: u32, height: u32) -> GpuResult<()> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        let current = self
            .targets
            .get(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        if (current.width, current.height) == (width, height) {
            return Ok(());
        }
        let replacement = self.create_texture(width, height, "Compositor Target");
        if let Some(old) = self.targets.insert(target, replacement) {
            old.texture.destroy();
        }
        Ok(())
    }

    fn release_target(&mut self, target: TargetId) {
        if let Some(old) = self.targets.remove(&target) {
            old.texture.destroy();
        }
    }

    fn upload_source(&mut self, frame: &VideoFrame) -> GpuResult<()> {
        if frame.width == 0 || frame.height == 0 {
            return Err(GpuError::InvalidSize {
                width: frame.width,
                height: frame.height,
            });
        }
        let reuse = matches!(&self.source, Some(t) if (t.width, t.height) == frame.dimensions());
        if !reuse {
            if let Some(old) = self.source.take() {
                old.texture.destroy();
            }
            self.source = Some(self.create_texture(frame.width, frame.height, "Source Frame"));
        }
        let Some(source) = &self.source else {
            return Err(GpuError::NoSource);
        };

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * frame.width),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn compile_program(&mut self, program: &ShaderProgram) -> GpuResult<ProgramId> {
        let source = format!("{PRELUDE}\n{}", program.wgsl);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(program.entry),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.entry),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Compile {
                entry: program.entry.to_string(),
                message: err.to_string(),
            });
        }

        self.programs.push(pipeline);
        Ok(ProgramId(self.programs.len() as u64 - 1))
    }

    fn draw(&mut self, pass: &DrawPass) -> GpuResult<()> {
        if pass.input == PassInput::Target(pass.output) {
            return Err(GpuError::Feedback);
        }
        let pipeline = self
            .programs
            .get(pass.program.0 as usize)
            .ok_or(GpuError::UnknownProgram(pass.program.0))?;
        let input = self.input_view(pass.input)?;
        let output = self
            .targets
            .get(&pass.output)
            .ok_or(GpuError::UnknownTarget(pass.output))?;

        self.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&pass.uniforms),
        );

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pass Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Effect Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        // Submitted per pass so the next write_buffer cannot clobber these uniforms.
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_target(&mut self, target: TargetId) -> GpuResult<VideoFrame> {
        let target = self
            .targets
            .get(&target)
            .ok_or(GpuError::UnknownTarget(target))?;
        let (width, height) = (target.width, target.height);

        let bytes_per_row = 4 * width;
        let padded_bytes_per_row = (bytes_per_row + 255) & !255;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let data = {
            let mapped = slice.get_mapped_range();
            let mut data = Vec::with_capacity((bytes_per_row * height) as usize);
            for row in 0..height {
                let start = (row * padded_bytes_per_row) as usize;
                data.extend_from_slice(&mapped[start..start + bytes_per_row as usize]);
            }
            data
        };
        buffer.unmap();

        VideoFrame::from_rgba(width, height, data)
            .ok_or_else(|| GpuError::Readback("short readback".to_string()))
    }

    fn target_count(&self) -> usize {
        self.targets.len()
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        for (_, target) in self.targets.drain() {
            target.texture.destroy();
        }
        if let Some(source) = self.source.take() {
            source.texture.destroy();
        }
    }
}
