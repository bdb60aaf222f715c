//! wgpu context implementation
//!
//! The GL-style immediate calls are mapped onto wgpu by buffering state: every `clear` and
//! `draw` becomes its own render pass on a per-frame command encoder that `flush` submits.
//! Render pipelines are created lazily for each combination of program, attachment formats
//! and fixed-function state.

use crate::backend::state::GpuState;
use crate::backend::traits::*;
use crate::backend::types::*;
use std::any::Any;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    desc: TextureDescriptor,
}

struct WgpuFramebuffer {
    color_attachments: Vec<TextureId>,
    depth_attachment: Option<TextureId>,
    width: u32,
    height: u32,
}

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
}

struct WgpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    vertex_layout: VertexLayout,
    uniforms: UniformLayout,
    uniform_block: Vec<u8>,
    uniform_bind_layout: wgpu::BindGroupLayout,
    texture_bind_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    texture_units: u32,
}

/// Everything a render pipeline object is specialized on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    depth_test: bool,
    face_culling: bool,
    blending: bool,
}

/// wgpu context backed by an offscreen device
pub struct WgpuContext {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    textures: HashMap<TextureId, WgpuTexture>,
    framebuffers: HashMap<FramebufferId, WgpuFramebuffer>,
    buffers: HashMap<BufferId, WgpuBuffer>,
    programs: HashMap<ProgramId, WgpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    next_id: u64,

    state: GpuState,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuContext {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }
}

impl WgpuContext {
    /// Create a context on the first available adapter
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
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
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Frame Graph Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            next_id: 1,
            state: GpuState::new(),
            encoder: None,
        })
    }

    /// Get the wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Read back an 8-bit RGBA texture. Pending work is flushed first.
    pub fn read_texture_rgba8(&mut self, texture: TextureId) -> BackendResult<Vec<u8>> {
        self.flush()?;

        let tex = self.texture(texture)?;
        let (width, height) = (tex.desc.width, tex.desc.height);
        if tex.desc.format.bytes_per_pixel() != 4 || tex.desc.format.is_depth() {
            return Err(BackendError::TextureCreationFailed(format!(
                "'{}' is not an 8-bit RGBA texture",
                tex.desc.label
            )));
        }

        let unpadded_row = width * 4;
        let padded_row = unpadded_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
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

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| BackendError::DeviceLost)?
            .map_err(|_| BackendError::DeviceLost)?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_row * height) as usize);
        for row in mapped.chunks(padded_row as usize) {
            pixels.extend_from_slice(&row[..unpadded_row as usize]);
        }
        drop(mapped);
        staging.unmap();

        Ok(pixels)
    }

    fn next_raw_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture(&self, texture: TextureId) -> BackendResult<&WgpuTexture> {
        self.textures.get(&texture).ok_or(BackendError::UnknownObject {
            kind: "texture",
            id: texture.0,
        })
    }

    fn encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        })
    }

    /// Run a closure inside a validation error scope
    fn validated<T>(&self, what: &str, f: impl FnOnce() -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(format!("{what}: {error}")),
            None => Ok(value),
        }
    }

    fn bound_framebuffer(&self) -> BackendResult<(FramebufferId, &WgpuFramebuffer)> {
        let id = self
            .state
            .framebuffer()
            .ok_or(BackendError::NothingBound("framebuffer"))?;
        let framebuffer = self
            .framebuffers
            .get(&id)
            .ok_or(BackendError::UnknownObject {
                kind: "framebuffer",
                id: id.0,
            })?;
        Ok((id, framebuffer))
    }

    fn pipeline_key(&self, program: ProgramId, framebuffer: &WgpuFramebuffer) -> BackendResult<PipelineKey> {
        let color_formats = framebuffer
            .color_attachments
            .iter()
            .map(|&id| self.texture(id).map(|t| t.desc.format))
            .collect::<BackendResult<Vec<_>>>()?;
        let depth_format = framebuffer
            .depth_attachment
            .map(|id| self.texture(id).map(|t| t.desc.format))
            .transpose()?;

        Ok(PipelineKey {
            program,
            color_formats,
            depth_format,
            depth_test: self.state.depth_test(),
            face_culling: self.state.face_culling(),
            blending: self.state.blending(),
        })
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> BackendResult<()> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }

        let program = self.programs.get(&key.program).ok_or(BackendError::UnknownObject {
            kind: "program",
            id: key.program.0,
        })?;

        let attributes: Vec<wgpu::VertexAttribute> = program
            .vertex_layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: program.vertex_layout.array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(format),
                    blend: key.blending.then_some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
            format: Self::convert_texture_format(format),
            depth_write_enabled: key.depth_test,
            depth_compare: if key.depth_test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: key.face_culling.then_some(wgpu::Face::Back),
            ..Default::default()
        };

        let label = program.label.clone();
        let pipeline = self
            .validated("render pipeline", || {
                self.device
                    .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(&label),
                        layout: Some(&program.pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &program.module,
                            entry_point: "vs_main",
                            buffers: &vertex_buffers,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &program.module,
                            entry_point: "fs_main",
                            targets: &color_targets,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        }),
                        primitive,
                        depth_stencil,
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                    })
            })
            .map_err(|message| BackendError::ShaderCompilationFailed {
                label: label.clone(),
                message,
            })?;

        log::debug!("WgpuContext: created render pipeline for '{}' ({:?})", label, key);
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    fn encode_clear(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    ) -> BackendResult<()> {
        let (_, fb) = self.bound_framebuffer()?;
        let color_load = match color {
            Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                r: c[0] as f64,
                g: c[1] as f64,
                b: c[2] as f64,
                a: c[3] as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_load = depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);
        let (color_attachments, depth_stencil_attachment) =
            self.attachments(fb, color_load, depth_load)?;

        // Dropping the pass ends it; the load ops perform the clear
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear"),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn encode_draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        key: &PipelineKey,
        first: u32,
        count: u32,
    ) -> BackendResult<()> {
        let (_, fb) = self.bound_framebuffer()?;
        let buffer_id = self
            .state
            .vertex_buffer()
            .ok_or(BackendError::NothingBound("vertex buffer"))?;
        let vertex_buffer = self.buffers.get(&buffer_id).ok_or(BackendError::UnknownObject {
            kind: "buffer",
            id: buffer_id.0,
        })?;
        let program = self.programs.get(&key.program).ok_or(BackendError::UnknownObject {
            kind: "program",
            id: key.program.0,
        })?;
        let pipeline = self.pipelines.get(key).ok_or(BackendError::UnknownObject {
            kind: "render pipeline",
            id: key.program.0,
        })?;

        let uniform_buffer = (!program.uniform_block.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Uniform Block"),
                    contents: &program.uniform_block,
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        });
        let uniform_entries: Vec<wgpu::BindGroupEntry> = uniform_buffer
            .iter()
            .map(|buffer| wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Block"),
            layout: &program.uniform_bind_layout,
            entries: &uniform_entries,
        });

        let texture_group = match &program.texture_bind_layout {
            Some(layout) => {
                let mut entries = Vec::with_capacity(program.texture_units as usize * 2);
                for unit in 0..program.texture_units {
                    let id = self
                        .state
                        .texture(unit)
                        .ok_or(BackendError::TextureUnitEmpty(unit))?;
                    let tex = self.texture(id)?;
                    entries.push(wgpu::BindGroupEntry {
                        binding: unit * 2,
                        resource: wgpu::BindingResource::TextureView(&tex.view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: unit * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(&tex.sampler),
                    });
                }
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Texture Units"),
                    layout,
                    entries: &entries,
                }))
            }
            None => None,
        };

        let (color_attachments, depth_stencil_attachment) =
            self.attachments(fb, wgpu::LoadOp::Load, wgpu::LoadOp::Load)?;
        let viewport = self
            .state
            .viewport()
            .unwrap_or(Viewport::new(fb.width, fb.height));

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&program.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &uniform_group, &[]);
        if let Some(group) = &texture_group {
            render_pass.set_bind_group(1, group, &[]);
        }
        render_pass.set_vertex_buffer(0, vertex_buffer.buffer.slice(..));
        render_pass.draw(first..first + count, 0..1);
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn attachments<'a>(
        &'a self,
        fb: &WgpuFramebuffer,
        color_load: wgpu::LoadOp<wgpu::Color>,
        depth_load: wgpu::LoadOp<f32>,
    ) -> BackendResult<(
        Vec<Option<wgpu::RenderPassColorAttachment<'a>>>,
        Option<wgpu::RenderPassDepthStencilAttachment<'a>>,
    )> {
        let color = fb
            .color_attachments
            .iter()
            .map(|&id| {
                let tex = self.texture(id)?;
                Ok(Some(wgpu::RenderPassColorAttachment {
                    view: &tex.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                }))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let depth = fb
            .depth_attachment
            .map(|id| {
                let tex = self.texture(id)?;
                Ok(wgpu::RenderPassDepthStencilAttachment {
                    view: &tex.view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            })
            .transpose()?;
        Ok((color, depth))
    }
}

impl GraphicsContext for WgpuContext {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId> {
        let max = self.max_texture_size();
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::InvalidTextureSize {
                width: desc.width,
                height: desc.height,
                max,
            });
        }

        let texture = self
            .validated("texture", || {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&desc.label),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: Self::convert_texture_format(desc.format),
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .map_err(BackendError::TextureCreationFailed)?;

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&desc.label),
            address_mode_u: Self::convert_address_mode(desc.address_mode),
            address_mode_v: Self::convert_address_mode(desc.address_mode),
            address_mode_w: Self::convert_address_mode(desc.address_mode),
            mag_filter: Self::convert_filter_mode(desc.filter),
            min_filter: Self::convert_filter_mode(desc.filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let id = TextureId(self.next_raw_id());
        self.textures.insert(
            id,
            WgpuTexture {
                texture,
                view,
                sampler,
                desc: desc.clone(),
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(tex) = self.textures.remove(&texture) {
            self.state.forget_texture(texture);
            tex.texture.destroy();
        }
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferId> {
        let incomplete = |reason: String| {
            BackendError::FramebufferIncomplete(format!("'{}': {}", desc.label, reason))
        };

        let mut size: Option<(u32, u32)> = None;
        for (&id, want_depth) in desc
            .color_attachments
            .iter()
            .map(|id| (id, false))
            .chain(desc.depth_attachment.iter().map(|id| (id, true)))
        {
            let tex = self.texture(id)?;
            if tex.desc.format.is_depth() != want_depth {
                return Err(incomplete(format!(
                    "'{}' has the wrong format for its attachment point",
                    tex.desc.label
                )));
            }
            let dims = (tex.desc.width, tex.desc.height);
            if *size.get_or_insert(dims) != dims {
                return Err(incomplete("attachment sizes differ".into()));
            }
        }
        let (width, height) = size.ok_or_else(|| incomplete("no attachments".into()))?;

        let id = FramebufferId(self.next_raw_id());
        self.framebuffers.insert(
            id,
            WgpuFramebuffer {
                color_attachments: desc.color_attachments.clone(),
                depth_attachment: desc.depth_attachment,
                width,
                height,
            },
        );
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            self.state.forget_framebuffer(framebuffer);
        }
    }

    fn create_vertex_buffer(
        &mut self,
        label: &str,
        layout: &VertexLayout,
        capacity: u64,
        data: &[u8],
    ) -> BackendResult<BufferId> {
        if capacity == 0 || layout.array_stride == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "'{label}': empty buffer or layout"
            )));
        }
        if data.len() as u64 > capacity {
            return Err(BackendError::BufferOverflow {
                size: data.len() as u64,
                capacity,
            });
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if !data.is_empty() {
            self.queue.write_buffer(&buffer, 0, data);
        }

        let id = BufferId(self.next_raw_id());
        self.buffers.insert(id, WgpuBuffer { buffer, capacity });
        Ok(id)
    }

    fn write_vertex_buffer(&mut self, buffer: BufferId, data: &[u8]) -> BackendResult<()> {
        let buf = self.buffers.get(&buffer).ok_or(BackendError::UnknownObject {
            kind: "buffer",
            id: buffer.0,
        })?;
        if data.len() as u64 > buf.capacity {
            return Err(BackendError::BufferOverflow {
                size: data.len() as u64,
                capacity: buf.capacity,
            });
        }
        if !data.is_empty() {
            self.queue.write_buffer(&buf.buffer, 0, data);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(buf) = self.buffers.remove(&buffer) {
            self.state.forget_buffer(buffer);
            buf.buffer.destroy();
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId> {
        // naga reports errors with source spans instead of tripping the device error handler
        desc.validate()?;

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.clone()),
        });

        let uniforms = UniformLayout::new(&desc.uniforms);
        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = if uniforms.is_empty() {
            Vec::new()
        } else {
            vec![wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }]
        };
        let uniform_bind_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Uniform Block Layout"),
                entries: &uniform_entries,
            });

        let texture_bind_layout = (desc.texture_units > 0).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..desc.texture_units)
                .flat_map(|unit| {
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: unit * 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: unit * 2 + 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ]
                })
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Texture Units Layout"),
                    entries: &entries,
                })
        });

        let mut bind_group_layouts = vec![&uniform_bind_layout];
        if let Some(layout) = &texture_bind_layout {
            bind_group_layouts.push(layout);
        }
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[],
            });

        let id = ProgramId(self.next_raw_id());
        self.programs.insert(
            id,
            WgpuProgram {
                label: desc.label.to_string(),
                module,
                vertex_layout: desc.vertex_layout.clone(),
                uniform_block: vec![0; uniforms.size() as usize],
                uniforms,
                uniform_bind_layout,
                texture_bind_layout,
                pipeline_layout,
                texture_units: desc.texture_units,
            },
        );
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.state.forget_program(program);
            self.pipelines.retain(|key, _| key.program != program);
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> BackendResult<()> {
        let fb = self
            .framebuffers
            .get(&framebuffer)
            .ok_or(BackendError::UnknownObject {
                kind: "framebuffer",
                id: framebuffer.0,
            })?;
        let full = Viewport::new(fb.width, fb.height);
        if self.state.set_framebuffer(framebuffer) {
            self.state.set_viewport(full);
        }
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.set_viewport(viewport);
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> BackendResult<()> {
        let mut encoder = self.encoder();
        let result = self.encode_clear(&mut encoder, color, depth);
        self.encoder = Some(encoder);
        result
    }

    fn use_program(&mut self, program: ProgramId) -> BackendResult<()> {
        if !self.programs.contains_key(&program) {
            return Err(BackendError::UnknownObject {
                kind: "program",
                id: program.0,
            });
        }
        self.state.set_program(program);
        Ok(())
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) -> BackendResult<()> {
        let id = self
            .state
            .program()
            .ok_or(BackendError::NothingBound("program"))?;
        let program = self.programs.get_mut(&id).ok_or(BackendError::UnknownObject {
            kind: "program",
            id: id.0,
        })?;
        program.uniforms.write(&mut program.uniform_block, name, value)
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) -> BackendResult<()> {
        self.texture(texture)?;
        self.state.set_texture(unit, texture)?;
        Ok(())
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.set_depth_test(enabled);
    }

    fn set_face_culling(&mut self, enabled: bool) {
        self.state.set_face_culling(enabled);
    }

    fn set_blending(&mut self, enabled: bool) {
        self.state.set_blending(enabled);
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) -> BackendResult<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(BackendError::UnknownObject {
                kind: "buffer",
                id: buffer.0,
            });
        }
        self.state.set_vertex_buffer(buffer);
        Ok(())
    }

    fn draw(&mut self, first: u32, count: u32) -> BackendResult<()> {
        let program = self
            .state
            .program()
            .ok_or(BackendError::NothingBound("program"))?;
        let key = {
            let (_, fb) = self.bound_framebuffer()?;
            self.pipeline_key(program, fb)?
        };
        self.ensure_pipeline(&key)?;

        let mut encoder = self.encoder();
        let result = self.encode_draw(&mut encoder, &key, first, count);
        self.encoder = Some(encoder);
        result
    }

    fn flush(&mut self) -> BackendResult<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
        Ok(())
    }

    fn discard_pending(&mut self) {
        if self.encoder.take().is_some() {
            log::debug!("WgpuContext: discarded unsubmitted frame encoder");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for WgpuContext {
    fn drop(&mut self) {
        self.encoder = None;
        for (_, tex) in self.textures.drain() {
            tex.texture.destroy();
        }
        for (_, buf) in self.buffers.drain() {
            buf.buffer.destroy();
        }
    }
}
