//! Headless GPU context for testing and tooling.
//!
//! This context doesn't talk to a GPU. It validates every object it is asked to create the
//! way a driver would, tracks bound state, and records the resulting command stream so the
//! exact sequence of binds, clears and draws can be inspected.

use crate::backend::state::GpuState;
use crate::backend::traits::*;
use crate::backend::types::*;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Default maximum texture dimension, matching common desktop limits
pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 8192;

/// A recorded context command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTexture {
        texture: TextureId,
        label: String,
        width: u32,
        height: u32,
        format: TextureFormat,
    },
    DestroyTexture(TextureId),
    CreateFramebuffer {
        framebuffer: FramebufferId,
        label: String,
    },
    DestroyFramebuffer(FramebufferId),
    CreateBuffer {
        buffer: BufferId,
        label: String,
        capacity: u64,
    },
    WriteBuffer {
        buffer: BufferId,
        size: u64,
    },
    DestroyBuffer(BufferId),
    CreateProgram {
        program: ProgramId,
        label: String,
    },
    DestroyProgram(ProgramId),
    BindFramebuffer(FramebufferId),
    SetViewport(Viewport),
    Clear {
        framebuffer: FramebufferId,
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    },
    UseProgram(ProgramId),
    SetUniform {
        name: String,
        value: UniformValue,
    },
    BindTexture {
        unit: u32,
        texture: TextureId,
    },
    SetDepthTest(bool),
    SetFaceCulling(bool),
    SetBlending(bool),
    BindVertexBuffer(BufferId),
    Draw {
        framebuffer: FramebufferId,
        program: ProgramId,
        first: u32,
        count: u32,
    },
    Flush,
    Discard,
}

/// Shared handle to the recorded command stream
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<Command>>>);

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: Command) {
        log::trace!("HeadlessContext: {:?}", command);
        self.0.lock().push(command);
    }

    /// Copy of every recorded command
    pub fn commands(&self) -> Vec<Command> {
        self.0.lock().clone()
    }

    /// Recorded draw commands in submission order
    pub fn draws(&self) -> Vec<Command> {
        self.filtered(|command| matches!(command, Command::Draw { .. }))
    }

    /// Recorded clears and draws in submission order
    pub fn clears_and_draws(&self) -> Vec<Command> {
        self.filtered(|command| matches!(command, Command::Clear { .. } | Command::Draw { .. }))
    }

    pub fn filtered(&self, predicate: impl Fn(&Command) -> bool) -> Vec<Command> {
        self.0.lock().iter().filter(|c| predicate(c)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug)]
struct HeadlessFramebuffer {
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct HeadlessBuffer {
    capacity: u64,
}

#[derive(Debug)]
struct HeadlessProgram {
    label: String,
    uniforms: UniformLayout,
    uniform_block: Vec<u8>,
    texture_units: u32,
}

/// Headless GPU context.
#[derive(Debug)]
pub struct HeadlessContext {
    next_id: u64,
    max_texture_size: u32,
    textures: HashMap<TextureId, TextureDescriptor>,
    framebuffers: HashMap<FramebufferId, HeadlessFramebuffer>,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    programs: HashMap<ProgramId, HeadlessProgram>,
    state: GpuState,
    log: CommandLog,
}

impl HeadlessContext {
    /// Create a new headless context.
    pub fn new() -> Self {
        Self::with_max_texture_size(DEFAULT_MAX_TEXTURE_SIZE)
    }

    pub fn with_max_texture_size(max_texture_size: u32) -> Self {
        log::info!(
            "HeadlessContext created (max texture size {})",
            max_texture_size
        );
        Self {
            next_id: 1,
            max_texture_size,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            state: GpuState::new(),
            log: CommandLog::new(),
        }
    }

    /// Shared handle to the command stream recorded by this context
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Number of live objects of every kind
    pub fn live_objects(&self) -> usize {
        self.textures.len() + self.framebuffers.len() + self.buffers.len() + self.programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Descriptor of a live texture
    pub fn texture_descriptor(&self, texture: TextureId) -> Option<&TextureDescriptor> {
        self.textures.get(&texture)
    }

    /// Current value of a uniform in a program's block, as raw bytes
    pub fn uniform_bytes(&self, program: ProgramId, name: &str, ty: UniformType) -> Option<&[u8]> {
        let program = self.programs.get(&program)?;
        let offset = program.uniforms.offset_of(name, ty).ok()? as usize;
        program
            .uniform_block
            .get(offset..offset + ty.size() as usize)
    }

    pub fn state(&self) -> &GpuState {
        &self.state
    }

    fn next_raw_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture(&self, texture: TextureId) -> BackendResult<&TextureDescriptor> {
        self.textures.get(&texture).ok_or(BackendError::UnknownObject {
            kind: "texture",
            id: texture.0,
        })
    }

    fn bound_framebuffer(&self) -> BackendResult<FramebufferId> {
        self.state
            .framebuffer()
            .ok_or(BackendError::NothingBound("framebuffer"))
    }

    fn bound_program(&mut self) -> BackendResult<(ProgramId, &mut HeadlessProgram)> {
        let id = self
            .state
            .program()
            .ok_or(BackendError::NothingBound("program"))?;
        let program = self
            .programs
            .get_mut(&id)
            .ok_or(BackendError::UnknownObject {
                kind: "program",
                id: id.0,
            })?;
        Ok((id, program))
    }
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsContext for HeadlessContext {
    fn name(&self) -> &'static str {
        "Headless"
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId> {
        if desc.width == 0
            || desc.height == 0
            || desc.width > self.max_texture_size
            || desc.height > self.max_texture_size
        {
            return Err(BackendError::InvalidTextureSize {
                width: desc.width,
                height: desc.height,
                max: self.max_texture_size,
            });
        }

        let texture = TextureId(self.next_raw_id());
        self.textures.insert(texture, desc.clone());
        self.log.push(Command::CreateTexture {
            texture,
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
            format: desc.format,
        });
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.state.forget_texture(texture);
            self.log.push(Command::DestroyTexture(texture));
        }
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferId> {
        let incomplete = |reason: String| {
            BackendError::FramebufferIncomplete(format!("'{}': {}", desc.label, reason))
        };

        if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
            return Err(incomplete("no attachments".into()));
        }

        let mut size: Option<(u32, u32)> = None;
        for &attachment in &desc.color_attachments {
            let texture = self.texture(attachment)?;
            if texture.format.is_depth() {
                return Err(incomplete(format!(
                    "depth texture '{}' used as color attachment",
                    texture.label
                )));
            }
            let dims = (texture.width, texture.height);
            if *size.get_or_insert(dims) != dims {
                return Err(incomplete("attachment sizes differ".into()));
            }
        }
        if let Some(depth) = desc.depth_attachment {
            let texture = self.texture(depth)?;
            if !texture.format.is_depth() {
                return Err(incomplete(format!(
                    "color texture '{}' used as depth attachment",
                    texture.label
                )));
            }
            let dims = (texture.width, texture.height);
            if *size.get_or_insert(dims) != dims {
                return Err(incomplete("attachment sizes differ".into()));
            }
        }

        let (width, height) = size.unwrap_or_default();
        let framebuffer = FramebufferId(self.next_raw_id());
        self.framebuffers
            .insert(framebuffer, HeadlessFramebuffer { width, height });
        self.log.push(Command::CreateFramebuffer {
            framebuffer,
            label: desc.label.clone(),
        });
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            self.state.forget_framebuffer(framebuffer);
            self.log.push(Command::DestroyFramebuffer(framebuffer));
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

        let buffer = BufferId(self.next_raw_id());
        self.buffers.insert(buffer, HeadlessBuffer { capacity });
        self.log.push(Command::CreateBuffer {
            buffer,
            label: label.to_string(),
            capacity,
        });
        Ok(buffer)
    }

    fn write_vertex_buffer(&mut self, buffer: BufferId, data: &[u8]) -> BackendResult<()> {
        let info = self.buffers.get(&buffer).ok_or(BackendError::UnknownObject {
            kind: "buffer",
            id: buffer.0,
        })?;
        if data.len() as u64 > info.capacity {
            return Err(BackendError::BufferOverflow {
                size: data.len() as u64,
                capacity: info.capacity,
            });
        }
        self.log.push(Command::WriteBuffer {
            buffer,
            size: data.len() as u64,
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            self.state.forget_buffer(buffer);
            self.log.push(Command::DestroyBuffer(buffer));
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId> {
        desc.validate()?;

        let uniforms = UniformLayout::new(&desc.uniforms);
        let program = ProgramId(self.next_raw_id());
        self.programs.insert(
            program,
            HeadlessProgram {
                label: desc.label.to_string(),
                uniform_block: vec![0; uniforms.size() as usize],
                uniforms,
                texture_units: desc.texture_units,
            },
        );
        self.log.push(Command::CreateProgram {
            program,
            label: desc.label.to_string(),
        });
        Ok(program)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.state.forget_program(program);
            self.log.push(Command::DestroyProgram(program));
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> BackendResult<()> {
        if !self.framebuffers.contains_key(&framebuffer) {
            return Err(BackendError::UnknownObject {
                kind: "framebuffer",
                id: framebuffer.0,
            });
        }
        if self.state.set_framebuffer(framebuffer) {
            self.log.push(Command::BindFramebuffer(framebuffer));
        }
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if self.state.set_viewport(viewport) {
            self.log.push(Command::SetViewport(viewport));
        }
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> BackendResult<()> {
        let framebuffer = self.bound_framebuffer()?;
        self.log.push(Command::Clear {
            framebuffer,
            color,
            depth,
        });
        Ok(())
    }

    fn use_program(&mut self, program: ProgramId) -> BackendResult<()> {
        if !self.programs.contains_key(&program) {
            return Err(BackendError::UnknownObject {
                kind: "program",
                id: program.0,
            });
        }
        if self.state.set_program(program) {
            self.log.push(Command::UseProgram(program));
        }
        Ok(())
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) -> BackendResult<()> {
        let (_, program) = self.bound_program()?;
        program.uniforms.write(&mut program.uniform_block, name, value)?;
        self.log.push(Command::SetUniform {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) -> BackendResult<()> {
        self.texture(texture)?;
        if self.state.set_texture(unit, texture)? {
            self.log.push(Command::BindTexture { unit, texture });
        }
        Ok(())
    }

    fn set_depth_test(&mut self, enabled: bool) {
        if self.state.set_depth_test(enabled) {
            self.log.push(Command::SetDepthTest(enabled));
        }
    }

    fn set_face_culling(&mut self, enabled: bool) {
        if self.state.set_face_culling(enabled) {
            self.log.push(Command::SetFaceCulling(enabled));
        }
    }

    fn set_blending(&mut self, enabled: bool) {
        if self.state.set_blending(enabled) {
            self.log.push(Command::SetBlending(enabled));
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) -> BackendResult<()> {
        if !self.buffers.contains_key(&buffer) {
            return Err(BackendError::UnknownObject {
                kind: "buffer",
                id: buffer.0,
            });
        }
        if self.state.set_vertex_buffer(buffer) {
            self.log.push(Command::BindVertexBuffer(buffer));
        }
        Ok(())
    }

    fn draw(&mut self, first: u32, count: u32) -> BackendResult<()> {
        let framebuffer = self.bound_framebuffer()?;
        if self.state.vertex_buffer().is_none() {
            return Err(BackendError::NothingBound("vertex buffer"));
        }
        let viewport_ok = self.framebuffers.get(&framebuffer).map_or(false, |fb| {
            fb.width > 0 && fb.height > 0
        });
        if !viewport_ok {
            return Err(BackendError::FramebufferIncomplete(format!(
                "framebuffer {} has no drawable size",
                framebuffer.0
            )));
        }

        let texture_units = {
            let (_, program) = self.bound_program()?;
            program.texture_units
        };
        for unit in 0..texture_units {
            if self.state.texture(unit).is_none() {
                return Err(BackendError::TextureUnitEmpty(unit));
            }
        }

        let (program, info) = self.bound_program()?;
        log::trace!("HeadlessContext: draw with '{}'", info.label);
        self.log.push(Command::Draw {
            framebuffer,
            program,
            first,
            count,
        });
        Ok(())
    }

    fn flush(&mut self) -> BackendResult<()> {
        self.log.push(Command::Flush);
        Ok(())
    }

    fn discard_pending(&mut self) {
        self.log.push(Command::Discard);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_SHADER: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

    fn program_desc(source: &'static str) -> ProgramDescriptor {
        ProgramDescriptor {
            label: "test".into(),
            source: source.into(),
            vertex_layout: VertexLayout::packed(&[VertexFormat::Float32x2]),
            uniforms: vec![],
            texture_units: 0,
        }
    }

    #[test]
    fn test_zero_sized_texture_fails() {
        let mut ctx = HeadlessContext::new();
        let err = ctx
            .create_texture(&TextureDescriptor::new_2d("t", 0, 16, TextureFormat::Rgba8Unorm))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidTextureSize { width: 0, .. }));
    }

    #[test]
    fn test_framebuffer_size_mismatch_fails() {
        let mut ctx = HeadlessContext::new();
        let a = ctx
            .create_texture(&TextureDescriptor::new_2d("a", 16, 16, TextureFormat::Rgba8Unorm))
            .unwrap();
        let b = ctx
            .create_texture(&TextureDescriptor::new_2d("b", 32, 16, TextureFormat::Rgba8Unorm))
            .unwrap();
        let err = ctx
            .create_framebuffer(&FramebufferDescriptor {
                label: "fb".into(),
                color_attachments: vec![a, b],
                depth_attachment: None,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::FramebufferIncomplete(_)));
    }

    #[test]
    fn test_invalid_shader_fails() {
        let mut ctx = HeadlessContext::new();
        let err = ctx.create_program(&program_desc("fn broken(")).unwrap_err();
        assert!(matches!(err, BackendError::ShaderCompilationFailed { .. }));
    }

    #[test]
    fn test_redundant_binds_are_not_recorded() {
        let mut ctx = HeadlessContext::new();
        let log = ctx.command_log();
        let color = ctx
            .create_texture(&TextureDescriptor::new_2d("c", 8, 8, TextureFormat::Rgba8Unorm))
            .unwrap();
        let fb = ctx
            .create_framebuffer(&FramebufferDescriptor {
                label: "fb".into(),
                color_attachments: vec![color],
                depth_attachment: None,
            })
            .unwrap();
        log.clear();

        ctx.bind_framebuffer(fb).unwrap();
        ctx.bind_framebuffer(fb).unwrap();
        ctx.set_viewport(Viewport::new(8, 8));
        ctx.set_viewport(Viewport::new(8, 8));

        assert_eq!(
            log.commands(),
            vec![
                Command::BindFramebuffer(fb),
                Command::SetViewport(Viewport::new(8, 8))
            ]
        );
    }

    #[test]
    fn test_draw_records_bound_state() {
        let mut ctx = HeadlessContext::new();
        let log = ctx.command_log();
        let color = ctx
            .create_texture(&TextureDescriptor::new_2d("c", 8, 8, TextureFormat::Rgba8Unorm))
            .unwrap();
        let fb = ctx
            .create_framebuffer(&FramebufferDescriptor {
                label: "fb".into(),
                color_attachments: vec![color],
                depth_attachment: None,
            })
            .unwrap();
        let program = ctx.create_program(&program_desc(MINIMAL_SHADER)).unwrap();
        let buffer = ctx
            .create_vertex_buffer("tri", &VertexLayout::packed(&[VertexFormat::Float32x2]), 24, &[0; 24])
            .unwrap();

        assert_eq!(
            ctx.draw(0, 3).unwrap_err(),
            BackendError::NothingBound("framebuffer")
        );

        ctx.bind_framebuffer(fb).unwrap();
        ctx.use_program(program).unwrap();
        ctx.bind_vertex_buffer(buffer).unwrap();
        ctx.draw(0, 3).unwrap();

        assert_eq!(
            log.draws(),
            vec![Command::Draw {
                framebuffer: fb,
                program,
                first: 0,
                count: 3
            }]
        );
    }
}
