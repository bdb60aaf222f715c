//! Core backend abstraction traits
//!
//! [`GraphicsContext`] is the GL-state-style interface the render graph drives. Both the
//! headless recording context and the wgpu context implement it.

use crate::backend::types::*;
use std::any::Any;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Invalid texture size {width}x{height} (max {max})")]
    InvalidTextureSize { width: u32, height: u32, max: u32 },
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Incomplete framebuffer: {0}")]
    FramebufferIncomplete(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to compile shader program '{label}': {message}")]
    ShaderCompilationFailed { label: String, message: String },
    #[error("Program has no uniform named '{0}'")]
    UnknownUniform(String),
    #[error("Uniform '{name}' expects {expected:?}, got {actual:?}")]
    UniformTypeMismatch {
        name: String,
        expected: UniformType,
        actual: UniformType,
    },
    #[error("No {0} is bound")]
    NothingBound(&'static str),
    #[error("Texture unit {0} has no texture bound")]
    TextureUnitEmpty(u32),
    #[error("Unknown {kind} object {id}")]
    UnknownObject { kind: &'static str, id: u64 },
    #[error("Vertex data of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    BufferOverflow { size: u64, capacity: u64 },
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

/// Handle to a framebuffer (a set of attachments)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub(crate) u64);

/// Handle to a vertex buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u64);

macro_rules! impl_raw_id {
    ($($ty:ident),*) => {
        $(impl $ty {
            /// Raw backend identifier
            pub fn raw(self) -> u64 {
                self.0
            }
        })*
    };
}

impl_raw_id!(TextureId, FramebufferId, BufferId, ProgramId);

/// GPU context consumed by the render graph.
///
/// All calls happen on one thread against one live context. Binding calls are
/// cheap to repeat: implementations skip redundant state changes.
pub trait GraphicsContext: Any {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Largest supported texture dimension
    fn max_texture_size(&self) -> u32;

    // Object creation

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureId>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> BackendResult<FramebufferId>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Create a vertex buffer. `capacity` is in bytes and must hold `data`.
    fn create_vertex_buffer(
        &mut self,
        label: &str,
        layout: &VertexLayout,
        capacity: u64,
        data: &[u8],
    ) -> BackendResult<BufferId>;

    /// Overwrite the start of a vertex buffer
    fn write_vertex_buffer(&mut self, buffer: BufferId, data: &[u8]) -> BackendResult<()>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramId>;

    fn destroy_program(&mut self, program: ProgramId);

    // State

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> BackendResult<()>;

    fn set_viewport(&mut self, viewport: Viewport);

    /// Clear the bound framebuffer
    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> BackendResult<()>;

    fn use_program(&mut self, program: ProgramId) -> BackendResult<()>;

    /// Set a uniform on the program in use
    fn set_uniform(&mut self, name: &str, value: UniformValue) -> BackendResult<()>;

    fn bind_texture(&mut self, unit: u32, texture: TextureId) -> BackendResult<()>;

    fn set_depth_test(&mut self, enabled: bool);

    fn set_face_culling(&mut self, enabled: bool);

    fn set_blending(&mut self, enabled: bool);

    fn bind_vertex_buffer(&mut self, buffer: BufferId) -> BackendResult<()>;

    // Commands

    /// Draw `count` vertices from the bound vertex buffer into the bound framebuffer
    fn draw(&mut self, first: u32, count: u32) -> BackendResult<()>;

    /// Submit recorded work
    fn flush(&mut self) -> BackendResult<()>;

    /// Drop recorded work that has not been submitted
    fn discard_pending(&mut self);

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
