//! Common types shared between backends

use crate::backend::traits::{BackendError, BackendResult, TextureId};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::borrow::Cow;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Filter mode for sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Address mode for sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Texture descriptor
///
/// Two descriptors compare equal exactly when the backing object can be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

impl TextureDescriptor {
    pub fn new_2d(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
            filter: FilterMode::default(),
            address_mode: AddressMode::default(),
        }
    }
}

/// Framebuffer descriptor: attachments are existing textures
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferDescriptor {
    pub label: String,
    pub color_attachments: Vec<TextureId>,
    pub depth_attachment: Option<TextureId>,
}

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Build a tightly packed layout from consecutive attribute formats
    pub fn packed(formats: &[VertexFormat]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, format)| {
                let attribute = VertexAttribute {
                    location: location as u32,
                    format: *format,
                    offset,
                };
                offset += format.size();
                attribute
            })
            .collect();
        Self {
            array_stride: offset,
            attributes,
        }
    }
}

/// Fullscreen quad vertex: clip-space position and texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: Vec2,
    pub uv: Vec2,
}

impl QuadVertex {
    pub fn layout() -> VertexLayout {
        VertexLayout::packed(&[VertexFormat::Float32x2, VertexFormat::Float32x2])
    }
}

/// Mesh vertex with position and normal
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self { position, normal }
    }

    pub fn layout() -> VertexLayout {
        VertexLayout::packed(&[VertexFormat::Float32x3, VertexFormat::Float32x3])
    }
}

/// Overlay vertex in clip space with a straight-alpha color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

impl UiVertex {
    pub fn new(position: Vec2, color: Vec4) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
        }
    }

    pub fn layout() -> VertexLayout {
        VertexLayout::packed(&[VertexFormat::Float32x2, VertexFormat::Float32x4])
    }
}

/// Uniform value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    UInt,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    /// Size in bytes inside a WGSL uniform block
    pub fn size(&self) -> u64 {
        match self {
            UniformType::Float | UniformType::Int | UniformType::UInt => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Mat4 => 64,
        }
    }

    /// Alignment inside a WGSL uniform block
    pub fn alignment(&self) -> u64 {
        match self {
            UniformType::Float | UniformType::Int | UniformType::UInt => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 | UniformType::Vec4 | UniformType::Mat4 => 16,
        }
    }
}

/// A typed uniform value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::UInt(_) => UniformType::UInt,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        let bytes: &[u8] = match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v),
            UniformValue::Int(v) => bytemuck::bytes_of(v),
            UniformValue::UInt(v) => bytemuck::bytes_of(v),
            UniformValue::Vec2(v) => bytemuck::bytes_of(v),
            UniformValue::Vec3(v) => bytemuck::bytes_of(v),
            UniformValue::Vec4(v) => bytemuck::bytes_of(v),
            UniformValue::Mat4(v) => bytemuck::bytes_of(v),
        };
        out[..bytes.len()].copy_from_slice(bytes);
    }
}

/// Uniform declaration of a program
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformDecl {
    pub name: Cow<'static, str>,
    pub ty: UniformType,
}

impl UniformDecl {
    pub const fn new(name: &'static str, ty: UniformType) -> Self {
        Self {
            name: Cow::Borrowed(name),
            ty,
        }
    }
}

#[derive(Debug, Clone)]
struct UniformSlot {
    name: Cow<'static, str>,
    ty: UniformType,
    offset: u64,
}

/// Byte layout of a program's uniform block.
///
/// Members are laid out in declaration order with WGSL uniform address space alignment,
/// so a WGSL struct declaring the same members in the same order matches it.
#[derive(Debug, Clone)]
pub struct UniformLayout {
    slots: Vec<UniformSlot>,
    size: u64,
}

impl UniformLayout {
    pub fn new(uniforms: &[UniformDecl]) -> Self {
        let mut offset = 0u64;
        let mut struct_align = 16u64;
        let slots = uniforms
            .iter()
            .map(|decl| {
                let align = decl.ty.alignment();
                struct_align = struct_align.max(align);
                offset = offset.next_multiple_of(align);
                let slot = UniformSlot {
                    name: decl.name.clone(),
                    ty: decl.ty,
                    offset,
                };
                offset += decl.ty.size();
                slot
            })
            .collect();

        Self {
            slots,
            size: offset.next_multiple_of(struct_align),
        }
    }

    /// Block size in bytes (zero when the program declares no uniforms)
    pub fn size(&self) -> u64 {
        if self.slots.is_empty() {
            0
        } else {
            self.size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Offset of a uniform after checking its type
    pub fn offset_of(&self, name: &str, ty: UniformType) -> BackendResult<u64> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.name == name)
            .ok_or_else(|| BackendError::UnknownUniform(name.to_string()))?;
        if slot.ty != ty {
            return Err(BackendError::UniformTypeMismatch {
                name: name.to_string(),
                expected: slot.ty,
                actual: ty,
            });
        }
        Ok(slot.offset)
    }

    /// Write a value into a CPU-side copy of the block
    pub fn write(&self, block: &mut [u8], name: &str, value: UniformValue) -> BackendResult<()> {
        let offset = self.offset_of(name, value.ty())? as usize;
        value.write_to(&mut block[offset..]);
        Ok(())
    }
}

/// Shader program descriptor.
///
/// `source` is WGSL with `vs_main` and `fs_main` entry points. Uniforms live in one block at
/// `@group(0) @binding(0)`; texture unit `n` is `@group(1) @binding(2n)` with its sampler at
/// `@binding(2n + 1)`.
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: Cow<'static, str>,
    pub source: Cow<'static, str>,
    pub vertex_layout: VertexLayout,
    pub uniforms: Vec<UniformDecl>,
    pub texture_units: u32,
}

impl ProgramDescriptor {
    /// Parse and validate the WGSL source and check both entry points exist
    pub fn validate(&self) -> BackendResult<()> {
        let fail = |message: String| BackendError::ShaderCompilationFailed {
            label: self.label.to_string(),
            message,
        };

        let module = naga::front::wgsl::parse_str(&self.source)
            .map_err(|e| fail(e.emit_to_string(&self.source)))?;

        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .map_err(|e| fail(e.emit_to_string(&self.source)))?;

        for (entry, stage) in [
            ("vs_main", naga::ShaderStage::Vertex),
            ("fs_main", naga::ShaderStage::Fragment),
        ] {
            if !module
                .entry_points
                .iter()
                .any(|ep| ep.name == entry && ep.stage == stage)
            {
                return Err(fail(format!("missing entry point '{entry}'")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_vertex_layout() {
        let layout = MeshVertex::layout();
        assert_eq!(layout.array_stride, 24);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.array_stride, std::mem::size_of::<MeshVertex>() as u64);
        assert_eq!(
            UiVertex::layout().array_stride,
            std::mem::size_of::<UiVertex>() as u64
        );
    }

    #[test]
    fn test_uniform_layout_alignment() {
        let layout = UniformLayout::new(&[
            UniformDecl::new("intensity", UniformType::Float),
            UniformDecl::new("direction", UniformType::Vec3),
            UniformDecl::new("model", UniformType::Mat4),
            UniformDecl::new("flag", UniformType::UInt),
        ]);

        assert_eq!(layout.offset_of("intensity", UniformType::Float), Ok(0));
        assert_eq!(layout.offset_of("direction", UniformType::Vec3), Ok(16));
        assert_eq!(layout.offset_of("model", UniformType::Mat4), Ok(32));
        assert_eq!(layout.offset_of("flag", UniformType::UInt), Ok(96));
        assert_eq!(layout.size(), 112);
    }

    #[test]
    fn test_uniform_layout_rejects_wrong_type() {
        let layout = UniformLayout::new(&[UniformDecl::new("color", UniformType::Vec4)]);
        let mut block = vec![0u8; layout.size() as usize];

        let err = layout
            .write(&mut block, "color", UniformValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, BackendError::UniformTypeMismatch { .. }));

        let err = layout
            .write(&mut block, "missing", UniformValue::Float(1.0))
            .unwrap_err();
        assert_eq!(err, BackendError::UnknownUniform("missing".into()));

        layout
            .write(&mut block, "color", UniformValue::Vec4(Vec4::ONE))
            .unwrap();
        assert_eq!(&block[0..4], &1.0f32.to_ne_bytes());
    }
}
