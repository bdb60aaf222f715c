//! Logical resources declared by passes
//!
//! Handles are small `Copy` values that identify a resource inside exactly one pipeline.
//! They never own GPU objects: the stable name, kind and options live in the pipeline's
//! [`DeclarationTable`], and [`PipelineResources`](super::PipelineResources) maps names to
//! cached GPU objects when a pass asks for them.

use crate::backend::types::*;
use crate::render_graph::error::{RenderGraphError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one [`RenderPipeline`](super::RenderPipeline) instance.
///
/// `PipelineId::default()` is the null id, which no pipeline ever receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipelineId(pub(crate) u64);

impl PipelineId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Index of a resource inside its pipeline's declaration table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    RenderTarget,
    Framebuffer,
}

/// Common interface of the typed handles
pub trait ResourceHandle: Copy {
    const KIND: ResourceKind;

    fn id(&self) -> ResourceId;

    fn pipeline(&self) -> PipelineId;
}

macro_rules! sized_handle {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name {
            pub(crate) id: ResourceId,
            pub(crate) pipeline: PipelineId,
            pub(crate) width: u32,
            pub(crate) height: u32,
        }

        impl $name {
            pub fn width(&self) -> u32 {
                self.width
            }

            pub fn height(&self) -> u32 {
                self.height
            }
        }

        impl ResourceHandle for $name {
            const KIND: ResourceKind = $kind;

            fn id(&self) -> ResourceId {
                self.id
            }

            fn pipeline(&self) -> PipelineId {
                self.pipeline
            }
        }
    };
}

sized_handle!(
    /// Handle to a declared texture
    TextureHandle,
    ResourceKind::Texture
);

sized_handle!(
    /// Handle to a declared render target: a framebuffer with its own sized attachments
    RenderTargetHandle,
    ResourceKind::RenderTarget
);

/// Handle to a declared framebuffer assembled from texture attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferHandle {
    pub(crate) id: ResourceId,
    pub(crate) pipeline: PipelineId,
}

impl ResourceHandle for FramebufferHandle {
    const KIND: ResourceKind = ResourceKind::Framebuffer;

    fn id(&self) -> ResourceId {
        self.id
    }

    fn pipeline(&self) -> PipelineId {
        self.pipeline
    }
}

/// Texture creation options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureOptions {
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        }
    }
}

impl TextureOptions {
    pub fn with_format(format: TextureFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }
}

/// Render target creation options
///
/// With no explicit colour attachments the target gets one implicit `"<name>.color"`
/// texture in `color_format`. A depth format adds an implicit `"<name>.depth"` texture.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetOptions {
    pub color_attachments: Vec<TextureHandle>,
    pub color_format: TextureFormat,
    pub depth: Option<TextureFormat>,
}

impl Default for RenderTargetOptions {
    fn default() -> Self {
        Self {
            color_attachments: Vec::new(),
            color_format: TextureFormat::Rgba8Unorm,
            depth: Some(TextureFormat::Depth32Float),
        }
    }
}

impl RenderTargetOptions {
    /// Explicit colour attachments without a depth buffer
    pub fn with_attachments(color_attachments: Vec<TextureHandle>) -> Self {
        Self {
            color_attachments,
            depth: None,
            ..Default::default()
        }
    }

    pub fn depth(mut self, format: Option<TextureFormat>) -> Self {
        self.depth = format;
        self
    }
}

/// Final render target supplied by the caller when building a pipeline.
///
/// It is declared like any other render target, so its GPU objects are cached under
/// `name` and survive from frame to frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTarget {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub color_format: TextureFormat,
    pub depth: Option<TextureFormat>,
}

impl ExternalTarget {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            color_format: TextureFormat::Rgba8Unorm,
            depth: Some(TextureFormat::Depth32Float),
        }
    }
}

/// What a declaration describes
#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationKind {
    Texture {
        width: u32,
        height: u32,
        options: TextureOptions,
    },
    RenderTarget {
        width: u32,
        height: u32,
        color_attachments: Vec<ResourceId>,
        depth_attachment: Option<ResourceId>,
    },
    Framebuffer {
        color_attachments: Vec<ResourceId>,
        depth_attachment: Option<ResourceId>,
    },
}

/// A named logical resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDeclaration {
    pub name: String,
    pub kind: DeclarationKind,
}

impl ResourceDeclaration {
    pub fn resource_kind(&self) -> ResourceKind {
        match self.kind {
            DeclarationKind::Texture { .. } => ResourceKind::Texture,
            DeclarationKind::RenderTarget { .. } => ResourceKind::RenderTarget,
            DeclarationKind::Framebuffer { .. } => ResourceKind::Framebuffer,
        }
    }

    /// Backend descriptor of a texture declaration
    pub fn texture_descriptor(&self) -> Option<TextureDescriptor> {
        match self.kind {
            DeclarationKind::Texture {
                width,
                height,
                options,
            } => Some(TextureDescriptor {
                label: self.name.clone(),
                width,
                height,
                format: options.format,
                filter: options.filter,
                address_mode: options.address_mode,
            }),
            _ => None,
        }
    }
}

/// Every resource declared in one pipeline, indexed by [`ResourceId`]
#[derive(Debug, Clone)]
pub struct DeclarationTable {
    pipeline: PipelineId,
    declarations: Vec<ResourceDeclaration>,
    names: HashMap<String, ResourceId>,
}

impl DeclarationTable {
    pub fn new(pipeline: PipelineId) -> Self {
        Self {
            pipeline,
            declarations: Vec::new(),
            names: HashMap::new(),
        }
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &ResourceDeclaration)> {
        self.declarations
            .iter()
            .enumerate()
            .map(|(index, decl)| (ResourceId(index as u32), decl))
    }

    /// Look up a resource by its stable name
    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.names.get(name).copied()
    }

    pub(crate) fn declare(&mut self, name: String, kind: DeclarationKind) -> Result<ResourceId> {
        if self.names.contains_key(&name) {
            return Err(RenderGraphError::DuplicateResource(name));
        }
        let id = ResourceId(self.declarations.len() as u32);
        self.names.insert(name.clone(), id);
        self.declarations.push(ResourceDeclaration { name, kind });
        Ok(id)
    }

    /// Fail unless the handle was issued by this table's pipeline
    pub fn check_owner<H: ResourceHandle>(&self, handle: &H) -> Result<()> {
        if handle.pipeline() != self.pipeline {
            return Err(RenderGraphError::ForeignResource {
                resource: handle.id(),
                owner: handle.pipeline(),
                pipeline: self.pipeline,
            });
        }
        Ok(())
    }

    pub fn get(&self, id: ResourceId) -> Result<&ResourceDeclaration> {
        self.declarations
            .get(id.index())
            .ok_or(RenderGraphError::UnknownResource(id))
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Result<&mut ResourceDeclaration> {
        self.declarations
            .get_mut(id.index())
            .ok_or(RenderGraphError::UnknownResource(id))
    }

    /// Resolve a handle after checking owner and kind
    pub fn resolve<H: ResourceHandle>(&self, handle: &H) -> Result<&ResourceDeclaration> {
        self.check_owner(handle)?;
        let decl = self.get(handle.id())?;
        if decl.resource_kind() != H::KIND {
            return Err(RenderGraphError::ResourceKindMismatch {
                name: decl.name.clone(),
                expected: H::KIND,
                actual: decl.resource_kind(),
            });
        }
        Ok(decl)
    }

    /// Declare a render target and its implicit attachments
    pub(crate) fn declare_render_target(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        options: RenderTargetOptions,
    ) -> Result<RenderTargetHandle> {
        for attachment in &options.color_attachments {
            self.resolve(attachment)?;
        }

        let mut color_attachments: Vec<ResourceId> =
            options.color_attachments.iter().map(|h| h.id).collect();
        if color_attachments.is_empty() {
            color_attachments.push(self.declare(
                format!("{name}.color"),
                DeclarationKind::Texture {
                    width,
                    height,
                    options: TextureOptions::with_format(options.color_format),
                },
            )?);
        }
        let depth_attachment = options
            .depth
            .map(|format| {
                self.declare(
                    format!("{name}.depth"),
                    DeclarationKind::Texture {
                        width,
                        height,
                        options: TextureOptions {
                            format,
                            filter: FilterMode::Nearest,
                            address_mode: AddressMode::ClampToEdge,
                        },
                    },
                )
            })
            .transpose()?;

        let id = self.declare(
            name.to_string(),
            DeclarationKind::RenderTarget {
                width,
                height,
                color_attachments,
                depth_attachment,
            },
        )?;
        Ok(RenderTargetHandle {
            id,
            pipeline: self.pipeline,
            width,
            height,
        })
    }

    pub(crate) fn declare_external(&mut self, target: &ExternalTarget) -> Result<RenderTargetHandle> {
        self.declare_render_target(
            &target.name,
            target.width,
            target.height,
            RenderTargetOptions {
                color_attachments: Vec::new(),
                color_format: target.color_format,
                depth: target.depth,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_target_declares_implicit_attachments() {
        let mut table = DeclarationTable::new(PipelineId::next());
        let target = table
            .declare_render_target("scene", 64, 32, RenderTargetOptions::default())
            .unwrap();

        assert_eq!(table.len(), 3);
        assert!(table.find("scene.color").is_some());
        assert!(table.find("scene.depth").is_some());
        assert_eq!((target.width(), target.height()), (64, 32));

        let decl = table.resolve(&target).unwrap();
        match &decl.kind {
            DeclarationKind::RenderTarget {
                color_attachments,
                depth_attachment,
                ..
            } => {
                assert_eq!(color_attachments.len(), 1);
                assert!(depth_attachment.is_some());
            }
            other => panic!("unexpected declaration {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut table = DeclarationTable::new(PipelineId::next());
        table
            .declare(
                "a".into(),
                DeclarationKind::Framebuffer {
                    color_attachments: vec![],
                    depth_attachment: None,
                },
            )
            .unwrap();
        let err = table
            .declare(
                "a".into(),
                DeclarationKind::Framebuffer {
                    color_attachments: vec![],
                    depth_attachment: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, RenderGraphError::DuplicateResource(name) if name == "a"));
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut a = DeclarationTable::new(PipelineId::next());
        let b = DeclarationTable::new(PipelineId::next());
        let target = a
            .declare_render_target("t", 4, 4, RenderTargetOptions::default())
            .unwrap();

        assert!(matches!(
            b.resolve(&target),
            Err(RenderGraphError::ForeignResource { .. })
        ));
        assert!(matches!(
            a.resolve(&RenderTargetHandle::default()),
            Err(RenderGraphError::ForeignResource { .. })
        ));
    }
}
