//! GPU object cache behind the render graph
//!
//! [`PipelineResources`] lives as long as the graphics context it owns. Pipelines come and
//! go every frame, but the objects their declarations resolve to are cached here by name
//! and reused for as long as the descriptor stays the same.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::error::{RenderGraphError, Result};
use crate::render_graph::resource::*;
use std::any::{type_name, Any};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;

/// A resolved texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// A resolved render target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub framebuffer: FramebufferId,
    pub color_attachments: Vec<TextureId>,
    pub depth_attachment: Option<TextureId>,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    /// First colour attachment
    pub fn color(&self) -> Option<TextureId> {
        self.color_attachments.first().copied()
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }
}

/// A resolved framebuffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    pub id: FramebufferId,
    pub color_attachments: Vec<TextureId>,
    pub depth_attachment: Option<TextureId>,
    pub width: u32,
    pub height: u32,
}

/// Cache counters since the resources were created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub allocations: u64,
    pub releases: u64,
    pub reuses: u64,
}

/// A context-lifetime object cached under a caller-chosen key.
///
/// The cache calls `release` exactly once, when the entry is dropped.
pub trait StaticResource: Any {
    fn release(self: Box<Self>, context: &mut dyn GraphicsContext);

    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Vertex buffer owned by the static cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBuffer {
    pub buffer: BufferId,
    pub vertex_count: u32,
    pub capacity: u32,
}

impl VertexBuffer {
    /// Upload `vertices` into a buffer that holds exactly that many
    pub fn from_vertices<V: bytemuck::Pod>(
        context: &mut dyn GraphicsContext,
        label: &str,
        layout: &VertexLayout,
        vertices: &[V],
    ) -> BackendResult<Self> {
        Self::with_capacity(context, label, layout, vertices.len() as u32, vertices)
    }

    /// Create a buffer for up to `capacity` vertices, filled with `vertices`
    pub fn with_capacity<V: bytemuck::Pod>(
        context: &mut dyn GraphicsContext,
        label: &str,
        layout: &VertexLayout,
        capacity: u32,
        vertices: &[V],
    ) -> BackendResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let buffer = context.create_vertex_buffer(
            label,
            layout,
            capacity as u64 * layout.array_stride,
            bytes,
        )?;
        Ok(Self {
            buffer,
            vertex_count: vertices.len() as u32,
            capacity,
        })
    }
}

impl StaticResource for VertexBuffer {
    fn release(self: Box<Self>, context: &mut dyn GraphicsContext) {
        context.destroy_buffer(self.buffer);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shader program owned by the static cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderProgram {
    pub program: ProgramId,
}

impl ShaderProgram {
    pub fn new(context: &mut dyn GraphicsContext, desc: &ProgramDescriptor) -> BackendResult<Self> {
        Ok(Self {
            program: context.create_program(desc)?,
        })
    }
}

impl StaticResource for ShaderProgram {
    fn release(self: Box<Self>, context: &mut dyn GraphicsContext) {
        context.destroy_program(self.program);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Cached<T, D> {
    object: T,
    desc: D,
}

/// Cache key of a render target: its attachments plus the declared size
#[derive(Debug, Clone, PartialEq)]
struct RenderTargetDescriptor {
    framebuffer: FramebufferDescriptor,
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct ActiveFrame {
    index: u64,
    table: DeclarationTable,
}

/// Cache of concrete GPU objects keyed by stable resource names.
pub struct PipelineResources {
    context: Box<dyn GraphicsContext>,
    textures: HashMap<String, Cached<Texture, TextureDescriptor>>,
    render_targets: HashMap<String, Cached<RenderTarget, RenderTargetDescriptor>>,
    framebuffers: HashMap<String, Cached<Framebuffer, FramebufferDescriptor>>,
    statics: HashMap<String, Box<dyn StaticResource>>,
    frame: Option<ActiveFrame>,
    stats: CacheStats,
}

/// Reuse the cached object under `name` if its descriptor matches, otherwise release it and
/// allocate a replacement.
#[allow(clippy::too_many_arguments)]
fn reconcile<'c, T, D: PartialEq + Debug>(
    cache: &'c mut HashMap<String, Cached<T, D>>,
    context: &mut dyn GraphicsContext,
    stats: &mut CacheStats,
    name: &str,
    desc: D,
    release: fn(&mut dyn GraphicsContext, &T),
    allocate: impl FnOnce(&mut dyn GraphicsContext, &D) -> BackendResult<T>,
) -> Result<&'c T> {
    let allocation_error = |desc: &D, source: BackendError| RenderGraphError::Allocation {
        name: name.to_string(),
        descriptor: format!("{desc:?}"),
        source,
    };

    if name.is_empty() {
        return Err(allocation_error(
            &desc,
            BackendError::TextureCreationFailed("resource name is empty".into()),
        ));
    }

    let cached = match cache.remove(name) {
        Some(cached) if cached.desc == desc => {
            stats.reuses += 1;
            cached
        }
        stale => {
            if let Some(stale) = stale {
                log::debug!("Descriptor of '{}' changed, releasing the old object", name);
                release(context, &stale.object);
                stats.releases += 1;
            }
            let object = allocate(context, &desc).map_err(|source| allocation_error(&desc, source))?;
            log::debug!("Allocated '{}': {:?}", name, desc);
            stats.allocations += 1;
            Cached { object, desc }
        }
    };

    Ok(&cache.entry(name.to_string()).or_insert(cached).object)
}

impl PipelineResources {
    pub fn new(context: Box<dyn GraphicsContext>) -> Self {
        log::info!("Pipeline resources created on {} context", context.name());
        Self {
            context,
            textures: HashMap::new(),
            render_targets: HashMap::new(),
            framebuffers: HashMap::new(),
            statics: HashMap::new(),
            frame: None,
            stats: CacheStats::default(),
        }
    }

    pub fn context(&self) -> &dyn GraphicsContext {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> &mut dyn GraphicsContext {
        self.context.as_mut()
    }

    /// Get the context as its concrete type
    pub fn context_as<C: GraphicsContext>(&self) -> Option<&C> {
        self.context.as_any().downcast_ref::<C>()
    }

    pub fn context_as_mut<C: GraphicsContext>(&mut self) -> Option<&mut C> {
        self.context.as_any_mut().downcast_mut::<C>()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Index of the executing frame, if any
    pub fn current_frame(&self) -> Option<u64> {
        self.frame.as_ref().map(|frame| frame.index)
    }

    pub(crate) fn begin_frame(&mut self, index: u64, table: DeclarationTable) {
        log::trace!("Begin frame {} with {} declarations", index, table.len());
        self.frame = Some(ActiveFrame { index, table });
    }

    /// Finish the frame and submit its work
    pub(crate) fn end_frame(&mut self) -> Result<()> {
        self.frame = None;
        self.context.flush()?;
        Ok(())
    }

    /// Drop the frame's declarations and its unsubmitted work
    pub(crate) fn abort_frame(&mut self) {
        if let Some(frame) = self.frame.take() {
            log::debug!("Frame {} aborted", frame.index);
        }
        self.context.discard_pending();
    }

    fn table(&self) -> Result<&DeclarationTable> {
        self.frame
            .as_ref()
            .map(|frame| &frame.table)
            .ok_or(RenderGraphError::NoActiveFrame)
    }

    fn texture_by_id(&mut self, id: ResourceId) -> Result<TextureId> {
        let desc = {
            let decl = self.table()?.get(id)?;
            decl.texture_descriptor()
                .ok_or_else(|| RenderGraphError::ResourceKindMismatch {
                    name: decl.name.clone(),
                    expected: ResourceKind::Texture,
                    actual: decl.resource_kind(),
                })?
        };
        Ok(self.ensure_texture(desc)?.id)
    }

    fn ensure_texture(&mut self, desc: TextureDescriptor) -> Result<&Texture> {
        let name = desc.label.clone();
        reconcile(
            &mut self.textures,
            self.context.as_mut(),
            &mut self.stats,
            &name,
            desc,
            |context, texture| context.destroy_texture(texture.id),
            |context, desc| {
                Ok(Texture {
                    id: context.create_texture(desc)?,
                    width: desc.width,
                    height: desc.height,
                    format: desc.format,
                })
            },
        )
    }

    /// Resolve attachment ids of a render target or framebuffer declaration
    fn resolve_attachments(
        &mut self,
        id: ResourceId,
        expected: ResourceKind,
    ) -> Result<(String, Vec<TextureId>, Option<TextureId>)> {
        let (name, colors, depth) = {
            let decl = self.table()?.get(id)?;
            match &decl.kind {
                DeclarationKind::RenderTarget {
                    color_attachments,
                    depth_attachment,
                    ..
                }
                | DeclarationKind::Framebuffer {
                    color_attachments,
                    depth_attachment,
                } if decl.resource_kind() == expected => {
                    (decl.name.clone(), color_attachments.clone(), *depth_attachment)
                }
                _ => {
                    return Err(RenderGraphError::ResourceKindMismatch {
                        name: decl.name.clone(),
                        expected,
                        actual: decl.resource_kind(),
                    })
                }
            }
        };

        let colors = colors
            .into_iter()
            .map(|id| self.texture_by_id(id))
            .collect::<Result<Vec<_>>>()?;
        let depth = depth.map(|id| self.texture_by_id(id)).transpose()?;
        Ok((name, colors, depth))
    }

    /// Resolve a texture, allocating it on first use or after its descriptor changed
    pub fn get_texture(&mut self, handle: TextureHandle) -> Result<&Texture> {
        let desc = {
            let decl = self.table()?.resolve(&handle)?;
            decl.texture_descriptor()
                .ok_or_else(|| RenderGraphError::ResourceKindMismatch {
                    name: decl.name.clone(),
                    expected: ResourceKind::Texture,
                    actual: decl.resource_kind(),
                })?
        };
        self.ensure_texture(desc)
    }

    /// Resolve a render target with its attachments.
    ///
    /// Every attachment must match the size the target was declared with.
    pub fn get_render_target(&mut self, handle: RenderTargetHandle) -> Result<&RenderTarget> {
        self.table()?.resolve(&handle)?;
        let (name, colors, depth) = self.resolve_attachments(handle.id, ResourceKind::RenderTarget)?;
        let (width, height) = (handle.width, handle.height);

        let desc = RenderTargetDescriptor {
            framebuffer: FramebufferDescriptor {
                label: name.clone(),
                color_attachments: colors,
                depth_attachment: depth,
            },
            width,
            height,
        };
        if let Some(texture) = desc
            .framebuffer
            .color_attachments
            .iter()
            .chain(desc.framebuffer.depth_attachment.iter())
            .filter_map(|id| self.textures.values().find(|t| t.object.id == *id))
            .find(|t| (t.object.width, t.object.height) != (width, height))
        {
            return Err(RenderGraphError::Allocation {
                name,
                descriptor: format!("{desc:?}"),
                source: BackendError::FramebufferIncomplete(format!(
                    "attachment '{}' is {}x{}, render target is declared {}x{}",
                    texture.desc.label, texture.object.width, texture.object.height, width, height
                )),
            });
        }

        reconcile(
            &mut self.render_targets,
            self.context.as_mut(),
            &mut self.stats,
            &name,
            desc,
            |context, target| context.destroy_framebuffer(target.framebuffer),
            |context, desc| {
                Ok(RenderTarget {
                    framebuffer: context.create_framebuffer(&desc.framebuffer)?,
                    color_attachments: desc.framebuffer.color_attachments.clone(),
                    depth_attachment: desc.framebuffer.depth_attachment,
                    width: desc.width,
                    height: desc.height,
                })
            },
        )
    }

    /// Resolve a framebuffer assembled from texture attachments
    pub fn get_framebuffer(&mut self, handle: FramebufferHandle) -> Result<&Framebuffer> {
        self.table()?.resolve(&handle)?;
        let (name, colors, depth) = self.resolve_attachments(handle.id, ResourceKind::Framebuffer)?;

        let size = colors
            .first()
            .or(depth.as_ref())
            .and_then(|id| self.textures.values().find(|t| t.object.id == *id))
            .map(|t| (t.object.width, t.object.height))
            .unwrap_or_default();

        let desc = FramebufferDescriptor {
            label: name.clone(),
            color_attachments: colors,
            depth_attachment: depth,
        };
        reconcile(
            &mut self.framebuffers,
            self.context.as_mut(),
            &mut self.stats,
            &name,
            desc,
            |context, framebuffer| context.destroy_framebuffer(framebuffer.id),
            |context, desc| {
                Ok(Framebuffer {
                    id: context.create_framebuffer(desc)?,
                    color_attachments: desc.color_attachments.clone(),
                    depth_attachment: desc.depth_attachment,
                    width: size.0,
                    height: size.1,
                })
            },
        )
    }

    /// Bind a render target and set the viewport to its size
    pub fn activate_render_target(&mut self, handle: RenderTargetHandle) -> Result<()> {
        let (framebuffer, viewport) = {
            let target = self.get_render_target(handle)?;
            (target.framebuffer, target.viewport())
        };
        self.context.bind_framebuffer(framebuffer)?;
        self.context.set_viewport(viewport);
        Ok(())
    }

    /// Bind a framebuffer and set the viewport to its size
    pub fn activate_framebuffer(&mut self, handle: FramebufferHandle) -> Result<()> {
        let (framebuffer, viewport) = {
            let fb = self.get_framebuffer(handle)?;
            (fb.id, Viewport::new(fb.width, fb.height))
        };
        self.context.bind_framebuffer(framebuffer)?;
        self.context.set_viewport(viewport);
        Ok(())
    }

    /// Resolve a texture and bind it to a texture unit
    pub fn bind_texture(&mut self, unit: u32, handle: TextureHandle) -> Result<()> {
        let texture = self.get_texture(handle)?.id;
        self.context.bind_texture(unit, texture)?;
        Ok(())
    }

    /// Get the static resource cached under `key`, calling `factory` only if there is none.
    ///
    /// Static resources outlive frames and pipelines. Asking for an existing key with a
    /// different type fails with `StaticResourceTypeMismatch`.
    pub fn cache_static_resource<T, F>(&mut self, key: &str, factory: F) -> Result<&T>
    where
        T: StaticResource,
        F: FnOnce(&mut dyn GraphicsContext) -> Result<T>,
    {
        let cached = match self.statics.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let value = factory(self.context.as_mut())?;
                log::debug!("Cached static resource '{}' ({})", key, type_name::<T>());
                self.stats.allocations += 1;
                entry.insert(Box::new(value))
            }
        };

        let stored = cached.type_name();
        cached
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| RenderGraphError::StaticResourceTypeMismatch {
                key: key.to_string(),
                stored,
                requested: type_name::<T>(),
            })
    }

    pub fn has_static_resource(&self, key: &str) -> bool {
        self.statics.contains_key(key)
    }

    /// Release a static resource. Returns whether one was cached under `key`.
    pub fn release_static_resource(&mut self, key: &str) -> bool {
        match self.statics.remove(key) {
            Some(resource) => {
                log::debug!("Releasing static resource '{}'", key);
                resource.release(self.context.as_mut());
                self.stats.releases += 1;
                true
            }
            None => false,
        }
    }

    /// Cached texture by name, as resolved by the last frame that used it
    pub fn texture_by_name(&self, name: &str) -> Option<&Texture> {
        self.textures.get(name).map(|cached| &cached.object)
    }

    pub fn render_target_by_name(&self, name: &str) -> Option<&RenderTarget> {
        self.render_targets.get(name).map(|cached| &cached.object)
    }

    pub fn cached_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn cached_framebuffers(&self) -> usize {
        self.render_targets.len() + self.framebuffers.len()
    }

    pub fn cached_static_resources(&self) -> usize {
        self.statics.len()
    }

    /// Release every cached GPU object
    pub fn release_all(&mut self) {
        let count = self.render_targets.len()
            + self.framebuffers.len()
            + self.textures.len()
            + self.statics.len();
        if count > 0 {
            log::debug!("Releasing {} cached resources", count);
        }

        for (_, cached) in self.render_targets.drain() {
            self.context.destroy_framebuffer(cached.object.framebuffer);
        }
        for (_, cached) in self.framebuffers.drain() {
            self.context.destroy_framebuffer(cached.object.id);
        }
        for (_, cached) in self.textures.drain() {
            self.context.destroy_texture(cached.object.id);
        }
        for (_, resource) in self.statics.drain() {
            resource.release(self.context.as_mut());
        }
        self.stats.releases += count as u64;
    }
}

impl Drop for PipelineResources {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for PipelineResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineResources")
            .field("context", &self.context.name())
            .field("textures", &self.textures.len())
            .field("render_targets", &self.render_targets.len())
            .field("framebuffers", &self.framebuffers.len())
            .field("statics", &self.statics.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessContext;

    struct Marker(u32);

    impl StaticResource for Marker {
        fn release(self: Box<Self>, _context: &mut dyn GraphicsContext) {}

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn resources() -> PipelineResources {
        PipelineResources::new(Box::new(HeadlessContext::new()))
    }

    #[test]
    fn test_getters_require_active_frame() {
        let mut resources = resources();
        let err = resources.get_texture(TextureHandle::default()).unwrap_err();
        assert!(matches!(err, RenderGraphError::NoActiveFrame));
    }

    #[test]
    fn test_static_factory_runs_once() {
        let mut resources = resources();
        let mut calls = 0;
        for _ in 0..3 {
            let marker = resources
                .cache_static_resource("marker", |_| {
                    calls += 1;
                    Ok(Marker(7))
                })
                .unwrap();
            assert_eq!(marker.0, 7);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_static_type_mismatch() {
        let mut resources = resources();
        resources
            .cache_static_resource("shared", |_| Ok(Marker(1)))
            .unwrap();

        let err = resources
            .cache_static_resource("shared", |context| {
                Ok(VertexBuffer::from_vertices(
                    context,
                    "quad",
                    &QuadVertex::layout(),
                    &[QuadVertex {
                        position: glam::Vec2::ZERO,
                        uv: glam::Vec2::ZERO,
                    }],
                )?)
            })
            .unwrap_err();
        assert!(matches!(err, RenderGraphError::StaticResourceTypeMismatch { .. }));
    }

    #[test]
    fn test_release_all_destroys_objects() {
        let mut resources = resources();
        resources
            .cache_static_resource("buffer", |context| {
                Ok(VertexBuffer::with_capacity::<QuadVertex>(
                    context,
                    "buffer",
                    &QuadVertex::layout(),
                    8,
                    &[],
                )?)
            })
            .unwrap();
        let headless = resources.context_as::<HeadlessContext>().unwrap();
        assert_eq!(headless.live_objects(), 1);

        resources.release_all();
        let headless = resources.context_as::<HeadlessContext>().unwrap();
        assert_eq!(headless.live_objects(), 0);
        assert_eq!(resources.stats().releases, 1);
    }

    /// Declare a `size`x`size` texture and a render target of `target_size` over it
    fn attachment_frame(size: u32, target_size: u32) -> (DeclarationTable, RenderTargetHandle) {
        let mut table = DeclarationTable::new(PipelineId::next());
        let id = table
            .declare(
                "rt.albedo".into(),
                DeclarationKind::Texture {
                    width: size,
                    height: size,
                    options: TextureOptions::default(),
                },
            )
            .unwrap();
        let texture = TextureHandle {
            id,
            pipeline: table.pipeline(),
            width: size,
            height: size,
        };
        let target = table
            .declare_render_target(
                "rt",
                target_size,
                target_size,
                RenderTargetOptions::with_attachments(vec![texture]),
            )
            .unwrap();
        (table, target)
    }

    #[test]
    fn test_render_target_follows_declared_size() {
        let mut resources = resources();

        let (table, target) = attachment_frame(16, 16);
        resources.begin_frame(0, table);
        assert_eq!(resources.get_render_target(target).unwrap().viewport(), Viewport::new(16, 16));
        resources.end_frame().unwrap();

        let (table, target) = attachment_frame(16, 8);
        resources.begin_frame(1, table);
        let err = resources.get_render_target(target).unwrap_err();
        assert!(matches!(
            err,
            RenderGraphError::Allocation {
                source: BackendError::FramebufferIncomplete(_),
                ..
            }
        ));
        resources.abort_frame();

        let released = resources.stats().releases;
        let (table, target) = attachment_frame(8, 8);
        resources.begin_frame(2, table);
        let rt = resources.get_render_target(target).unwrap();
        assert_eq!((rt.width, rt.height), (8, 8));
        resources.activate_render_target(target).unwrap();
        resources.end_frame().unwrap();
        // the 16x16 texture and the framebuffer built on it
        assert_eq!(resources.stats().releases - released, 2);
    }
}
