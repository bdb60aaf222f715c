//! Frame loop driver
//!
//! The [`Renderer`] owns the context-lifetime [`PipelineResources`] and rebuilds the
//! standard deferred pipeline every frame.

use crate::backend::*;
use crate::pipeline::{build_deferred_pipeline, DeferredSettings, UiOverlay};
use crate::render_graph::{ExternalTarget, FrameStats, PipelineResources, Result};
use crate::{BackendType, RenderConfig};
use bevy_ecs::world::World;

/// Name of the output target created by [`Renderer::offscreen_target`]
pub const OFFSCREEN_TARGET: &str = "offscreen";

pub struct Renderer {
    config: RenderConfig,
    resources: PipelineResources,
    frame_index: u64,
}

impl Renderer {
    /// Create a renderer on the backend selected by `config`
    pub fn new(config: RenderConfig) -> Result<Self> {
        let context: Box<dyn GraphicsContext> = match config.backend {
            BackendType::Headless => Box::new(HeadlessContext::new()),
            #[cfg(feature = "wgpu-backend")]
            BackendType::Wgpu => Box::new(WgpuContext::new()?),
            #[cfg(not(feature = "wgpu-backend"))]
            BackendType::Wgpu => {
                return Err(BackendError::InitializationFailed(
                    "built without the wgpu-backend feature".into(),
                )
                .into())
            }
        };
        Ok(Self::with_context(config, context))
    }

    /// Create a renderer on an existing context
    pub fn with_context(config: RenderConfig, context: Box<dyn GraphicsContext>) -> Self {
        log::info!(
            "Renderer started: {}x{} on {}",
            config.width,
            config.height,
            context.name()
        );
        Self {
            config,
            resources: PipelineResources::new(context),
            frame_index: 0,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn resources(&self) -> &PipelineResources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut PipelineResources {
        &mut self.resources
    }

    /// Index the next rendered frame will get
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Change the render size. Size-dependent resources are reallocated on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.config.width, self.config.height) {
            log::debug!("Renderer resized to {}x{}", width, height);
            self.config.width = width;
            self.config.height = height;
        }
    }

    /// Output target for rendering without a window.
    ///
    /// Its textures are cached under [`OFFSCREEN_TARGET`] like any other resource.
    pub fn offscreen_target(&self) -> ExternalTarget {
        ExternalTarget::new(OFFSCREEN_TARGET, self.config.width, self.config.height)
    }

    /// Colour texture behind an output target, once a frame has rendered to it
    pub fn output_texture(&self, output: &ExternalTarget) -> Option<TextureId> {
        self.resources
            .texture_by_name(&format!("{}.color", output.name))
            .map(|texture| texture.id)
    }

    /// Render one frame of `world` into `output`.
    ///
    /// The frame index advances even when the frame fails.
    pub fn render(&mut self, world: &World, output: ExternalTarget) -> Result<FrameStats> {
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let settings = DeferredSettings {
            clear_color: self.config.clear_color,
            ambient: self.config.ambient,
            ui_vertices: world
                .get_resource::<UiOverlay>()
                .map(|overlay| overlay.vertices.clone())
                .unwrap_or_default(),
            ui_vertex_capacity: self.config.ui_vertex_capacity,
        };

        let mut pipeline = build_deferred_pipeline(world, output, settings)?;
        let stats = pipeline.execute(frame_index, &mut self.resources)?;
        log::trace!("Frame {} done: {:?}", frame_index, stats.cache);
        Ok(stats)
    }

    /// Render one frame into [`offscreen_target`](Self::offscreen_target)
    pub fn render_offscreen(&mut self, world: &World) -> Result<FrameStats> {
        let output = self.offscreen_target();
        self.render(world, output)
    }
}
