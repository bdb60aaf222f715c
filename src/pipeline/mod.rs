//! Deferred rendering pipeline
//!
//! The standard passes, in the order [`build_deferred_pipeline`] adds them:
//! 1. Scene extraction - camera and light data from the ECS world
//! 2. Clear - clears the output target
//! 3. G-Buffer pass - renders geometry to multiple render targets
//! 4. Lighting pass - fullscreen pass computing lighting from the G-buffer
//! 5. Fullscreen blit - tonemaps the lighting result onto the output target
//! 6. UI overlay - optional blended 2D geometry

pub mod blit_pass;
pub mod clear_pass;
pub mod data;
pub mod fullscreen_quad;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod scene_pass;
pub mod shaders;
pub mod ui_pass;

pub use blit_pass::FullscreenBlitPass;
pub use clear_pass::ClearPass;
pub use data::*;
pub use fullscreen_quad::{fullscreen_quad, FULLSCREEN_QUAD_KEY};
pub use gbuffer_pass::GBufferPass;
pub use lighting_pass::LightingPass;
pub use scene_pass::SceneExtractPass;
pub use ui_pass::{UiOverlay, UiOverlayPass, UI_OVERLAY_BUFFER_KEY};

use crate::backend::UiVertex;
use crate::render_graph::{ExternalTarget, PipelineContainer, RenderPipeline, Result};
use bevy_ecs::world::World;
use glam::Vec3;

/// Per-frame settings of the deferred pipeline
#[derive(Debug, Clone)]
pub struct DeferredSettings {
    pub clear_color: [f32; 4],
    pub ambient: Vec3,
    pub ui_vertices: Vec<UiVertex>,
    pub ui_vertex_capacity: u32,
}

impl Default for DeferredSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            ambient: Vec3::splat(0.03),
            ui_vertices: Vec::new(),
            ui_vertex_capacity: 4096,
        }
    }
}

/// Build the deferred pipeline for one frame, drawing into `output`
pub fn build_deferred_pipeline<'w>(
    world: &'w World,
    output: ExternalTarget,
    settings: DeferredSettings,
) -> Result<RenderPipeline<'w>> {
    let (width, height) = (output.width, output.height);
    let mut pipeline = RenderPipeline::new(PipelineContainer::new(), Some(output));

    pipeline.add_pass(SceneExtractPass::new(world, settings.ambient))?;
    pipeline.add_pass(ClearPass::new(settings.clear_color))?;
    pipeline.add_pass(GBufferPass::new(world, width, height))?;
    pipeline.add_pass(LightingPass::new())?;
    pipeline.add_pass(FullscreenBlitPass::new())?;
    if !settings.ui_vertices.is_empty() {
        pipeline.add_pass(UiOverlayPass::new(
            settings.ui_vertices,
            settings.ui_vertex_capacity,
        ))?;
    }

    Ok(pipeline)
}
