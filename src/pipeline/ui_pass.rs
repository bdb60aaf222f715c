//! Overlay of pre-tessellated 2D geometry

use crate::backend::*;
use crate::pipeline::shaders;
use crate::render_graph::*;
use bevy_ecs::prelude::*;

/// Static resource key of the overlay's dynamic vertex buffer
pub const UI_OVERLAY_BUFFER_KEY: &str = "ui_overlay_buffer";

/// Overlay triangles for the current frame, in clip space.
///
/// The renderer adds a [`UiOverlayPass`] when this resource holds any vertices.
#[derive(Resource, Debug, Clone, Default)]
pub struct UiOverlay {
    pub vertices: Vec<UiVertex>,
}

/// Draws caller-supplied triangles with alpha blending on top of the target.
///
/// The vertex buffer is created once with room for `capacity` vertices and rewritten every
/// frame; vertices beyond the capacity are dropped.
pub struct UiOverlayPass {
    vertices: Vec<UiVertex>,
    capacity: u32,
    target: Option<RenderTargetHandle>,
}

impl UiOverlayPass {
    pub fn new(vertices: Vec<UiVertex>, capacity: u32) -> Self {
        Self {
            vertices,
            capacity,
            target: None,
        }
    }

    pub fn with_target(mut self, target: RenderTargetHandle) -> Self {
        self.target = Some(target);
        self
    }
}

impl RenderPass for UiOverlayPass {
    fn name(&self) -> &str {
        "ui_overlay"
    }

    fn setup(&mut self, builder: &mut PassBuilder<'_>, _container: &mut PipelineContainer) -> Result<()> {
        let target = match self.target {
            Some(target) => target,
            None => builder.output_target()?,
        };
        builder.writes(target)?;
        self.target = Some(target);
        Ok(())
    }

    fn execute(
        &mut self,
        _container: &mut PipelineContainer,
        resources: &mut PipelineResources,
    ) -> Result<()> {
        let target = self.target.ok_or(RenderGraphError::RenderTargetNotSet)?;
        if self.vertices.is_empty() {
            return Ok(());
        }

        let capacity = self.capacity;
        if capacity < 3 {
            log::warn!(
                "UI overlay buffer capacity {} cannot hold a triangle, skipping {} vertices",
                capacity,
                self.vertices.len()
            );
            return Ok(());
        }
        let buffer = *resources.cache_static_resource(UI_OVERLAY_BUFFER_KEY, |context| {
            Ok(VertexBuffer::with_capacity::<UiVertex>(
                context,
                UI_OVERLAY_BUFFER_KEY,
                &UiVertex::layout(),
                capacity,
                &[],
            )?)
        })?;

        let limit = buffer.capacity as usize;
        if self.vertices.len() > limit {
            log::warn!(
                "UI overlay has {} vertices, drawing the first {}",
                self.vertices.len(),
                limit
            );
        }
        // Whole triangles only
        let count = self.vertices.len().min(limit) / 3 * 3;
        if count == 0 {
            return Ok(());
        }
        let program = shaders::cached_program(resources, shaders::ui_program)?;

        resources.activate_render_target(target)?;
        let context = resources.context_mut();
        context.write_vertex_buffer(buffer.buffer, bytemuck::cast_slice(&self.vertices[..count]))?;
        context.use_program(program)?;
        context.set_depth_test(false);
        context.set_face_culling(false);
        context.set_blending(true);
        context.bind_vertex_buffer(buffer.buffer)?;
        context.draw(0, count as u32)?;
        Ok(())
    }
}
