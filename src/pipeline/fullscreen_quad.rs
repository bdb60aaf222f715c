//! Fullscreen quad shared by every fullscreen pass

use crate::backend::QuadVertex;
use crate::render_graph::{PipelineResources, Result, VertexBuffer};
use glam::Vec2;

/// Static resource key of the fullscreen quad
pub const FULLSCREEN_QUAD_KEY: &str = "fullscreen_quad";

/// Two counter-clockwise triangles covering clip space, uv origin at the top left
pub const FULLSCREEN_QUAD_VERTICES: [QuadVertex; 6] = [
    QuadVertex {
        position: Vec2::new(-1.0, -1.0),
        uv: Vec2::new(0.0, 1.0),
    },
    QuadVertex {
        position: Vec2::new(1.0, -1.0),
        uv: Vec2::new(1.0, 1.0),
    },
    QuadVertex {
        position: Vec2::new(1.0, 1.0),
        uv: Vec2::new(1.0, 0.0),
    },
    QuadVertex {
        position: Vec2::new(-1.0, -1.0),
        uv: Vec2::new(0.0, 1.0),
    },
    QuadVertex {
        position: Vec2::new(1.0, 1.0),
        uv: Vec2::new(1.0, 0.0),
    },
    QuadVertex {
        position: Vec2::new(-1.0, 1.0),
        uv: Vec2::new(0.0, 0.0),
    },
];

/// The quad's vertex buffer, created on first use
pub fn fullscreen_quad(resources: &mut PipelineResources) -> Result<VertexBuffer> {
    let quad = resources.cache_static_resource(FULLSCREEN_QUAD_KEY, |context| {
        Ok(VertexBuffer::from_vertices(
            context,
            FULLSCREEN_QUAD_KEY,
            &QuadVertex::layout(),
            &FULLSCREEN_QUAD_VERTICES,
        )?)
    })?;
    Ok(*quad)
}

/// Bind the quad and draw it into the active target
pub fn draw_fullscreen_quad(resources: &mut PipelineResources) -> Result<()> {
    let quad = fullscreen_quad(resources)?;
    let context = resources.context_mut();
    context.bind_vertex_buffer(quad.buffer)?;
    context.draw(0, quad.vertex_count)?;
    Ok(())
}
