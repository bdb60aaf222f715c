//! G-Buffer generation pass for deferred rendering
//!
//! Renders every mesh entity to multiple render targets (MRT):
//! - Albedo (base color)
//! - World-space normals, w marks covered pixels
//! - World-space positions
//! - Depth buffer

use crate::backend::*;
use crate::pipeline::data::{CameraData, GBufferData};
use crate::pipeline::shaders;
use crate::render_graph::*;
use crate::scene::{MeshRenderer, Transform};
use bevy_ecs::world::World;

pub const GBUFFER_TARGET: &str = "gbuffer";

/// G-Buffer generation pass
pub struct GBufferPass<'w> {
    world: &'w World,
    width: u32,
    height: u32,
    data: GBufferData,
}

impl<'w> GBufferPass<'w> {
    pub fn new(world: &'w World, width: u32, height: u32) -> Self {
        Self {
            world,
            width,
            height,
            data: GBufferData::default(),
        }
    }
}

impl RenderPass for GBufferPass<'_> {
    fn name(&self) -> &str {
        "gbuffer"
    }

    fn setup(&mut self, builder: &mut PassBuilder<'_>, container: &mut PipelineContainer) -> Result<()> {
        let (width, height) = (self.width, self.height);
        let albedo = builder.create_texture(
            "gbuffer.albedo",
            width,
            height,
            TextureOptions::with_format(TextureFormat::Rgba8Unorm),
        )?;
        // Float formats keep precision for normals and positions
        let normal = builder.create_texture(
            "gbuffer.normal",
            width,
            height,
            TextureOptions::with_format(TextureFormat::Rgba16Float),
        )?;
        let position = builder.create_texture(
            "gbuffer.position",
            width,
            height,
            TextureOptions::with_format(TextureFormat::Rgba16Float),
        )?;
        let target = builder.create_render_target_with(
            GBUFFER_TARGET,
            width,
            height,
            RenderTargetOptions::with_attachments(vec![albedo, normal, position])
                .depth(Some(TextureFormat::Depth32Float)),
        )?;

        builder.writes(albedo)?;
        builder.writes(normal)?;
        builder.writes(position)?;
        builder.writes(target)?;

        self.data = GBufferData {
            albedo,
            normal,
            position,
            target,
        };
        *container.create::<GBufferData>()? = self.data;
        Ok(())
    }

    fn execute(
        &mut self,
        container: &mut PipelineContainer,
        resources: &mut PipelineResources,
    ) -> Result<()> {
        let camera = *container.get::<CameraData>()?;
        let program = shaders::cached_program(resources, shaders::gbuffer_program)?;

        resources.activate_render_target(self.data.target)?;
        {
            let context = resources.context_mut();
            context.clear(Some([0.0; 4]), Some(1.0))?;
            context.set_depth_test(true);
            context.set_face_culling(true);
            context.set_blending(false);
            context.use_program(program)?;
            context.set_uniform("view_projection", UniformValue::Mat4(camera.view_projection))?;
        }

        let mut drawn = 0usize;
        for entity in self.world.iter_entities() {
            let (Some(transform), Some(mesh)) = (entity.get::<Transform>(), entity.get::<MeshRenderer>()) else {
                continue;
            };
            if mesh.vertices.is_empty() {
                continue;
            }

            let key = format!("mesh:{}", mesh.mesh_key);
            let buffer = *resources.cache_static_resource(&key, |context| {
                Ok(VertexBuffer::from_vertices(
                    context,
                    &key,
                    &MeshVertex::layout(),
                    &mesh.vertices[..],
                )?)
            })?;

            let context = resources.context_mut();
            context.set_uniform("model", UniformValue::Mat4(transform.matrix()))?;
            context.set_uniform("normal_matrix", UniformValue::Mat4(transform.normal_matrix()))?;
            context.set_uniform("base_color", UniformValue::Vec4(mesh.base_color))?;
            context.bind_vertex_buffer(buffer.buffer)?;
            context.draw(0, buffer.vertex_count)?;
            drawn += 1;
        }

        log::trace!("G-buffer pass drew {} meshes", drawn);
        Ok(())
    }
}
