//! Deferred lighting pass
//!
//! Shades the G-buffer with the directional light into an HDR texture using a fullscreen
//! quad.

use crate::backend::*;
use crate::pipeline::data::{CameraData, GBufferData, LightData, LightingOutput};
use crate::pipeline::{fullscreen_quad, shaders};
use crate::render_graph::*;

pub const LIGHTING_TARGET: &str = "lighting";

/// Deferred lighting pass. Needs the G-buffer pass added before it.
#[derive(Default)]
pub struct LightingPass {
    gbuffer: GBufferData,
    output: LightingOutput,
}

impl LightingPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "deferred_lighting"
    }

    fn setup(&mut self, builder: &mut PassBuilder<'_>, container: &mut PipelineContainer) -> Result<()> {
        let gbuffer = *container.get::<GBufferData>()?;
        builder.reads(gbuffer.albedo)?;
        builder.reads(gbuffer.normal)?;
        builder.reads(gbuffer.position)?;

        let (width, height) = (gbuffer.target.width(), gbuffer.target.height());
        let texture = builder.create_texture(
            "lighting.output",
            width,
            height,
            TextureOptions::with_format(TextureFormat::Rgba16Float),
        )?;
        let target = builder.create_render_target_with(
            LIGHTING_TARGET,
            width,
            height,
            RenderTargetOptions::with_attachments(vec![texture]),
        )?;
        builder.writes(texture)?;
        builder.writes(target)?;

        self.gbuffer = gbuffer;
        self.output = LightingOutput { texture, target };
        *container.create::<LightingOutput>()? = self.output;
        Ok(())
    }

    fn execute(
        &mut self,
        container: &mut PipelineContainer,
        resources: &mut PipelineResources,
    ) -> Result<()> {
        let camera = *container.get::<CameraData>()?;
        let light = *container.get::<LightData>()?;
        let program = shaders::cached_program(resources, shaders::lighting_program)?;

        resources.activate_render_target(self.output.target)?;
        resources.context_mut().use_program(program)?;
        resources.bind_texture(0, self.gbuffer.albedo)?;
        resources.bind_texture(1, self.gbuffer.normal)?;
        resources.bind_texture(2, self.gbuffer.position)?;

        let context = resources.context_mut();
        context.set_uniform("light_direction", UniformValue::Vec3(light.direction))?;
        context.set_uniform("light_intensity", UniformValue::Float(light.intensity))?;
        context.set_uniform("light_color", UniformValue::Vec3(light.color))?;
        context.set_uniform("ambient", UniformValue::Vec3(light.ambient))?;
        context.set_uniform("camera_position", UniformValue::Vec3(camera.position))?;
        context.set_depth_test(false);
        context.set_face_culling(true);
        context.set_blending(false);

        fullscreen_quad::draw_fullscreen_quad(resources)
    }
}
