//! Copies a texture onto a render target through the fullscreen quad

use crate::pipeline::data::LightingOutput;
use crate::pipeline::{fullscreen_quad, shaders};
use crate::render_graph::*;

/// Tonemapping blit.
///
/// Reads the lighting output and writes the pipeline's output target unless an explicit
/// source or target is given.
#[derive(Default)]
pub struct FullscreenBlitPass {
    pub source: Option<TextureHandle>,
    pub target: Option<RenderTargetHandle>,
}

impl FullscreenBlitPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: TextureHandle) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: RenderTargetHandle) -> Self {
        self.target = Some(target);
        self
    }
}

impl RenderPass for FullscreenBlitPass {
    fn name(&self) -> &str {
        "fullscreen_blit"
    }

    fn setup(&mut self, builder: &mut PassBuilder<'_>, container: &mut PipelineContainer) -> Result<()> {
        let source = match self.source {
            Some(source) => source,
            None => container.get::<LightingOutput>()?.texture,
        };
        let target = match self.target {
            Some(target) => target,
            None => builder.output_target()?,
        };
        builder.reads(source)?;
        builder.writes(target)?;

        self.source = Some(source);
        self.target = Some(target);
        Ok(())
    }

    fn execute(
        &mut self,
        _container: &mut PipelineContainer,
        resources: &mut PipelineResources,
    ) -> Result<()> {
        let (Some(source), Some(target)) = (self.source, self.target) else {
            return Err(RenderGraphError::RenderTargetNotSet);
        };
        let program = shaders::cached_program(resources, shaders::blit_program)?;

        resources.activate_render_target(target)?;
        resources.context_mut().use_program(program)?;
        resources.bind_texture(0, source)?;

        let context = resources.context_mut();
        context.set_depth_test(false);
        context.set_face_culling(true);
        context.set_blending(false);

        fullscreen_quad::draw_fullscreen_quad(resources)
    }
}
