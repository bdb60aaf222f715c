//! Clears a render target

use crate::render_graph::*;

/// Clears colour and, when the target has one, depth.
///
/// Without an explicit target the pipeline's output target is cleared.
pub struct ClearPass {
    pub color: [f32; 4],
    pub depth: Option<f32>,
    pub target: Option<RenderTargetHandle>,
}

impl ClearPass {
    pub fn new(color: [f32; 4]) -> Self {
        Self {
            color,
            depth: Some(1.0),
            target: None,
        }
    }

    pub fn with_target(mut self, target: RenderTargetHandle) -> Self {
        self.target = Some(target);
        self
    }
}

impl Default for ClearPass {
    fn default() -> Self {
        Self::new([0.0, 0.0, 0.0, 1.0])
    }
}

impl RenderPass for ClearPass {
    fn name(&self) -> &str {
        "clear"
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
        let has_depth = resources.get_render_target(target)?.depth_attachment.is_some();
        resources.activate_render_target(target)?;
        resources
            .context_mut()
            .clear(Some(self.color), self.depth.filter(|_| has_depth))?;
        Ok(())
    }
}
