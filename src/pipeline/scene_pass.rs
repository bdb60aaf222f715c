//! Extracts camera and light state from the ECS world

use crate::pipeline::data::{CameraData, LightData};
use crate::render_graph::*;
use crate::scene::{ActiveCamera, DirectionalLight};
use bevy_ecs::world::World;
use glam::Vec3;

/// Publishes [`CameraData`] and [`LightData`] during setup.
///
/// Declares no resources, so it executes first among passes added before it and never
/// blocks the graph. Missing `ActiveCamera` or `DirectionalLight` resources fall back to
/// their defaults. A perspective camera takes its aspect ratio from the output target.
pub struct SceneExtractPass<'w> {
    world: &'w World,
    ambient: Vec3,
}

impl<'w> SceneExtractPass<'w> {
    pub fn new(world: &'w World, ambient: Vec3) -> Self {
        Self { world, ambient }
    }
}

impl RenderPass for SceneExtractPass<'_> {
    fn name(&self) -> &str {
        "scene_extract"
    }

    fn setup(&mut self, builder: &mut PassBuilder<'_>, container: &mut PipelineContainer) -> Result<()> {
        let mut camera = self
            .world
            .get_resource::<ActiveCamera>()
            .map(|active| active.0.clone())
            .unwrap_or_default();
        if let Ok(output) = builder.output_target() {
            camera.set_aspect(output.width() as f32, output.height() as f32);
        }

        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        *container.create::<CameraData>()? = CameraData {
            view,
            projection,
            view_projection: projection * view,
            position: camera.position,
        };

        let light = self
            .world
            .get_resource::<DirectionalLight>()
            .cloned()
            .unwrap_or_default();
        *container.create::<LightData>()? = LightData {
            direction: light.direction,
            color: light.color,
            intensity: light.intensity,
            ambient: self.ambient,
        };
        Ok(())
    }

    fn execute(&mut self, _: &mut PipelineContainer, _: &mut PipelineResources) -> Result<()> {
        Ok(())
    }
}
