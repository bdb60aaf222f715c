//! Light types for the scene

use bevy_ecs::prelude::*;
use glam::Vec3;

/// Directional light (like the sun). One per world.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels, normalized
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
        }
    }

    /// Color already scaled by intensity
    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }
}
