//! Values passes publish to each other through the pipeline container

use crate::render_graph::{RenderTargetHandle, TextureHandle};
use glam::{Mat4, Vec3};

/// Camera matrices extracted from the world for this frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub position: Vec3,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
        }
    }
}

/// The directional light and ambient term for this frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LightData {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub ambient: Vec3,
}

/// Handles of the G-buffer, published by the G-buffer pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GBufferData {
    pub albedo: TextureHandle,
    pub normal: TextureHandle,
    pub position: TextureHandle,
    pub target: RenderTargetHandle,
}

/// HDR result of the lighting pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightingOutput {
    pub texture: TextureHandle,
    pub target: RenderTargetHandle,
}
