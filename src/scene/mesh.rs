//! Mesh component and simple mesh builders

use crate::backend::MeshVertex;
use bevy_ecs::prelude::*;
use glam::{Vec3, Vec4};
use std::sync::Arc;

/// Geometry drawn by the G-buffer pass.
///
/// Entities sharing a `mesh_key` share one vertex buffer; the first entity drawn with a
/// key decides its contents.
#[derive(Component, Debug, Clone)]
pub struct MeshRenderer {
    pub mesh_key: String,
    pub vertices: Arc<[MeshVertex]>,
    pub base_color: Vec4,
}

impl MeshRenderer {
    pub fn new(mesh_key: impl Into<String>, vertices: impl Into<Arc<[MeshVertex]>>) -> Self {
        Self {
            mesh_key: mesh_key.into(),
            vertices: vertices.into(),
            base_color: Vec4::ONE,
        }
    }

    pub fn with_color(mut self, base_color: Vec4) -> Self {
        self.base_color = base_color;
        self
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

/// Axis-aligned cube centered on the origin, counter-clockwise triangles
pub fn cube(size: f32) -> Vec<MeshVertex> {
    let h = size / 2.0;
    // (normal, tangent u, tangent v) with u x v = normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let center = normal * h;
        let corner = |su: f32, sv: f32| MeshVertex::new(center + u * (su * h) + v * (sv * h), normal);
        let (a, b, c, d) = (
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
        );
        vertices.extend_from_slice(&[a, b, c, a, c, d]);
    }
    vertices
}

/// Horizontal plane at y = 0 facing +Y
pub fn plane(size: f32) -> Vec<MeshVertex> {
    let h = size / 2.0;
    let v = |x: f32, z: f32| MeshVertex::new(Vec3::new(x, 0.0, z), Vec3::Y);
    vec![v(-h, h), v(h, h), v(h, -h), v(-h, h), v(h, -h), v(-h, -h)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn winding_normal(tri: &[MeshVertex]) -> Vec3 {
        (tri[1].position - tri[0].position)
            .cross(tri[2].position - tri[0].position)
            .normalize()
    }

    #[test]
    fn test_cube_faces_wind_outward() {
        let vertices = cube(2.0);
        assert_eq!(vertices.len(), 36);
        for tri in vertices.chunks(3) {
            assert!((winding_normal(tri) - tri[0].normal).length() < 1e-5);
            assert!(tri.iter().all(|v| v.position.abs().max_element() <= 1.0 + 1e-5));
        }
    }

    #[test]
    fn test_plane_faces_up() {
        for tri in plane(4.0).chunks(3) {
            assert!((winding_normal(tri) - Vec3::Y).length() < 1e-5);
        }
    }
}
