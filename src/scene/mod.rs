//! ECS-facing scene types read by the renderer

mod camera;
mod light;
mod mesh;
mod transform;

pub use camera::*;
pub use light::*;
pub use mesh::*;
pub use transform::*;
