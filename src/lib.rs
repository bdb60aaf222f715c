//! Frame Graph - a retained-mode render graph with a deferred pipeline
//!
//! Passes declare the named textures and render targets they read and write. Each frame
//! the pipeline orders them by those declarations and runs each exactly once, while
//! [`render_graph::PipelineResources`] turns declarations into cached GPU objects.
//!
//! # Backends
//! - **headless**: validates every call and records a command log, no GPU needed
//! - **wgpu**: offscreen rendering on a real device (feature `wgpu-backend`)
//!
//! # Features
//! - Stable topological ordering with cycle detection
//! - Cross-frame GPU object cache keyed by resource name
//! - Deferred pipeline (G-buffer, lighting, blit, UI overlay) fed from a Bevy ECS world

pub mod backend;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod scene;

// Re-export Bevy ECS prelude for users
pub use bevy_ecs::prelude::*;

pub use render_graph::{RenderGraphError, RenderPipeline, Result};
pub use renderer::Renderer;

use glam::Vec3;

/// Backend selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// No GPU; records commands for inspection
    #[default]
    Headless,
    /// wgpu on the default adapter
    Wgpu,
}

/// Configuration for creating a [`Renderer`]
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Which backend to use
    pub backend: BackendType,
    /// Colour the output target is cleared to
    pub clear_color: [f32; 4],
    /// Ambient light added by the lighting pass
    pub ambient: Vec3,
    /// Maximum number of UI overlay vertices per frame
    pub ui_vertex_capacity: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            backend: BackendType::Headless,
            clear_color: [0.1, 0.1, 0.1, 1.0],
            ambient: Vec3::splat(0.03),
            ui_vertex_capacity: 4096,
        }
    }
}
