//! Backend abstraction layer
//!
//! Provides the [`GraphicsContext`] trait that the render graph drives, the bound-state
//! tracker shared by the implementations, a headless recording context and a wgpu context.

pub mod headless;
pub mod state;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use headless::{Command, CommandLog, HeadlessContext};
pub use state::GpuState;
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuContext;
