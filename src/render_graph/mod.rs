//! Render Graph System
//!
//! Passes declare the named resources they read and write; the pipeline derives a stable
//! execution order from those declarations, and [`PipelineResources`] materializes and
//! caches the GPU objects behind them across frames.

pub mod container;
pub mod error;
pub mod pass;
pub mod pipeline;
pub mod resource;
pub mod resources;

pub use container::*;
pub use error::*;
pub use pass::*;
pub use pipeline::*;
pub use resource::*;
pub use resources::*;
