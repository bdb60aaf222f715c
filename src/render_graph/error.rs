//! Render graph error types

use crate::backend::traits::BackendError;
use crate::render_graph::resource::{PipelineId, ResourceId, ResourceKind};
use thiserror::Error;

/// Errors produced while building or executing a render pipeline
#[derive(Error, Debug)]
pub enum RenderGraphError {
    #[error("Cyclic dependency between passes: {passes:?}")]
    CyclicDependency { passes: Vec<String> },

    #[error("Resource {resource:?} belongs to pipeline {owner:?}, not {pipeline:?}")]
    ForeignResource {
        resource: ResourceId,
        owner: PipelineId,
        pipeline: PipelineId,
    },

    #[error("No pipeline data of type {type_name}")]
    MissingPipelineData { type_name: &'static str },

    #[error("Unknown resource {0:?}")]
    UnknownResource(ResourceId),

    #[error("Pipeline has no output render target")]
    RenderTargetNotSet,

    #[error("Resource '{0}' is already declared in this pipeline")]
    DuplicateResource(String),

    #[error("Resource '{name}' is a {actual:?}, expected a {expected:?}")]
    ResourceKindMismatch {
        name: String,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("Static resource '{key}' holds a {stored}, requested a {requested}")]
    StaticResourceTypeMismatch {
        key: String,
        stored: &'static str,
        requested: &'static str,
    },

    #[error("Pipeline resources are only available while a frame is executing")]
    NoActiveFrame,

    #[error("Failed to allocate '{name}' ({descriptor}): {source}")]
    Allocation {
        name: String,
        descriptor: String,
        #[source]
        source: BackendError,
    },

    #[error("Pass '{0}' has already executed")]
    PassAlreadyExecuted(String),

    #[error("Cannot add pass '{0}' after the pipeline executed")]
    SetupAfterExecute(String),

    #[error("Pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: Box<RenderGraphError>,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, RenderGraphError>;

impl RenderGraphError {
    /// The innermost error, looking through `PassFailed` wrappers
    pub fn root_cause(&self) -> &RenderGraphError {
        match self {
            RenderGraphError::PassFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
