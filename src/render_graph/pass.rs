//! Render pass definitions for the render graph

use crate::render_graph::container::PipelineContainer;
use crate::render_graph::error::Result;
use crate::render_graph::pipeline::PassBuilder;
use crate::render_graph::resource::ResourceId;
use crate::render_graph::resources::PipelineResources;

/// Unique identifier for a render pass: its addition index in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) usize);

impl PassId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle of a pass inside its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Created,
    SetupComplete,
    Executed,
}

/// Trait for render passes
pub trait RenderPass {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase: declare resources and dependencies.
    ///
    /// Runs once, synchronously, when the pass is added to a pipeline.
    fn setup(&mut self, builder: &mut PassBuilder<'_>, container: &mut PipelineContainer) -> Result<()>;

    /// Execute phase: resolve resources and issue GPU work. Runs once per frame.
    fn execute(
        &mut self,
        container: &mut PipelineContainer,
        resources: &mut PipelineResources,
    ) -> Result<()>;
}

/// A pass built from two closures.
///
/// Handles created during setup usually travel to the execute closure through the
/// [`PipelineContainer`].
pub struct CallbackPass<S, E> {
    name: String,
    setup: S,
    execute: E,
}

impl<S, E> CallbackPass<S, E>
where
    S: FnMut(&mut PassBuilder<'_>, &mut PipelineContainer) -> Result<()>,
    E: FnMut(&mut PipelineContainer, &mut PipelineResources) -> Result<()>,
{
    pub fn new(name: impl Into<String>, setup: S, execute: E) -> Self {
        Self {
            name: name.into(),
            setup,
            execute,
        }
    }
}

impl<S, E> RenderPass for CallbackPass<S, E>
where
    S: FnMut(&mut PassBuilder<'_>, &mut PipelineContainer) -> Result<()>,
    E: FnMut(&mut PipelineContainer, &mut PipelineResources) -> Result<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, builder: &mut PassBuilder<'_>, container: &mut PipelineContainer) -> Result<()> {
        (self.setup)(builder, container)
    }

    fn execute(
        &mut self,
        container: &mut PipelineContainer,
        resources: &mut PipelineResources,
    ) -> Result<()> {
        (self.execute)(container, resources)
    }
}

/// Metadata the pipeline keeps about each pass
#[derive(Debug, Clone)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub reads: Vec<ResourceId>,
    pub writes: Vec<ResourceId>,
    pub state: PassState,
}

impl PassNode {
    pub(crate) fn new(id: PassId, name: String) -> Self {
        Self {
            id,
            name,
            reads: Vec::new(),
            writes: Vec::new(),
            state: PassState::Created,
        }
    }

    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.reads.contains(&resource)
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.writes.contains(&resource)
    }
}
