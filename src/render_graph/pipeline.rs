//! Render pipeline: graph building, ordering and execution

use crate::render_graph::container::PipelineContainer;
use crate::render_graph::error::{RenderGraphError, Result};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::render_graph::resources::{CacheStats, PipelineResources};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Context handed to [`RenderPass::setup`] for declaring resources and dependencies
pub struct PassBuilder<'a> {
    pass: PassId,
    declarations: &'a mut DeclarationTable,
    node: &'a mut PassNode,
    output: Option<RenderTargetHandle>,
}

impl<'a> PassBuilder<'a> {
    /// The pass being set up
    pub fn pass_id(&self) -> PassId {
        self.pass
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.declarations.pipeline()
    }

    /// Create a new texture resource
    pub fn create_texture(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        options: TextureOptions,
    ) -> Result<TextureHandle> {
        let id = self.declarations.declare(
            name.to_string(),
            DeclarationKind::Texture {
                width,
                height,
                options,
            },
        )?;
        Ok(TextureHandle {
            id,
            pipeline: self.pipeline_id(),
            width,
            height,
        })
    }

    /// Create a render target with an implicit RGBA8 colour texture and a depth attachment
    pub fn create_render_target(&mut self, name: &str, width: u32, height: u32) -> Result<RenderTargetHandle> {
        self.create_render_target_with(name, width, height, RenderTargetOptions::default())
    }

    pub fn create_render_target_with(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        options: RenderTargetOptions,
    ) -> Result<RenderTargetHandle> {
        self.declarations
            .declare_render_target(name, width, height, options)
    }

    /// Create an empty framebuffer; attach textures with [`attach_color`](Self::attach_color)
    /// and [`attach_depth`](Self::attach_depth)
    pub fn create_framebuffer(&mut self, name: &str) -> Result<FramebufferHandle> {
        let id = self.declarations.declare(
            name.to_string(),
            DeclarationKind::Framebuffer {
                color_attachments: Vec::new(),
                depth_attachment: None,
            },
        )?;
        Ok(FramebufferHandle {
            id,
            pipeline: self.pipeline_id(),
        })
    }

    pub fn attach_color(&mut self, framebuffer: FramebufferHandle, texture: TextureHandle) -> Result<()> {
        self.declarations.resolve(&texture)?;
        self.declarations.resolve(&framebuffer)?;
        if let DeclarationKind::Framebuffer {
            color_attachments, ..
        } = &mut self.declarations.get_mut(framebuffer.id)?.kind
        {
            color_attachments.push(texture.id);
        }
        Ok(())
    }

    pub fn attach_depth(&mut self, framebuffer: FramebufferHandle, texture: TextureHandle) -> Result<()> {
        self.declarations.resolve(&texture)?;
        self.declarations.resolve(&framebuffer)?;
        if let DeclarationKind::Framebuffer {
            depth_attachment, ..
        } = &mut self.declarations.get_mut(framebuffer.id)?.kind
        {
            *depth_attachment = Some(texture.id);
        }
        Ok(())
    }

    /// Declare that this pass reads from a resource
    pub fn reads<H: ResourceHandle>(&mut self, resource: H) -> Result<()> {
        self.declarations.resolve(&resource)?;
        if !self.node.reads.contains(&resource.id()) {
            self.node.reads.push(resource.id());
        }
        Ok(())
    }

    /// Declare that this pass writes to a resource
    pub fn writes<H: ResourceHandle>(&mut self, resource: H) -> Result<()> {
        self.declarations.resolve(&resource)?;
        if !self.node.writes.contains(&resource.id()) {
            self.node.writes.push(resource.id());
        }
        Ok(())
    }

    /// The pipeline's external final target
    pub fn output_target(&self) -> Result<RenderTargetHandle> {
        self.output.ok_or(RenderGraphError::RenderTargetNotSet)
    }

    /// Find a resource declared earlier in this pipeline by name
    pub fn find_resource(&self, name: &str) -> Option<ResourceId> {
        self.declarations.find(name)
    }
}

/// Summary of one executed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_index: u64,
    /// Pass names in execution order
    pub pass_order: Vec<String>,
    pub passes_executed: usize,
    /// Cache activity during this frame
    pub cache: CacheStats,
}

/// A frame's passes and the resources they declare.
///
/// Built fresh each frame: passes are added (running their setup immediately), then
/// [`execute`](Self::execute) orders and runs them once against a long-lived
/// [`PipelineResources`].
pub struct RenderPipeline<'p> {
    id: PipelineId,
    container: PipelineContainer,
    declarations: DeclarationTable,
    passes: Vec<Box<dyn RenderPass + 'p>>,
    nodes: Vec<PassNode>,
    output: Option<RenderTargetHandle>,
    /// Set once execution begins, whether or not the frame succeeds
    started: bool,
}

impl<'p> RenderPipeline<'p> {
    pub fn new(container: PipelineContainer, initial_target: Option<ExternalTarget>) -> Self {
        let id = PipelineId::next();
        let mut declarations = DeclarationTable::new(id);
        // A fresh table has no names to collide with
        let output = initial_target.and_then(|target| declarations.declare_external(&target).ok());

        Self {
            id,
            container,
            declarations,
            passes: Vec::new(),
            nodes: Vec::new(),
            output,
            started: false,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Add a pass and run its setup
    pub fn add_pass<P: RenderPass + 'p>(&mut self, pass: P) -> Result<PassId> {
        self.add_boxed_pass(Box::new(pass))
    }

    pub fn add_boxed_pass(&mut self, mut pass: Box<dyn RenderPass + 'p>) -> Result<PassId> {
        let name = pass.name().to_string();
        if self.started {
            return Err(RenderGraphError::SetupAfterExecute(name));
        }

        let id = PassId(self.nodes.len());
        let mut node = PassNode::new(id, name);
        // Restored when setup fails so a dropped pass leaves no declarations behind
        let snapshot = self.declarations.clone();
        let result = {
            let mut builder = PassBuilder {
                pass: id,
                declarations: &mut self.declarations,
                node: &mut node,
                output: self.output,
            };
            pass.setup(&mut builder, &mut self.container)
        };
        if let Err(error) = result {
            self.declarations = snapshot;
            log::debug!("Pass '{}' setup failed: {}", node.name, error);
            return Err(error);
        }
        node.state = PassState::SetupComplete;
        log::trace!(
            "Pass '{}' set up: reads {:?}, writes {:?}",
            node.name,
            node.reads,
            node.writes
        );

        self.passes.push(pass);
        self.nodes.push(node);
        Ok(id)
    }

    /// Add a pass built from a setup closure and an execute closure
    pub fn add_callback_pass<S, E>(&mut self, name: &str, setup: S, execute: E) -> Result<PassId>
    where
        S: FnMut(&mut PassBuilder<'_>, &mut PipelineContainer) -> Result<()> + 'p,
        E: FnMut(&mut PipelineContainer, &mut PipelineResources) -> Result<()> + 'p,
    {
        self.add_pass(CallbackPass::new(name, setup, execute))
    }

    /// Compute the execution order.
    ///
    /// A pass runs after every pass that writes a resource it reads. Among passes that are
    /// ready at the same time the one added first runs first.
    pub fn compile(&self) -> Result<Vec<PassId>> {
        let mut writers: HashMap<ResourceId, Vec<usize>> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            for &resource in &node.writes {
                writers.entry(resource).or_default().push(index);
            }
        }

        let mut dependents: Vec<HashSet<usize>> = vec![HashSet::new(); self.nodes.len()];
        let mut in_degree = vec![0usize; self.nodes.len()];
        for (reader, node) in self.nodes.iter().enumerate() {
            for resource in &node.reads {
                match writers.get(resource) {
                    Some(list) => {
                        for &writer in list {
                            if writer != reader && dependents[writer].insert(reader) {
                                in_degree[reader] += 1;
                            }
                        }
                    }
                    None => {
                        let name = self
                            .declarations
                            .get(*resource)
                            .map(|decl| decl.name.as_str())
                            .unwrap_or("?");
                        log::debug!("Pass '{}' reads '{}' which no pass writes", node.name, name);
                    }
                }
            }
        }

        // Kahn's algorithm with a min-heap on addition index keeps the order stable
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(PassId(index));
            let mut next: Vec<usize> = dependents[index].iter().copied().collect();
            next.sort_unstable();
            for dependent in next {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let passes = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &degree)| degree > 0)
                .map(|(index, _)| self.nodes[index].name.clone())
                .collect();
            return Err(RenderGraphError::CyclicDependency { passes });
        }

        Ok(order)
    }

    /// Order the passes and execute each one exactly once.
    ///
    /// The first failing pass aborts the frame; the passes after it do not run.
    pub fn execute(&mut self, frame_index: u64, resources: &mut PipelineResources) -> Result<FrameStats> {
        if self.started {
            let name = self
                .nodes
                .iter()
                .find(|node| node.state == PassState::Executed)
                .or_else(|| self.nodes.first())
                .map(|node| node.name.clone())
                .unwrap_or_default();
            return Err(RenderGraphError::PassAlreadyExecuted(name));
        }

        let order = self.compile()?;
        log::debug!(
            "Frame {} pass order: {:?}",
            frame_index,
            order
                .iter()
                .map(|id| self.nodes[id.0].name.as_str())
                .collect::<Vec<_>>()
        );

        self.started = true;
        let before = resources.stats();
        resources.begin_frame(frame_index, self.declarations.clone());

        for &id in &order {
            let node = &mut self.nodes[id.0];
            log::trace!("Executing pass '{}'", node.name);
            if let Err(error) = self.passes[id.0].execute(&mut self.container, resources) {
                resources.abort_frame();
                log::debug!("Pass '{}' failed: {}", node.name, error);
                return Err(RenderGraphError::PassFailed {
                    pass: node.name.clone(),
                    source: Box::new(error),
                });
            }
            node.state = PassState::Executed;
        }

        resources.end_frame()?;
        let after = resources.stats();

        Ok(FrameStats {
            frame_index,
            pass_order: order
                .iter()
                .map(|id| self.nodes[id.0].name.clone())
                .collect(),
            passes_executed: order.len(),
            cache: CacheStats {
                allocations: after.allocations - before.allocations,
                releases: after.releases - before.releases,
                reuses: after.reuses - before.reuses,
            },
        })
    }

    /// The external final target, if one was given
    pub fn output_target(&self) -> Result<RenderTargetHandle> {
        self.output.ok_or(RenderGraphError::RenderTargetNotSet)
    }

    pub fn pass_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn pass_state(&self, id: PassId) -> Option<PassState> {
        self.nodes.get(id.0).map(|node| node.state)
    }

    /// Pass metadata in addition order
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.nodes
    }

    pub fn declarations(&self) -> &DeclarationTable {
        &self.declarations
    }

    pub fn container(&self) -> &PipelineContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut PipelineContainer {
        &mut self.container
    }

    /// Consume the pipeline and keep what the passes published
    pub fn into_container(self) -> PipelineContainer {
        self.container
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessContext};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Pass that declares fixed reads and writes by name and logs when it runs
    struct NamedPass {
        name: &'static str,
        reads: Vec<&'static str>,
        writes: Vec<&'static str>,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    #[derive(Default)]
    struct Textures(HashMap<&'static str, TextureHandle>);

    impl NamedPass {
        fn new(
            name: &'static str,
            reads: &[&'static str],
            writes: &[&'static str],
            log: &Rc<RefCell<Vec<&'static str>>>,
        ) -> Self {
            Self {
                name,
                reads: reads.to_vec(),
                writes: writes.to_vec(),
                log: log.clone(),
            }
        }
    }

    fn handle(
        builder: &mut PassBuilder<'_>,
        container: &mut PipelineContainer,
        name: &'static str,
    ) -> Result<TextureHandle> {
        let textures = container.create::<Textures>()?;
        if let Some(handle) = textures.0.get(name) {
            return Ok(*handle);
        }
        let handle = builder.create_texture(name, 4, 4, TextureOptions::default())?;
        textures.0.insert(name, handle);
        Ok(handle)
    }

    impl RenderPass for NamedPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, builder: &mut PassBuilder<'_>, container: &mut PipelineContainer) -> Result<()> {
            for name in self.reads.clone() {
                let texture = handle(builder, container, name)?;
                builder.reads(texture)?;
            }
            for name in self.writes.clone() {
                let texture = handle(builder, container, name)?;
                builder.writes(texture)?;
            }
            Ok(())
        }

        fn execute(&mut self, _: &mut PipelineContainer, _: &mut PipelineResources) -> Result<()> {
            self.log.borrow_mut().push(self.name);
            Ok(())
        }
    }

    fn resources() -> PipelineResources {
        PipelineResources::new(Box::new(HeadlessContext::new()))
    }

    #[test]
    fn test_unrelated_passes_keep_addition_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        pipeline.add_pass(NamedPass::new("a", &[], &["x"], &log)).unwrap();
        pipeline.add_pass(NamedPass::new("b", &[], &["y"], &log)).unwrap();
        pipeline.add_pass(NamedPass::new("c", &[], &["z"], &log)).unwrap();

        pipeline.execute(0, &mut resources()).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reader_runs_after_writer() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        pipeline.add_pass(NamedPass::new("c", &["b_out"], &["c_out"], &log)).unwrap();
        pipeline.add_pass(NamedPass::new("b", &["a_out"], &["b_out"], &log)).unwrap();
        pipeline.add_pass(NamedPass::new("a", &[], &["a_out"], &log)).unwrap();

        let order = pipeline.compile().unwrap();
        assert_eq!(order, vec![PassId(2), PassId(1), PassId(0)]);

        pipeline.execute(0, &mut resources()).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_is_reported_before_execution() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        pipeline.add_pass(NamedPass::new("a", &["y"], &["x"], &log)).unwrap();
        pipeline.add_pass(NamedPass::new("b", &["x"], &["y"], &log)).unwrap();
        pipeline.add_pass(NamedPass::new("free", &[], &["z"], &log)).unwrap();

        let err = pipeline.execute(0, &mut resources()).unwrap_err();
        match err {
            RenderGraphError::CyclicDependency { passes } => {
                assert_eq!(passes, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_self_edge_is_ignored() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        pipeline.add_pass(NamedPass::new("feedback", &["x"], &["x"], &log)).unwrap();

        pipeline.execute(0, &mut resources()).unwrap();
        assert_eq!(*log.borrow(), vec!["feedback"]);
    }

    #[test]
    fn test_execute_twice_fails() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut resources = resources();
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        pipeline.add_pass(NamedPass::new("a", &[], &["x"], &log)).unwrap();

        pipeline.execute(0, &mut resources).unwrap();
        assert!(matches!(
            pipeline.execute(1, &mut resources),
            Err(RenderGraphError::PassAlreadyExecuted(name)) if name == "a"
        ));
        assert!(matches!(
            pipeline.add_pass(NamedPass::new("late", &[], &[], &log)),
            Err(RenderGraphError::SetupAfterExecute(_))
        ));
    }

    #[test]
    fn test_output_target_requires_external_target() {
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        let result = pipeline.add_callback_pass(
            "needs_output",
            |builder, _| builder.output_target().map(|_| ()),
            |_, _| Ok(()),
        );
        assert!(matches!(result, Err(RenderGraphError::RenderTargetNotSet)));

        let pipeline = RenderPipeline::new(
            PipelineContainer::new(),
            Some(ExternalTarget::new("screen", 8, 8)),
        );
        assert_eq!(pipeline.output_target().unwrap().width(), 8);
    }

    #[test]
    fn test_failing_pass_aborts_frame() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut resources = resources();
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        pipeline
            .add_callback_pass(
                "broken",
                |_, _| Ok(()),
                |container, _| container.get::<u64>().map(|_| ()),
            )
            .unwrap();
        pipeline.add_pass(NamedPass::new("after", &[], &["x"], &log)).unwrap();

        let err = pipeline.execute(0, &mut resources).unwrap_err();
        assert!(matches!(&err, RenderGraphError::PassFailed { pass, .. } if pass == "broken"));
        assert!(matches!(
            err.root_cause(),
            RenderGraphError::MissingPipelineData { .. }
        ));
        assert!(log.borrow().is_empty());
        assert_eq!(resources.current_frame(), None);

        let commands = resources
            .context_as::<HeadlessContext>()
            .unwrap()
            .command_log()
            .commands();
        assert_eq!(commands.last(), Some(&Command::Discard));
        assert!(!commands.contains(&Command::Flush));
    }

    #[test]
    fn test_failed_frame_cannot_be_resumed() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let calls = Rc::new(RefCell::new(0));
        let mut resources = resources();
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        let counter = calls.clone();
        pipeline
            .add_callback_pass(
                "flaky",
                |_, _| Ok(()),
                move |container, _| {
                    *counter.borrow_mut() += 1;
                    if *counter.borrow() == 1 {
                        container.get::<u64>().map(|_| ())
                    } else {
                        Ok(())
                    }
                },
            )
            .unwrap();

        assert!(pipeline.execute(0, &mut resources).is_err());
        assert!(matches!(
            pipeline.add_pass(NamedPass::new("late", &[], &["x"], &log)),
            Err(RenderGraphError::SetupAfterExecute(name)) if name == "late"
        ));
        assert!(matches!(
            pipeline.execute(1, &mut resources),
            Err(RenderGraphError::PassAlreadyExecuted(name)) if name == "flaky"
        ));
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(pipeline.pass_count(), 1);
    }

    #[test]
    fn test_failed_setup_rolls_back_declarations() {
        let mut pipeline = RenderPipeline::new(PipelineContainer::new(), None);
        let result = pipeline.add_callback_pass(
            "half_done",
            |builder, container| {
                builder.create_texture("x", 4, 4, TextureOptions::default())?;
                container.get::<u64>().map(|_| ())
            },
            |_, _| Ok(()),
        );
        assert!(matches!(
            result,
            Err(RenderGraphError::MissingPipelineData { .. })
        ));
        assert_eq!(pipeline.pass_count(), 0);
        assert!(pipeline.declarations().is_empty());

        pipeline
            .add_callback_pass(
                "retry",
                |builder, _| {
                    let x = builder.create_texture("x", 4, 4, TextureOptions::default())?;
                    builder.writes(x)
                },
                |_, _| Ok(()),
            )
            .unwrap();
        assert_eq!(pipeline.declarations().len(), 1);
    }
}
