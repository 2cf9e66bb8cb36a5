//! Render graph definition and compilation

use crate::backend::{BufferHandle, TextureViewHandle};
use crate::error::PipelineStage;
use crate::pipeline::command_list::CommandListRef;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors detected while building or compiling a graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("pass {pass} uses unknown resource {resource:?}")]
    UnknownResource { pass: String, resource: ResourceId },
    #[error("pass {pass} uses command list {list} as {usage:?}, which no stage can register")]
    UnsupportedCommandListUsage {
        pass: String,
        list: String,
        usage: ResourceUsage,
    },
    #[error("pass {pass} ({stage}) cannot access command list {list} as {usage:?}")]
    CommandListAccessOutOfStage {
        pass: String,
        stage: PipelineStage,
        list: String,
        usage: ResourceUsage,
    },
    #[error("dependency cycle between passes {0:?}")]
    Cycle(Vec<String>),
    #[error("compiled order names unknown pass {0:?}")]
    UnknownPass(PassId),
}

/// The main render graph structure
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_pass_id: u32,
    next_resource_id: u32,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
        }
    }

    fn next_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        id
    }

    /// Track an existing buffer
    pub fn import_buffer(&mut self, name: &str, handle: BufferHandle) -> ResourceId {
        let id = self.next_id();
        self.resources.push(VirtualResource::Buffer(VirtualBuffer {
            id,
            name: name.to_string(),
            handle,
        }));
        id
    }

    /// Track an existing texture view
    pub fn import_texture(&mut self, name: &str, view: TextureViewHandle) -> ResourceId {
        let id = self.next_id();
        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            name: name.to_string(),
            view,
        }));
        id
    }

    /// Track a command list; its accesses are registered as passes run
    pub fn import_command_list(&mut self, name: &str, list: CommandListRef) -> ResourceId {
        let id = self.next_id();
        self.resources
            .push(VirtualResource::CommandList(VirtualCommandList {
                id,
                name: name.to_string(),
                list,
            }));
        id
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let stage = pass.stage();
        let mut boxed_pass = Box::new(pass);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                inputs: &mut inputs,
                outputs: &mut outputs,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            stage,
            inputs,
            outputs,
        });

        id
    }

    fn check_accesses(&self) -> Result<(), GraphError> {
        for node in &self.pass_nodes {
            for access in node.accesses() {
                let resource = self.resource(access.resource).ok_or_else(|| {
                    GraphError::UnknownResource {
                        pass: node.name.clone(),
                        resource: access.resource,
                    }
                })?;
                if resource.command_list().is_none() {
                    continue;
                }
                let mode = access.usage.command_list_access().ok_or_else(|| {
                    GraphError::UnsupportedCommandListUsage {
                        pass: node.name.clone(),
                        list: resource.name().to_string(),
                        usage: access.usage,
                    }
                })?;
                if !mode.allowed_in(node.stage) {
                    return Err(GraphError::CommandListAccessOutOfStage {
                        pass: node.name.clone(),
                        stage: node.stage,
                        list: resource.name().to_string(),
                        usage: access.usage,
                    });
                }
            }
        }
        Ok(())
    }

    /// Compile the graph into a pass order.
    ///
    /// A pass runs after every other pass writing a resource it reads. Passes
    /// with no ordering constraint between them keep their insertion order.
    pub fn compile(&self) -> Result<CompiledGraph, GraphError> {
        self.check_accesses()?;

        let count = self.pass_nodes.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];

        for (reader_index, reader) in self.pass_nodes.iter().enumerate() {
            for (writer_index, writer) in self.pass_nodes.iter().enumerate() {
                if reader_index == writer_index {
                    continue;
                }
                if reader
                    .inputs
                    .iter()
                    .any(|input| writer.writes_resource(input.resource))
                {
                    dependents[writer_index].push(reader_index);
                    in_degree[reader_index] += 1;
                }
            }
        }

        // Kahn's algorithm, always taking the earliest-added ready pass
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(count);
        while let Some(index) = ready.pop_first() {
            sorted.push(index);
            for &dependent in &dependents[index] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if sorted.len() < count {
            let stuck = (0..count)
                .filter(|i| !sorted.contains(i))
                .map(|i| self.pass_nodes[i].name.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        let pass_order: Vec<PassId> = sorted.iter().map(|&i| self.pass_nodes[i].id).collect();
        log::debug!(
            "Compiled render graph: {:?}",
            sorted
                .iter()
                .map(|&i| self.pass_nodes[i].name.as_str())
                .collect::<Vec<_>>()
        );

        Ok(CompiledGraph { pass_order })
    }

    pub fn resource(&self, id: ResourceId) -> Option<&VirtualResource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Pass order produced by [`RenderGraph::compile`]
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    struct TestPass {
        name: &'static str,
        stage: PipelineStage,
        reads: Vec<(ResourceId, ResourceUsage)>,
        writes: Vec<(ResourceId, ResourceUsage)>,
    }

    impl TestPass {
        fn new(name: &'static str, stage: PipelineStage) -> Self {
            Self {
                name,
                stage,
                reads: Vec::new(),
                writes: Vec::new(),
            }
        }

        fn reads(mut self, resource: ResourceId, usage: ResourceUsage) -> Self {
            self.reads.push((resource, usage));
            self
        }

        fn writes(mut self, resource: ResourceId, usage: ResourceUsage) -> Self {
            self.writes.push((resource, usage));
            self
        }
    }

    impl RenderPass for TestPass {
        fn name(&self) -> &str {
            self.name
        }

        fn stage(&self) -> PipelineStage {
            self.stage
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for &(resource, usage) in &self.reads {
                ctx.read(resource, usage);
            }
            for &(resource, usage) in &self.writes {
                ctx.write(resource, usage);
            }
        }

        fn execute(&self, _ctx: &mut PassExecuteContext) -> Result<(), FrameError> {
            Ok(())
        }
    }

    fn order(graph: &RenderGraph, compiled: &CompiledGraph) -> Vec<String> {
        compiled
            .pass_order
            .iter()
            .map(|&id| graph.get_pass_node(id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_producers_run_before_consumers() {
        let mut graph = RenderGraph::new();
        let list = graph.import_command_list("commands", CommandListRef(0));
        let target = graph.import_texture("color", TextureViewHandle(0));

        // Added in reverse of their dependency order
        graph.add_pass(
            TestPass::new("draw", PipelineStage::Execution)
                .reads(list, ResourceUsage::IndirectRead)
                .writes(target, ResourceUsage::RenderTarget),
        );
        graph.add_pass(
            TestPass::new("compact", PipelineStage::Compaction)
                .reads(list, ResourceUsage::StorageBufferReadWrite)
                .writes(list, ResourceUsage::StorageBufferReadWrite),
        );
        graph.add_pass(
            TestPass::new("generate", PipelineStage::CommandGeneration)
                .writes(list, ResourceUsage::StorageBufferWrite),
        );

        let compiled = graph.compile().unwrap();
        assert_eq!(order(&graph, &compiled), ["generate", "compact", "draw"]);
    }

    #[test]
    fn test_independent_passes_keep_insertion_order() {
        let mut graph = RenderGraph::new();
        for name in ["a", "b", "c"] {
            graph.add_pass(TestPass::new(name, PipelineStage::CommandGeneration));
        }
        let compiled = graph.compile().unwrap();
        assert_eq!(order(&graph, &compiled), ["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = RenderGraph::new();
        let x = graph.import_buffer("x", BufferHandle(0));
        let y = graph.import_buffer("y", BufferHandle(1));
        graph.add_pass(
            TestPass::new("first", PipelineStage::CommandGeneration)
                .reads(x, ResourceUsage::StorageBufferRead)
                .writes(y, ResourceUsage::StorageBufferWrite),
        );
        graph.add_pass(
            TestPass::new("second", PipelineStage::CommandGeneration)
                .reads(y, ResourceUsage::StorageBufferRead)
                .writes(x, ResourceUsage::StorageBufferWrite),
        );
        assert!(matches!(graph.compile(), Err(GraphError::Cycle(names)) if names.len() == 2));
    }

    #[test]
    fn test_command_list_usage_is_checked() {
        let mut graph = RenderGraph::new();
        let list = graph.import_command_list("commands", CommandListRef(0));
        graph.add_pass(
            TestPass::new("draw", PipelineStage::Execution)
                .writes(list, ResourceUsage::StorageBufferWrite),
        );
        assert!(matches!(
            graph.compile(),
            Err(GraphError::CommandListAccessOutOfStage { .. })
        ));

        let mut graph = RenderGraph::new();
        let list = graph.import_command_list("commands", CommandListRef(0));
        graph.add_pass(
            TestPass::new("generate", PipelineStage::CommandGeneration)
                .reads(list, ResourceUsage::UniformBuffer),
        );
        assert!(matches!(
            graph.compile(),
            Err(GraphError::UnsupportedCommandListUsage { .. })
        ));
    }

    #[test]
    fn test_unknown_resource() {
        let mut graph = RenderGraph::new();
        graph.add_pass(
            TestPass::new("generate", PipelineStage::CommandGeneration)
                .reads(ResourceId(42), ResourceUsage::UniformBuffer),
        );
        assert!(matches!(
            graph.compile(),
            Err(GraphError::UnknownResource { .. })
        ));
    }
}
