//! Render pass definitions for the render graph

use std::ops::Range;

use crate::backend::GraphicsBackend;
use crate::error::{FrameError, PipelineStage};
use crate::pipeline::command_list::CommandListTable;
use crate::render_graph::resource::*;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for declaring pass dependencies
pub struct PassSetupContext<'a> {
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
}

impl<'a> PassSetupContext<'a> {
    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }
}

/// Per-frame parameters visible to every pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub frame_index: u64,
    /// Slots the execution stage draws
    pub draw_range: Range<u32>,
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub command_lists: &'a mut CommandListTable,
    pub frame: &'a FrameParams,
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Stage failures of this pass are attributed to
    fn stage(&self) -> PipelineStage;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Execute phase - record commands
    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), FrameError>;
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub stage: PipelineStage,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.outputs.iter().any(|a| a.resource == resource)
    }

    /// All declared accesses, reads first
    pub fn accesses(&self) -> impl Iterator<Item = &ResourceAccess> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}
