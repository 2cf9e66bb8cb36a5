//! Render graph executor

use crate::backend::GraphicsBackend;
use crate::error::FrameError;
use crate::pipeline::command_list::CommandListTable;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Executor for running the compiled render graph
#[derive(Debug, Default)]
pub struct RenderGraphExecutor {
    /// Names of the passes run by the last call to `execute`
    executed: Vec<String>,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed_passes(&self) -> &[String] {
        &self.executed
    }

    /// Register the command list accesses a pass declared for its stage
    fn register_accesses(
        graph: &RenderGraph,
        node: &PassNode,
        command_lists: &mut CommandListTable,
    ) -> Result<(), FrameError> {
        for access in node.accesses() {
            let Some(list) = graph
                .resource(access.resource)
                .and_then(VirtualResource::command_list)
            else {
                continue;
            };
            if let Some(mode) = access.usage.command_list_access() {
                command_lists.register(list, mode, node.stage)?;
            }
        }
        Ok(())
    }

    /// Execute the render graph
    ///
    /// Stops at the first failing pass; passes after it are not recorded.
    pub fn execute(
        &mut self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        backend: &mut dyn GraphicsBackend,
        command_lists: &mut CommandListTable,
        frame: &FrameParams,
    ) -> Result<(), FrameError> {
        self.executed.clear();

        for &pass_id in &compiled.pass_order {
            let (Some(pass), Some(node)) = (graph.get_pass(pass_id), graph.get_pass_node(pass_id))
            else {
                return Err(GraphError::UnknownPass(pass_id).into());
            };

            Self::register_accesses(graph, node, command_lists)?;

            log::debug!("Executing pass {} ({})", node.name, node.stage);
            let mut ctx = PassExecuteContext {
                backend: &mut *backend,
                command_lists: &mut *command_lists,
                frame,
            };
            if let Err(err) = pass.execute(&mut ctx) {
                log::warn!("Pass {} failed: {}", node.name, err);
                return Err(err);
            }
            self.executed.push(node.name.clone());
        }

        Ok(())
    }
}
