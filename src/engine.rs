//! Main pipeline orchestrator
//!
//! [`GpuDrivenPipeline`] owns the device, the packed scene and the command
//! list, and records one frame per call: frame state upload, command
//! generation, compaction and indirect drawing, submitted together.

use std::ops::Range;

use crate::backend::*;
use crate::error::{FrameError, PipelineStage, SetupError};
use crate::pipeline::command_list::{
    validate_execution_range, CommandList, CommandListRef, CommandListSnapshot, CommandListTable,
};
use crate::pipeline::compaction::{
    compaction_params_layout, create_compaction_pipeline, CompactionParams, CompactionPass,
};
use crate::pipeline::execution::{
    create_draw_pipeline, DrawBindings, ExecutionResources, IndirectDrawPass,
};
use crate::pipeline::generation::{
    create_generation_pipeline, CommandGenerationPass, CullParams, GenerationResources,
};
use crate::pipeline::{scene_binding_layout, MAX_WORKGROUPS_PER_DIMENSION, SCENE_BINDING_SET};
use crate::render_graph::*;
use crate::resources::{GpuMeshPack, MeshPack, ObjectDescriptor};
use crate::EngineConfig;

/// Format of the color target
pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Summary of a recorded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub object_count: u32,
    /// Slots executed by the draw stage
    pub draw_range: Range<u32>,
    /// Region compacted this frame
    pub compacted: Option<Range<u32>>,
    pub multi_draw: bool,
}

/// Contents of the color target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOutput {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows
    pub pixels: Vec<u8>,
}

impl FrameOutput {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = ((y * self.width + x) * 4) as usize;
        let texel = self.pixels.get(start..start + 4)?;
        Some([texel[0], texel[1], texel[2], texel[3]])
    }

    /// Number of pixels differing from `color`
    pub fn count_not(&self, color: [u8; 4]) -> usize {
        self.pixels
            .chunks_exact(4)
            .filter(|texel| *texel != color.as_slice())
            .count()
    }
}

/// GPU-driven renderer of a static set of objects
pub struct GpuDrivenPipeline<B: GraphicsBackend> {
    backend: B,
    config: EngineConfig,

    mesh_pack: MeshPack,
    gpu_pack: GpuMeshPack,
    frame_buffer: BufferHandle,
    color_texture: TextureHandle,

    command_lists: CommandListTable,
    command_list: CommandListRef,
    compaction_range: Option<Range<u32>>,
    multi_draw: bool,

    graph: RenderGraph,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,
    frame_index: u64,
}

impl<B: GraphicsBackend> GpuDrivenPipeline<B> {
    /// Pack `objects`, create every device resource and compile the frame graph.
    pub fn new(
        mut backend: B,
        config: EngineConfig,
        objects: Vec<ObjectDescriptor>,
    ) -> Result<Self, SetupError> {
        config.validate()?;

        let mesh_pack = MeshPack::build(objects)?;
        let object_count = mesh_pack.object_count();
        let workgroups = object_count.div_ceil(config.workgroup_size);
        if workgroups > MAX_WORKGROUPS_PER_DIMENSION {
            return Err(SetupError::InvalidConfig(format!(
                "{} objects need {} workgroups of {}, more than one dispatch allows",
                object_count, workgroups, config.workgroup_size
            )));
        }
        let compaction_range = config.resolved_compaction_range(object_count)?;

        let gpu_pack = GpuMeshPack::upload(&mut backend, &mesh_pack)?;

        let frame_buffer = backend.create_buffer_init(
            &BufferDescriptor::new(
                "Frame State",
                std::mem::size_of::<FrameState>() as u64,
                BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            ),
            bytemuck::bytes_of(&FrameState::default()),
        )?;
        let cull_params = CullParams {
            object_count,
            binding_set: SCENE_BINDING_SET,
            view_scale: config.view_scale,
            _padding: 0,
        };
        let cull_buffer = backend.create_buffer_init(
            &BufferDescriptor::new(
                "Cull Params",
                std::mem::size_of::<CullParams>() as u64,
                BufferUsage::UNIFORM,
            ),
            bytemuck::bytes_of(&cull_params),
        )?;

        let scene_layout = backend.create_bind_group_layout(&scene_binding_layout())?;
        let list_layout = backend.create_bind_group_layout(&CommandList::binding_layout())?;
        let scene_binding = backend.create_bind_group(
            scene_layout,
            &[
                (0, BindGroupEntry::buffer(frame_buffer)),
                (1, BindGroupEntry::buffer(gpu_pack.object_table)),
                (2, BindGroupEntry::buffer(cull_buffer)),
            ],
        )?;

        let mut command_lists = CommandListTable::new();
        let command_list = command_lists.insert(CommandList::create(
            &mut backend,
            "Command List",
            object_count,
            list_layout,
        )?);

        let generation_pipeline = create_generation_pipeline(
            &mut backend,
            [scene_layout, list_layout],
            config.workgroup_size,
        )?;
        let draw_pipeline = create_draw_pipeline(&mut backend, scene_layout, COLOR_FORMAT)?;

        let color_texture = backend.create_texture(&TextureDescriptor {
            label: Some("Color Target".into()),
            width: config.width,
            height: config.height,
            format: COLOR_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
        })?;
        let color_view = backend.create_texture_view(color_texture)?;

        let multi_draw =
            config.multi_draw && backend.capabilities().multi_draw_indirect_count;
        if config.multi_draw && !multi_draw {
            log::warn!(
                "{} lacks count-driven multi-draw, compacted regions fall back to one draw per slot",
                backend.name()
            );
        }

        let mut graph = RenderGraph::new();
        let frame_resource = graph.import_buffer("frame_state", frame_buffer);
        let objects_resource = graph.import_buffer("object_table", gpu_pack.object_table);
        let vertex_resource = graph.import_buffer("vertex_store", gpu_pack.vertex_store);
        let list_resource = graph.import_command_list("command_list", command_list);
        let color_resource = graph.import_texture("color_target", color_view);

        graph.add_pass(
            CommandGenerationPass::new(
                generation_pipeline,
                scene_binding,
                command_list,
                GenerationResources {
                    frame_state: frame_resource,
                    object_table: objects_resource,
                    command_list: list_resource,
                },
                object_count,
                config.workgroup_size,
            ),
        );

        if let Some(range) = &compaction_range {
            let params_layout = backend.create_bind_group_layout(&compaction_params_layout())?;
            let params_buffer = backend.create_buffer_init(
                &BufferDescriptor::new(
                    "Compaction Params",
                    std::mem::size_of::<CompactionParams>() as u64,
                    BufferUsage::UNIFORM,
                ),
                bytemuck::bytes_of(&CompactionParams::new(range)),
            )?;
            let params_binding = backend
                .create_bind_group(params_layout, &[(0, BindGroupEntry::buffer(params_buffer))])?;
            let compaction_pipeline =
                create_compaction_pipeline(&mut backend, [params_layout, list_layout])?;
            graph.add_pass(
                CompactionPass::new(
                    compaction_pipeline,
                    params_binding,
                    command_list,
                    list_resource,
                    range.clone(),
                ),
            );
        }

        graph.add_pass(
            IndirectDrawPass::new(
                draw_pipeline,
                DrawBindings {
                    scene_binding,
                    vertex_store: gpu_pack.vertex_store,
                },
                color_view,
                command_list,
                ExecutionResources {
                    command_list: list_resource,
                    frame_state: frame_resource,
                    object_table: objects_resource,
                    vertex_store: vertex_resource,
                    color_target: color_resource,
                },
            )
            .with_clear_color(config.clear_color)
            .with_multi_draw(multi_draw),
        );

        let compiled = graph.compile()?;

        log::info!(
            "GPU-driven pipeline ready on {}: {} objects, {} vertices, compaction {:?}, multi-draw {}",
            backend.name(),
            object_count,
            mesh_pack.vertex_count(),
            compaction_range,
            multi_draw
        );

        Ok(Self {
            backend,
            config,
            mesh_pack,
            gpu_pack,
            frame_buffer,
            color_texture,
            command_lists,
            command_list,
            compaction_range,
            multi_draw,
            graph,
            compiled,
            executor: RenderGraphExecutor::new(),
            frame_index: 0,
        })
    }

    /// Record and submit a frame drawing every slot.
    pub fn render_frame(&mut self, state: &FrameState) -> Result<FrameReport, FrameError> {
        let range = 0..self.object_count();
        self.render_frame_range(state, range)
    }

    /// Record and submit a frame drawing the slots in `draw_range`.
    ///
    /// The range is checked against the list capacity and this frame's
    /// compaction region before anything is recorded.
    pub fn render_frame_range(
        &mut self,
        state: &FrameState,
        draw_range: Range<u32>,
    ) -> Result<FrameReport, FrameError> {
        validate_execution_range(
            &draw_range,
            self.object_count(),
            self.compaction_range.as_ref(),
        )?;

        let frame_index = self.frame_index;
        self.frame_index += 1;
        log::debug!("Frame {}: drawing slots {:?}", frame_index, draw_range);

        self.command_lists.begin_frame(frame_index);
        self.backend
            .begin_frame()
            .map_err(FrameError::device(PipelineStage::Submission))?;
        self.backend
            .write_buffer(self.frame_buffer, 0, bytemuck::bytes_of(state))
            .map_err(FrameError::device(PipelineStage::FrameUpload))?;

        let frame = FrameParams {
            frame_index,
            draw_range: draw_range.clone(),
        };
        self.executor.execute(
            &self.graph,
            &self.compiled,
            &mut self.backend,
            &mut self.command_lists,
            &frame,
        )?;

        self.backend
            .end_frame()
            .map_err(FrameError::device(PipelineStage::Submission))?;

        let compacted = self
            .command_lists
            .get(self.command_list)?
            .compacted_region()
            .cloned();
        Ok(FrameReport {
            frame_index,
            object_count: self.object_count(),
            draw_range,
            compacted,
            multi_draw: self.multi_draw,
        })
    }

    /// Read the color target back to the host. Waits for the device.
    pub fn read_color_target(&mut self) -> BackendResult<FrameOutput> {
        let pixels = self.backend.read_texture(self.color_texture)?;
        Ok(FrameOutput {
            width: self.config.width,
            height: self.config.height,
            pixels,
        })
    }

    /// Read the command list back to the host. Waits for the device.
    pub fn read_command_list(&mut self) -> Result<CommandListSnapshot, FrameError> {
        let list = self.command_lists.get(self.command_list)?;
        list.read_snapshot(&mut self.backend)
            .map_err(FrameError::device(PipelineStage::Submission))
    }

    pub fn object_count(&self) -> u32 {
        self.mesh_pack.object_count()
    }

    pub fn mesh_pack(&self) -> &MeshPack {
        &self.mesh_pack
    }

    pub fn gpu_mesh_pack(&self) -> &GpuMeshPack {
        &self.gpu_pack
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compaction range applied every frame, if compaction is enabled
    pub fn compaction_range(&self) -> Option<&Range<u32>> {
        self.compaction_range.as_ref()
    }

    pub fn multi_draw_enabled(&self) -> bool {
        self.multi_draw
    }

    pub fn command_list(&self) -> CommandListRef {
        self.command_list
    }

    pub fn command_lists(&self) -> &CommandListTable {
        &self.command_lists
    }

    /// Passes run by the last frame, in order
    pub fn executed_passes(&self) -> &[String] {
        self.executor.executed_passes()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame_index
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
