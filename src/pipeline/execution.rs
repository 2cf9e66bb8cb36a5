//! Execution of the command list inside a render pass
//!
//! Uncompacted slots are encoded one indirect draw each, with the slot's
//! bindings re-established before every draw. A compacted region binds once
//! and is drawn with a single count-driven multi-draw when the device supports
//! it, or one indirect draw per slot otherwise. Empty slots resolve to
//! zero-instance draws and produce nothing.

use std::ops::Range;

use crate::backend::*;
use crate::error::{FrameError, PipelineStage, SetupError};
use crate::pipeline::command_list::{AccessMode, CommandList, CommandListRef, ExecutionSegment};
use crate::pipeline::shader::validate_wgsl;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Bindings of the scene binding set, shared by every command of the list
#[derive(Debug, Clone, Copy)]
pub struct DrawBindings {
    pub scene_binding: BindGroupHandle,
    pub vertex_store: BufferHandle,
}

impl DrawBindings {
    fn bind(&self, backend: &mut dyn GraphicsBackend) {
        backend.set_bind_group(0, self.scene_binding);
        backend.set_vertex_buffer(0, self.vertex_store, 0);
    }
}

/// Encode the draws of `range` into the render pass currently open on
/// `backend`. The range must already have been validated against `list`.
///
/// Slot metadata stays on the device, so binding changes are decided on the
/// host: `bindings` is bound before each uncompacted slot and once at the
/// start of each compacted region.
///
/// Returns the number of commands encoded.
pub fn encode_draws(
    backend: &mut dyn GraphicsBackend,
    list: &CommandList,
    range: Range<u32>,
    bindings: &DrawBindings,
    multi_draw: bool,
) -> usize {
    let args = list.args_buffer();
    let mut encoded = 0;

    for segment in list.segments(range) {
        match segment {
            ExecutionSegment::Slots(slots) => {
                for slot in slots {
                    bindings.bind(backend);
                    backend.draw_indirect(args, CommandList::args_offset(slot));
                    encoded += 3;
                }
            }
            ExecutionSegment::Compacted(region) => {
                bindings.bind(backend);
                encoded += 2;
                if multi_draw {
                    backend.multi_draw_indirect_count(
                        args,
                        CommandList::args_offset(region.start),
                        list.header_buffer(),
                        0,
                        region.len() as u32,
                    );
                    encoded += 1;
                } else {
                    for slot in region {
                        backend.draw_indirect(args, CommandList::args_offset(slot));
                        encoded += 1;
                    }
                }
            }
        }
    }
    encoded
}

/// Validate the draw shader and create the render pipeline.
pub fn create_draw_pipeline<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    scene_layout: BindGroupLayoutHandle,
    format: TextureFormat,
) -> Result<RenderPipelineHandle, SetupError> {
    validate_wgsl(
        "Indirect Draw",
        DRAW_SHADER,
        &[
            ("vs_main", naga::ShaderStage::Vertex),
            ("fs_main", naga::ShaderStage::Fragment),
        ],
    )?;

    let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("Indirect Draw Pipeline".into()),
        shader: DRAW_SHADER.into(),
        vertex_layouts: vec![Vertex::layout()],
        bind_group_layouts: vec![scene_layout],
        color_targets: vec![ColorTargetState {
            format,
            blend: Some(BlendState::alpha_blending()),
        }],
    })?;
    Ok(pipeline)
}

/// Resources used by [`IndirectDrawPass`]
#[derive(Debug, Clone, Copy)]
pub struct ExecutionResources {
    pub command_list: ResourceId,
    pub frame_state: ResourceId,
    pub object_table: ResourceId,
    pub vertex_store: ResourceId,
    pub color_target: ResourceId,
}

/// Render pass clearing the color target and executing the command list
pub struct IndirectDrawPass {
    pipeline: RenderPipelineHandle,
    bindings: DrawBindings,
    color_view: TextureViewHandle,
    clear_color: [f32; 4],
    list: CommandListRef,
    resources: ExecutionResources,
    multi_draw: bool,
}

impl IndirectDrawPass {
    pub fn new(
        pipeline: RenderPipelineHandle,
        bindings: DrawBindings,
        color_view: TextureViewHandle,
        list: CommandListRef,
        resources: ExecutionResources,
    ) -> Self {
        Self {
            pipeline,
            bindings,
            color_view,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            list,
            resources,
            multi_draw: false,
        }
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    /// Draw compacted regions with count-driven multi-draw
    pub fn with_multi_draw(mut self, multi_draw: bool) -> Self {
        self.multi_draw = multi_draw;
        self
    }
}

impl RenderPass for IndirectDrawPass {
    fn name(&self) -> &str {
        "Indirect Draw"
    }

    fn stage(&self) -> PipelineStage {
        PipelineStage::Execution
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.resources.command_list, ResourceUsage::IndirectRead);
        ctx.read(self.resources.frame_state, ResourceUsage::UniformBuffer);
        ctx.read(self.resources.object_table, ResourceUsage::StorageBufferRead);
        ctx.read(self.resources.vertex_store, ResourceUsage::VertexBuffer);
        ctx.write(self.resources.color_target, ResourceUsage::RenderTarget);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), FrameError> {
        let list = ctx.command_lists.require(self.list, AccessMode::Execute)?;
        let range = ctx.frame.draw_range.clone();
        list.validate_range(&range)?;

        let backend = &mut *ctx.backend;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Indirect Draw".into()),
            color_attachments: vec![ColorAttachment {
                view: self.color_view,
                load_op: LoadOp::Clear(self.clear_color),
            }],
        });
        backend.set_render_pipeline(self.pipeline);
        let encoded = encode_draws(backend, list, range.clone(), &self.bindings, self.multi_draw);
        log::debug!("Encoded {} commands for slots {:?}", encoded, range);

        backend
            .end_render_pass()
            .map_err(FrameError::device(PipelineStage::Execution))
    }
}

/// Shared vertex and fragment shader for every object
///
/// The instance index carries the object index, which locates the object's
/// placement in the object table.
pub const DRAW_SHADER: &str = r#"
struct FrameState {
    translation: vec2<f32>,
    aspect_scale: vec2<f32>,
}

struct ObjectParams {
    start_vertex: u32,
    num_vertices: u32,
    position: vec2<f32>,
    bounding_radius: f32,
    _padding: u32,
}

struct CullParams {
    object_count: u32,
    binding_set: u32,
    view_scale: f32,
    _padding: u32,
}

@group(0) @binding(0) var<uniform> frame: FrameState;
@group(0) @binding(1) var<storage, read> objects: array<ObjectParams>;
@group(0) @binding(2) var<uniform> cull: CullParams;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput, @builtin(instance_index) instance: u32) -> VertexOutput {
    let obj = objects[instance];
    let world = frame.translation + obj.position + in.position;
    let clip = frame.aspect_scale * cull.view_scale * world;

    var out: VertexOutput;
    out.clip_position = vec4<f32>(clip, 0.0, 1.0);
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::EncodedCommand;

    struct Fixture {
        backend: DummyBackend,
        list: CommandList,
        bindings: DrawBindings,
        target: TextureViewHandle,
        pipeline: RenderPipelineHandle,
    }

    fn fixture(capacity: u32, multi_draw: bool) -> Fixture {
        let mut backend = DummyBackend::with_capabilities(BackendCapabilities {
            multi_draw_indirect_count: multi_draw,
        });
        let layout = backend
            .create_bind_group_layout(&CommandList::binding_layout())
            .unwrap();
        let list = CommandList::create(&mut backend, "list", capacity, layout).unwrap();
        let store = backend
            .create_buffer(&BufferDescriptor::new("store", 64, BufferUsage::VERTEX))
            .unwrap();
        let scene = backend.create_bind_group(layout, &[]).unwrap();
        let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let target = backend.create_texture_view(texture).unwrap();
        let pipeline = create_draw_pipeline(&mut backend, layout, TextureFormat::Rgba8Unorm).unwrap();
        Fixture {
            backend,
            list,
            bindings: DrawBindings {
                scene_binding: scene,
                vertex_store: store,
            },
            target,
            pipeline,
        }
    }

    fn encode(fixture: &mut Fixture, range: Range<u32>, multi_draw: bool) -> usize {
        let backend = &mut fixture.backend;
        backend.begin_frame().unwrap();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![ColorAttachment {
                view: fixture.target,
                load_op: LoadOp::Load,
            }],
        });
        backend.set_render_pipeline(fixture.pipeline);
        let encoded = encode_draws(backend, &fixture.list, range, &fixture.bindings, multi_draw);
        backend.end_render_pass().unwrap();
        backend.end_frame().unwrap();
        encoded
    }

    #[test]
    fn test_uncompacted_slots_rebind_per_draw() {
        let mut fixture = fixture(4, true);
        let encoded = encode(&mut fixture, 0..4, true);
        let log = fixture.backend.frame_log();
        assert_eq!(encoded, 12);
        assert_eq!(log.draw_command_count(), 4);
        assert_eq!(log.bind_group_changes(), 4);
        assert_eq!(
            log.render_commands[3],
            EncodedCommand::DrawIndirect {
                buffer: fixture.list.args_buffer(),
                offset: 0,
            }
        );
        // Fresh lists hold only empty slots
        assert!(log.draws.is_empty());
    }

    #[test]
    fn test_compacted_region_uses_multi_draw() {
        let mut fixture = fixture(8, true);
        fixture.list.mark_compacted(2..8);
        let encoded = encode(&mut fixture, 0..8, true);
        let log = fixture.backend.frame_log();
        // Two rebinding slots, then one bind and one multi-draw
        assert_eq!(encoded, 2 * 3 + 3);
        assert_eq!(log.draw_command_count(), 3);
        assert!(log.render_commands.contains(&EncodedCommand::MultiDrawIndirectCount {
            buffer: fixture.list.args_buffer(),
            offset: 2 * CommandList::ARGS_STRIDE,
            count_buffer: fixture.list.header_buffer(),
            count_offset: 0,
            max_count: 6,
        }));
    }

    #[test]
    fn test_compacted_region_without_multi_draw() {
        let mut fixture = fixture(8, false);
        fixture.list.mark_compacted(0..8);
        let encoded = encode(&mut fixture, 0..8, false);
        let log = fixture.backend.frame_log();
        assert_eq!(encoded, 2 + 8);
        assert_eq!(log.bind_group_changes(), 1);
        assert_eq!(log.draw_command_count(), 8);
    }

    #[test]
    fn test_empty_range_encodes_nothing() {
        let mut fixture = fixture(4, true);
        assert_eq!(encode(&mut fixture, 2..2, true), 0);
        assert_eq!(fixture.backend.frame_log().draw_command_count(), 0);
    }

    #[test]
    fn test_shader_validates() {
        validate_wgsl(
            "draw",
            DRAW_SHADER,
            &[
                ("vs_main", naga::ShaderStage::Vertex),
                ("fs_main", naga::ShaderStage::Fragment),
            ],
        )
        .unwrap();
    }
}
