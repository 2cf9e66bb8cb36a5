//! Visibility and command generation compute pass
//!
//! One lane per object. Each lane tests its object's bounding circle against
//! the viewport in clip space and writes exactly one slot of the command list:
//! a single-instance draw over the object's vertex range when visible, the
//! empty marker otherwise. The instance index of the draw is the object index,
//! which the shared vertex shader uses to look up the object's parameters.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::backend::*;
use crate::error::{FrameError, PipelineStage, SetupError};
use crate::pipeline::command_list::{AccessMode, CommandListRef, CommandSlot, CompactionHeader};
use crate::pipeline::shader::validate_wgsl;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Entry point of [`GENERATION_SHADER`]
pub const GENERATION_ENTRY_POINT: &str = "generate_commands";

/// Per-pipeline culling parameters, bound next to the frame state
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct CullParams {
    pub object_count: u32,
    /// Binding set recorded into populated slots
    pub binding_set: u32,
    /// World to clip scale applied before the aspect correction
    pub view_scale: f32,
    pub _padding: u32,
}

/// Whether an object's bounding circle may cover part of the viewport.
///
/// Rejects only when the clip-space bounds lie strictly outside one side of
/// the unit viewport. A negative scale mirrors the position but never the
/// extent. Non-finite inputs compare false and keep the object.
pub fn is_visible(frame: &FrameState, object: &ObjectParams, view_scale: f32) -> bool {
    let scale = frame.aspect_scale * view_scale;
    let clip = scale * (frame.translation + object.position);
    let extent = (scale * object.bounding_radius).abs();

    let outside = clip.x + extent.x < -1.0
        || clip.x - extent.x > 1.0
        || clip.y + extent.y < -1.0
        || clip.y - extent.y > 1.0;
    !outside
}

/// Slot value for object `index`
pub fn generate_slot(
    index: u32,
    frame: &FrameState,
    object: &ObjectParams,
    params: &CullParams,
) -> CommandSlot {
    if !is_visible(frame, object, params.view_scale) {
        return CommandSlot::EMPTY;
    }
    CommandSlot {
        args: DrawIndirectArgs {
            vertex_count: object.num_vertices,
            instance_count: 1,
            first_vertex: object.start_vertex,
            first_instance: index,
        },
        meta: SlotMeta {
            binding_set: params.binding_set,
            flags: SLOT_POPULATED,
        },
    }
}

/// Host implementation of [`GENERATION_SHADER`]
///
/// Each workgroup owns one contiguous chunk of slots, and chunks are
/// processed in parallel.
#[derive(Debug)]
pub struct GenerationKernel {
    workgroup_size: u32,
}

impl GenerationKernel {
    pub fn new(workgroup_size: u32) -> Self {
        Self {
            workgroup_size: workgroup_size.max(1),
        }
    }
}

impl HostKernel for GenerationKernel {
    fn label(&self) -> &str {
        GENERATION_ENTRY_POINT
    }

    fn dispatch(&self, bindings: &mut HostBindings, workgroups: [u32; 3]) -> BackendResult<()> {
        let frame: FrameState = bindings.read_one(0, 0)?;
        let objects: Vec<ObjectParams> = bindings.read(0, 1)?;
        let params: CullParams = bindings.read_one(0, 2)?;
        let mut args: Vec<DrawIndirectArgs> = bindings.read(1, 0)?;
        let mut metas: Vec<SlotMeta> = bindings.read(1, 1)?;

        bindings.write(1, 2, &[CompactionHeader::default()])?;

        let lanes = workgroups[0] as u64 * self.workgroup_size as u64;
        let active = [
            lanes,
            params.object_count as u64,
            objects.len() as u64,
            args.len() as u64,
            metas.len() as u64,
        ]
        .into_iter()
        .min()
        .unwrap_or(0) as usize;

        let chunk = self.workgroup_size as usize;
        args[..active]
            .par_chunks_mut(chunk)
            .zip(metas[..active].par_chunks_mut(chunk))
            .enumerate()
            .for_each(|(group, (args, metas))| {
                let base = group * chunk;
                for (lane, (args, meta)) in args.iter_mut().zip(metas.iter_mut()).enumerate() {
                    let index = base + lane;
                    let slot = generate_slot(index as u32, &frame, &objects[index], &params);
                    *args = slot.args;
                    *meta = slot.meta;
                }
            });

        bindings.write(1, 0, &args)?;
        bindings.write(1, 1, &metas)
    }
}

/// WGSL source of the generation kernel for a workgroup size
pub fn generation_shader(workgroup_size: u32) -> String {
    GENERATION_SHADER.replace("$WORKGROUP_SIZE", &workgroup_size.to_string())
}

/// Validate the generation shader and create its compute pipeline.
///
/// `layouts` are the scene binding layout (group 0) and the command list
/// argument binding layout (group 1).
pub fn create_generation_pipeline<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    layouts: [BindGroupLayoutHandle; 2],
    workgroup_size: u32,
) -> Result<ComputePipelineHandle, SetupError> {
    let source = generation_shader(workgroup_size);
    let shader = validate_wgsl(
        "Command Generation",
        &source,
        &[(GENERATION_ENTRY_POINT, naga::ShaderStage::Compute)],
    )?;
    if shader.workgroup_size(GENERATION_ENTRY_POINT) != Some([workgroup_size, 1, 1]) {
        return Err(SetupError::ShaderValidation {
            label: shader.label().to_string(),
            message: format!("workgroup size is not {}", workgroup_size),
        });
    }

    let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some("Command Generation Pipeline".into()),
        shader: source,
        entry_point: GENERATION_ENTRY_POINT.into(),
        bind_group_layouts: layouts.to_vec(),
        host_kernel: Some(Arc::new(GenerationKernel::new(workgroup_size))),
    })?;
    Ok(pipeline)
}

/// Resources read or written by [`CommandGenerationPass`]
#[derive(Debug, Clone, Copy)]
pub struct GenerationResources {
    pub frame_state: ResourceId,
    pub object_table: ResourceId,
    pub command_list: ResourceId,
}

/// Compute pass filling the command list from the object table
pub struct CommandGenerationPass {
    pipeline: ComputePipelineHandle,
    scene_binding: BindGroupHandle,
    list: CommandListRef,
    resources: GenerationResources,
    object_count: u32,
    workgroup_size: u32,
}

impl CommandGenerationPass {
    pub fn new(
        pipeline: ComputePipelineHandle,
        scene_binding: BindGroupHandle,
        list: CommandListRef,
        resources: GenerationResources,
        object_count: u32,
        workgroup_size: u32,
    ) -> Self {
        Self {
            pipeline,
            scene_binding,
            list,
            resources,
            object_count,
            workgroup_size: workgroup_size.max(1),
        }
    }

    /// Workgroups needed to give every object a lane
    pub fn workgroup_count(&self) -> u32 {
        self.object_count.div_ceil(self.workgroup_size)
    }
}

impl RenderPass for CommandGenerationPass {
    fn name(&self) -> &str {
        "Command Generation"
    }

    fn stage(&self) -> PipelineStage {
        PipelineStage::CommandGeneration
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.resources.frame_state, ResourceUsage::UniformBuffer);
        ctx.read(self.resources.object_table, ResourceUsage::StorageBufferRead);
        ctx.write(self.resources.command_list, ResourceUsage::StorageBufferWrite);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), FrameError> {
        let list = ctx.command_lists.require_mut(self.list, AccessMode::Write)?;
        list.reset_compaction();
        let argument_binding = list.argument_binding();

        if self.object_count == 0 {
            log::debug!("No objects, command generation skipped");
            return Ok(());
        }

        let workgroups = self.workgroup_count();
        log::debug!(
            "Generating {} commands in {} workgroups",
            self.object_count,
            workgroups
        );

        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(Some("Command Generation"));
        backend.set_compute_pipeline(self.pipeline);
        backend.set_bind_group(0, self.scene_binding);
        backend.set_bind_group(1, argument_binding);
        backend.dispatch_compute(workgroups, 1, 1);
        backend
            .end_compute_pass()
            .map_err(FrameError::device(PipelineStage::CommandGeneration))
    }
}

/// Command generation compute shader
///
/// `$WORKGROUP_SIZE` is substituted before compilation.
pub const GENERATION_SHADER: &str = r#"
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

struct DrawArgs {
    vertex_count: u32,
    instance_count: u32,
    first_vertex: u32,
    first_instance: u32,
}

struct SlotMeta {
    binding_set: u32,
    flags: u32,
}

struct CompactionHeader {
    count: u32,
    range_start: u32,
    range_end: u32,
    bind_count: u32,
}

const SLOT_POPULATED: u32 = 1u;

@group(0) @binding(0) var<uniform> frame: FrameState;
@group(0) @binding(1) var<storage, read> objects: array<ObjectParams>;
@group(0) @binding(2) var<uniform> cull: CullParams;

@group(1) @binding(0) var<storage, read_write> commands: array<DrawArgs>;
@group(1) @binding(1) var<storage, read_write> slots: array<SlotMeta>;
@group(1) @binding(2) var<storage, read_write> header: CompactionHeader;

fn is_visible(obj: ObjectParams) -> bool {
    let scale = frame.aspect_scale * cull.view_scale;
    let clip = scale * (frame.translation + obj.position);
    let extent = abs(scale * obj.bounding_radius);

    let outside = clip.x + extent.x < -1.0
        || clip.x - extent.x > 1.0
        || clip.y + extent.y < -1.0
        || clip.y - extent.y > 1.0;
    return !outside;
}

@compute @workgroup_size($WORKGROUP_SIZE)
fn generate_commands(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let index = global_id.x;

    if (index == 0u) {
        header = CompactionHeader(0u, 0u, 0u, 0u);
    }
    if (index >= cull.object_count) {
        return;
    }

    let obj = objects[index];
    if (is_visible(obj)) {
        commands[index] = DrawArgs(obj.num_vertices, 1u, obj.start_vertex, index);
        slots[index] = SlotMeta(cull.binding_set, SLOT_POPULATED);
    } else {
        commands[index] = DrawArgs(0u, 0u, 0u, 0u);
        slots[index] = SlotMeta(0u, 0u);
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    fn object(x: f32, y: f32, radius: f32) -> ObjectParams {
        ObjectParams {
            start_vertex: 12,
            num_vertices: 36,
            position: Vec2::new(x, y),
            bounding_radius: radius,
            _padding: 0,
        }
    }

    fn params() -> CullParams {
        CullParams {
            object_count: 1,
            binding_set: 1,
            view_scale: 0.25,
            _padding: 0,
        }
    }

    fn unit_frame() -> FrameState {
        FrameState::new(Vec2::ZERO, Vec2::ONE)
    }

    #[test]
    fn test_visible_object_gets_a_draw() {
        let slot = generate_slot(7, &unit_frame(), &object(0.0, 0.0, 1.0), &params());
        assert_eq!(
            slot.args,
            DrawIndirectArgs {
                vertex_count: 36,
                instance_count: 1,
                first_vertex: 12,
                first_instance: 7,
            }
        );
        assert_eq!(slot.meta.binding_set, 1);
        assert!(slot.is_populated());
    }

    #[test]
    fn test_offscreen_object_is_empty() {
        // clip x = -5 with a 0.25 clip radius
        let slot = generate_slot(0, &unit_frame(), &object(-20.0, 0.0, 1.0), &params());
        assert_eq!(slot, CommandSlot::EMPTY);
        for (x, y) in [(20.0, 0.0), (0.0, 20.0), (0.0, -20.0)] {
            assert!(!is_visible(&unit_frame(), &object(x, y, 1.0), 0.25));
        }
    }

    #[test]
    fn test_touching_the_edge_is_visible() {
        // Clip center 1.25, clip radius 0.25: the left edge sits exactly on x = 1
        assert!(is_visible(&unit_frame(), &object(5.0, 0.0, 1.0), 0.25));
        assert!(is_visible(&unit_frame(), &object(-5.0, 0.0, 1.0), 0.25));
        assert!(is_visible(&unit_frame(), &object(0.0, 5.0, 1.0), 0.25));
        assert!(!is_visible(&unit_frame(), &object(5.5, 0.0, 1.0), 0.25));
    }

    #[test]
    fn test_translation_and_aspect_apply() {
        let frame = FrameState::new(Vec2::new(16.0, 0.0), Vec2::ONE);
        assert!(is_visible(&frame, &object(-16.0, 0.0, 1.0), 0.25));
        assert!(!is_visible(&frame, &object(0.0, 0.0, 1.0), 0.25));

        // A squeezed x axis brings a far object back into view
        let frame = FrameState::new(Vec2::ZERO, Vec2::new(0.5, 1.0));
        assert!(is_visible(&frame, &object(9.0, 0.0, 1.0), 0.25));
    }

    #[test]
    fn test_mirrored_aspect_keeps_extent() {
        let frame = FrameState::new(Vec2::ZERO, Vec2::new(-1.0, 1.0));
        // Clip bounds [-1.375, -0.875]
        assert!(is_visible(&frame, &object(4.5, 0.0, 1.0), 0.25));
        assert!(is_visible(&frame, &object(-4.5, 0.0, 1.0), 0.25));
        assert!(!is_visible(&frame, &object(-10.0, 0.0, 1.0), 0.25));
        assert!(!is_visible(&frame, &object(10.0, 0.0, 1.0), 0.25));

        let frame = FrameState::new(Vec2::ZERO, Vec2::new(1.0, -1.0));
        assert!(is_visible(&frame, &object(0.0, 4.5, 1.0), 0.25));
        assert!(is_visible(&unit_frame(), &object(4.5, 0.0, 1.0), -0.25));
    }

    #[test]
    fn test_non_finite_inputs_stay_visible() {
        assert!(is_visible(&unit_frame(), &object(f32::NAN, 0.0, 1.0), 0.25));
        let frame = FrameState::new(Vec2::new(f32::NAN, f32::NAN), Vec2::ONE);
        assert!(is_visible(&frame, &object(100.0, 100.0, 1.0), 0.25));
    }

    fn bindings(objects: &[ObjectParams], capacity: usize, object_count: u32) -> HostBindings {
        let mut bindings = HostBindings::new();
        bindings.insert(0, 0, bytemuck::bytes_of(&unit_frame()).to_vec());
        bindings.insert(0, 1, bytemuck::cast_slice(objects).to_vec());
        bindings.insert(
            0,
            2,
            bytemuck::bytes_of(&CullParams {
                object_count,
                ..params()
            })
            .to_vec(),
        );
        let stale = DrawIndirectArgs {
            vertex_count: 99,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        };
        bindings.insert(1, 0, bytemuck::cast_slice(&vec![stale; capacity]).to_vec());
        bindings.insert(1, 1, vec![0xff; capacity * std::mem::size_of::<SlotMeta>()]);
        bindings.insert(
            1,
            2,
            bytemuck::bytes_of(&CompactionHeader {
                count: 5,
                range_start: 0,
                range_end: 5,
                bind_count: 1,
            })
            .to_vec(),
        );
        bindings
    }

    #[test]
    fn test_kernel_writes_every_slot_once() {
        let objects: Vec<ObjectParams> = (0..130)
            .map(|i| object(if i % 3 == 0 { 100.0 } else { 0.0 }, 0.0, 1.0))
            .collect();
        let mut bindings = bindings(&objects, objects.len(), objects.len() as u32);

        let kernel = GenerationKernel::new(64);
        kernel.dispatch(&mut bindings, [3, 1, 1]).unwrap();

        let args: Vec<DrawIndirectArgs> = bindings.read(1, 0).unwrap();
        let metas: Vec<SlotMeta> = bindings.read(1, 1).unwrap();
        for (i, (args, meta)) in args.iter().zip(&metas).enumerate() {
            let expected = generate_slot(i as u32, &unit_frame(), &objects[i], &params());
            assert_eq!(*args, expected.args, "slot {}", i);
            assert_eq!(*meta, expected.meta, "slot {}", i);
        }
        let header: CompactionHeader = bindings.read_one(1, 2).unwrap();
        assert_eq!(header, CompactionHeader::default());
    }

    #[test]
    fn test_lanes_beyond_object_count_write_nothing() {
        let objects = vec![object(0.0, 0.0, 1.0); 4];
        // Capacity 6 but only 4 objects: slots 4 and 5 keep their contents
        let mut bindings = bindings(&objects, 6, 4);
        GenerationKernel::new(64)
            .dispatch(&mut bindings, [1, 1, 1])
            .unwrap();

        let args: Vec<DrawIndirectArgs> = bindings.read(1, 0).unwrap();
        assert!(args[..4].iter().all(|a| a.vertex_count == 36));
        assert!(args[4..].iter().all(|a| a.vertex_count == 99));
    }

    #[test]
    fn test_shader_validates() {
        for size in [1, 64, 256] {
            let source = generation_shader(size);
            let shader = validate_wgsl(
                "generation",
                &source,
                &[(GENERATION_ENTRY_POINT, naga::ShaderStage::Compute)],
            )
            .unwrap();
            assert_eq!(shader.workgroup_size(GENERATION_ENTRY_POINT), Some([size, 1, 1]));
        }
    }

    #[test]
    fn test_workgroup_count() {
        let pass = |count| {
            CommandGenerationPass::new(
                ComputePipelineHandle(0),
                BindGroupHandle(0),
                CommandListRef(0),
                GenerationResources {
                    frame_state: ResourceId(0),
                    object_table: ResourceId(1),
                    command_list: ResourceId(2),
                },
                count,
                64,
            )
        };
        assert_eq!(pass(0).workgroup_count(), 0);
        assert_eq!(pass(1).workgroup_count(), 1);
        assert_eq!(pass(64).workgroup_count(), 1);
        assert_eq!(pass(65).workgroup_count(), 2);
    }
}
