//! Command list compaction
//!
//! A single invocation walks a range of the command list, moves populated
//! slots to the front of the range in their original order and resets the
//! tail to empty. Consecutive survivors drawing with the same binding set are
//! flagged so the execution stage binds once per run. The result is summarized
//! in the list's [`CompactionHeader`], whose `count` drives multi-draw.

use std::ops::Range;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::backend::*;
use crate::error::{FrameError, PipelineStage, SetupError};
use crate::pipeline::command_list::{
    validate_execution_range, AccessMode, CommandListRef, CommandSlot, CompactionHeader,
};
use crate::pipeline::shader::validate_wgsl;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

/// Entry point of [`COMPACTION_SHADER`]
pub const COMPACTION_ENTRY_POINT: &str = "compact_commands";

/// Range uniform of the compaction kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct CompactionParams {
    pub range_start: u32,
    pub range_end: u32,
    pub _padding: [u32; 2],
}

impl CompactionParams {
    pub fn new(range: &Range<u32>) -> Self {
        Self {
            range_start: range.start,
            range_end: range.end,
            _padding: [0; 2],
        }
    }
}

/// Compact `range` of `slots` in place.
///
/// Survivors keep their relative order. Only the first survivor of a run
/// sharing a binding set needs a binding change; the rest inherit it.
pub fn compact_slots(slots: &mut [CommandSlot], range: Range<u32>) -> CompactionHeader {
    let start = (range.start as usize).min(slots.len());
    let end = (range.end as usize).min(slots.len()).max(start);

    let mut write = start;
    let mut bind_count = 0;
    let mut previous_set = None;
    for read in start..end {
        let slot = slots[read];
        if !slot.is_populated() {
            continue;
        }

        let mut meta = SlotMeta {
            binding_set: slot.meta.binding_set,
            flags: SLOT_POPULATED,
        };
        if previous_set == Some(meta.binding_set) {
            meta.flags |= SLOT_INHERITS_BINDINGS;
        } else {
            bind_count += 1;
        }
        previous_set = Some(meta.binding_set);

        slots[write] = CommandSlot {
            args: slot.args,
            meta,
        };
        write += 1;
    }
    for slot in &mut slots[write..end] {
        *slot = CommandSlot::EMPTY;
    }

    CompactionHeader {
        count: (write - start) as u32,
        range_start: range.start,
        range_end: range.end,
        bind_count,
    }
}

/// Host implementation of [`COMPACTION_SHADER`]
#[derive(Debug, Default)]
pub struct CompactionKernel;

impl HostKernel for CompactionKernel {
    fn label(&self) -> &str {
        COMPACTION_ENTRY_POINT
    }

    fn dispatch(&self, bindings: &mut HostBindings, _workgroups: [u32; 3]) -> BackendResult<()> {
        let params: CompactionParams = bindings.read_one(0, 0)?;
        let args: Vec<DrawIndirectArgs> = bindings.read(1, 0)?;
        let metas: Vec<SlotMeta> = bindings.read(1, 1)?;

        let mut slots: Vec<CommandSlot> = args
            .into_iter()
            .zip(metas)
            .map(|(args, meta)| CommandSlot { args, meta })
            .collect();
        let header = compact_slots(&mut slots, params.range_start..params.range_end);

        let args: Vec<DrawIndirectArgs> = slots.iter().map(|s| s.args).collect();
        let metas: Vec<SlotMeta> = slots.iter().map(|s| s.meta).collect();
        bindings.write(1, 0, &args)?;
        bindings.write(1, 1, &metas)?;
        bindings.write(1, 2, &[header])
    }
}

/// Layout of the compaction range uniform (group 0)
pub fn compaction_params_layout() -> Vec<BindGroupLayoutEntry> {
    vec![BindGroupLayoutEntry {
        binding: 0,
        visibility: ShaderStageFlags::COMPUTE,
        ty: BindingType::UniformBuffer,
    }]
}

/// Validate the compaction shader and create its compute pipeline.
pub fn create_compaction_pipeline<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    layouts: [BindGroupLayoutHandle; 2],
) -> Result<ComputePipelineHandle, SetupError> {
    validate_wgsl(
        "Compaction",
        COMPACTION_SHADER,
        &[(COMPACTION_ENTRY_POINT, naga::ShaderStage::Compute)],
    )?;

    let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some("Compaction Pipeline".into()),
        shader: COMPACTION_SHADER.into(),
        entry_point: COMPACTION_ENTRY_POINT.into(),
        bind_group_layouts: layouts.to_vec(),
        host_kernel: Some(Arc::new(CompactionKernel)),
    })?;
    Ok(pipeline)
}

/// Compute pass compacting a range of the command list
pub struct CompactionPass {
    pipeline: ComputePipelineHandle,
    params_binding: BindGroupHandle,
    list: CommandListRef,
    list_resource: ResourceId,
    range: Range<u32>,
}

impl CompactionPass {
    /// `params_binding` must hold [`CompactionParams`] for `range`.
    pub fn new(
        pipeline: ComputePipelineHandle,
        params_binding: BindGroupHandle,
        list: CommandListRef,
        list_resource: ResourceId,
        range: Range<u32>,
    ) -> Self {
        Self {
            pipeline,
            params_binding,
            list,
            list_resource,
            range,
        }
    }

    pub fn range(&self) -> &Range<u32> {
        &self.range
    }
}

impl RenderPass for CompactionPass {
    fn name(&self) -> &str {
        "Compaction"
    }

    fn stage(&self) -> PipelineStage {
        PipelineStage::Compaction
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.list_resource, ResourceUsage::StorageBufferReadWrite);
        ctx.write(self.list_resource, ResourceUsage::StorageBufferReadWrite);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> Result<(), FrameError> {
        let list = ctx.command_lists.require_mut(self.list, AccessMode::ReadWrite)?;
        validate_execution_range(&self.range, list.capacity(), None)?;
        if self.range.is_empty() {
            log::debug!("Empty compaction range, nothing to do");
            return Ok(());
        }
        let argument_binding = list.argument_binding();

        log::debug!("Compacting slots {:?}", self.range);
        let backend = &mut *ctx.backend;
        backend.begin_compute_pass(Some("Compaction"));
        backend.set_compute_pipeline(self.pipeline);
        backend.set_bind_group(0, self.params_binding);
        backend.set_bind_group(1, argument_binding);
        backend.dispatch_compute(1, 1, 1);
        backend
            .end_compute_pass()
            .map_err(FrameError::device(PipelineStage::Compaction))?;

        ctx.command_lists
            .require_mut(self.list, AccessMode::ReadWrite)?
            .mark_compacted(self.range.clone());
        Ok(())
    }
}

/// Compaction compute shader, run as a single invocation
pub const COMPACTION_SHADER: &str = r#"
struct CompactionParams {
    range_start: u32,
    range_end: u32,
    _padding: vec2<u32>,
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
const SLOT_INHERITS_BINDINGS: u32 = 2u;

@group(0) @binding(0) var<uniform> params: CompactionParams;

@group(1) @binding(0) var<storage, read_write> commands: array<DrawArgs>;
@group(1) @binding(1) var<storage, read_write> slots: array<SlotMeta>;
@group(1) @binding(2) var<storage, read_write> header: CompactionHeader;

@compute @workgroup_size(1)
fn compact_commands() {
    let start_index = params.range_start;
    let end_index = min(params.range_end, arrayLength(&commands));

    var dst = start_index;
    var bind_count = 0u;
    var has_previous = false;
    var previous_set = 0u;

    for (var src = start_index; src < end_index; src++) {
        let slot_meta = slots[src];
        if ((slot_meta.flags & SLOT_POPULATED) == 0u) {
            continue;
        }

        var flags = SLOT_POPULATED;
        if (has_previous && previous_set == slot_meta.binding_set) {
            flags = flags | SLOT_INHERITS_BINDINGS;
        } else {
            bind_count += 1u;
        }
        has_previous = true;
        previous_set = slot_meta.binding_set;

        commands[dst] = commands[src];
        slots[dst] = SlotMeta(slot_meta.binding_set, flags);
        dst += 1u;
    }

    for (var tail = dst; tail < end_index; tail++) {
        commands[tail] = DrawArgs(0u, 0u, 0u, 0u);
        slots[tail] = SlotMeta(0u, 0u);
    }

    header = CompactionHeader(dst - start_index, params.range_start, params.range_end, bind_count);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn populated(first_vertex: u32, binding_set: u32) -> CommandSlot {
        CommandSlot {
            args: DrawIndirectArgs {
                vertex_count: 3,
                instance_count: 1,
                first_vertex,
                first_instance: first_vertex,
            },
            meta: SlotMeta {
                binding_set,
                flags: SLOT_POPULATED,
            },
        }
    }

    #[test]
    fn test_survivors_keep_order() {
        let mut slots = vec![
            CommandSlot::EMPTY,
            populated(1, 1),
            CommandSlot::EMPTY,
            populated(3, 1),
            populated(4, 1),
            CommandSlot::EMPTY,
        ];
        let header = compact_slots(&mut slots, 0..6);

        assert_eq!(header.count, 3);
        assert_eq!(header.bind_count, 1);
        let order: Vec<u32> = slots[..3].iter().map(|s| s.args.first_vertex).collect();
        assert_eq!(order, vec![1, 3, 4]);
        assert!(!slots[0].meta.inherits_bindings());
        assert!(slots[1].meta.inherits_bindings());
        assert!(slots[2].meta.inherits_bindings());
        assert!(slots[3..].iter().all(|s| *s == CommandSlot::EMPTY));
    }

    #[test]
    fn test_binding_runs() {
        let mut slots = vec![
            populated(0, 1),
            populated(1, 2),
            populated(2, 2),
            CommandSlot::EMPTY,
            populated(4, 1),
        ];
        let header = compact_slots(&mut slots, 0..5);
        assert_eq!(header.count, 4);
        assert_eq!(header.bind_count, 3);
        let inherits: Vec<bool> = slots[..4].iter().map(|s| s.meta.inherits_bindings()).collect();
        assert_eq!(inherits, vec![false, false, true, false]);
    }

    #[test]
    fn test_slots_outside_range_are_untouched() {
        let mut slots = vec![
            CommandSlot::EMPTY,
            CommandSlot::EMPTY,
            populated(2, 1),
            CommandSlot::EMPTY,
            populated(4, 1),
        ];
        let header = compact_slots(&mut slots, 1..3);
        assert_eq!(header.count, 1);
        assert_eq!(header.range_start, 1);
        assert_eq!(slots[1].args.first_vertex, 2);
        assert_eq!(slots[2], CommandSlot::EMPTY);
        assert_eq!(slots[4].args.first_vertex, 4);
    }

    #[test]
    fn test_empty_range() {
        let mut slots = vec![populated(0, 1)];
        let before = slots.clone();
        let header = compact_slots(&mut slots, 1..1);
        assert_eq!(header.count, 0);
        assert_eq!(slots, before);
    }

    #[test]
    fn test_all_empty() {
        let mut slots = vec![CommandSlot::EMPTY; 4];
        let header = compact_slots(&mut slots, 0..4);
        assert_eq!(header.count, 0);
        assert_eq!(header.bind_count, 0);
    }

    #[test]
    fn test_kernel_matches_host_compaction() {
        let slots = vec![
            populated(0, 1),
            CommandSlot::EMPTY,
            populated(2, 1),
            CommandSlot::EMPTY,
        ];
        let mut bindings = HostBindings::new();
        bindings.insert(0, 0, bytemuck::bytes_of(&CompactionParams::new(&(0..4))).to_vec());
        let args: Vec<DrawIndirectArgs> = slots.iter().map(|s| s.args).collect();
        let metas: Vec<SlotMeta> = slots.iter().map(|s| s.meta).collect();
        bindings.insert(1, 0, bytemuck::cast_slice(&args).to_vec());
        bindings.insert(1, 1, bytemuck::cast_slice(&metas).to_vec());
        bindings.insert(1, 2, vec![0; std::mem::size_of::<CompactionHeader>()]);

        CompactionKernel.dispatch(&mut bindings, [1, 1, 1]).unwrap();

        let mut expected = slots.clone();
        let expected_header = compact_slots(&mut expected, 0..4);
        let args: Vec<DrawIndirectArgs> = bindings.read(1, 0).unwrap();
        let metas: Vec<SlotMeta> = bindings.read(1, 1).unwrap();
        for (i, slot) in expected.iter().enumerate() {
            assert_eq!(args[i], slot.args);
            assert_eq!(metas[i], slot.meta);
        }
        assert_eq!(
            bindings.read_one::<CompactionHeader>(1, 2).unwrap(),
            expected_header
        );
    }

    #[test]
    fn test_shader_validates() {
        validate_wgsl(
            "compaction",
            COMPACTION_SHADER,
            &[(COMPACTION_ENTRY_POINT, naga::ShaderStage::Compute)],
        )
        .unwrap();
    }
}
