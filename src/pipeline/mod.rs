//! GPU-driven indirect rendering pipeline
//!
//! Each frame runs three stages over one device-resident command list:
//! 1. Command generation - culls every object and writes its slot
//! 2. Compaction - packs surviving commands and merges their bindings (optional)
//! 3. Indirect draw - executes the list inside the frame's render pass

pub mod command_list;
pub mod compaction;
pub mod execution;
pub mod generation;
pub mod shader;

pub use command_list::{
    AccessMode, CommandList, CommandListRef, CommandListSnapshot, CommandListTable, CommandSlot,
    CompactionHeader, ExecutionSegment,
};
pub use compaction::{compact_slots, CompactionPass};
pub use execution::{encode_draws, DrawBindings, IndirectDrawPass};
pub use generation::{generate_slot, is_visible, CommandGenerationPass, CullParams};
pub use shader::{validate_wgsl, ValidatedShader};

use crate::backend::{BindGroupLayoutEntry, BindingType, ShaderStageFlags};

/// Identifier of the scene binding set recorded into populated slots
pub const SCENE_BINDING_SET: u32 = 1;

/// Largest workgroup count a single dispatch dimension accepts
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Layout of the scene binding (group 0) shared by generation and drawing:
/// frame state, object table and culling parameters.
pub fn scene_binding_layout() -> Vec<BindGroupLayoutEntry> {
    let visibility = ShaderStageFlags::COMPUTE | ShaderStageFlags::VERTEX;
    vec![
        BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: BindingType::UniformBuffer,
        },
        BindGroupLayoutEntry {
            binding: 1,
            visibility,
            ty: BindingType::StorageBuffer { read_only: true },
        },
        BindGroupLayoutEntry {
            binding: 2,
            visibility,
            ty: BindingType::UniformBuffer,
        },
    ]
}
