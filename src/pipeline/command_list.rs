//! Device-resident indirect command lists
//!
//! A [`CommandList`] has one slot per object. Each slot holds a packed
//! [`DrawIndirectArgs`] record, which the render pass consumes directly, and a
//! [`SlotMeta`] record saying whether the slot is populated and which binding
//! set it draws with. A [`CompactionHeader`] sits next to the slots and doubles
//! as the count buffer of count-driven multi-draw.
//!
//! Lists live in a [`CommandListTable`] and are addressed through
//! [`CommandListRef`]. Before a stage touches a list in a frame, the access
//! has to be registered with the table for that stage.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::backend::*;
use crate::error::{FrameError, PipelineStage};

/// Reference to a command list in a [`CommandListTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandListRef(pub(crate) u32);

/// How a stage accesses a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Slots are overwritten by a compute stage
    Write,
    /// Slots are rewritten in place by a compute stage
    ReadWrite,
    /// Slots are executed by a render stage
    Execute,
}

impl AccessMode {
    /// Whether this access can be registered for `stage`
    pub fn allowed_in(self, stage: PipelineStage) -> bool {
        match self {
            AccessMode::Write | AccessMode::ReadWrite => matches!(
                stage,
                PipelineStage::CommandGeneration | PipelineStage::Compaction
            ),
            AccessMode::Execute => stage == PipelineStage::Execution,
        }
    }
}

/// Compaction summary written next to the slots
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct CompactionHeader {
    /// Surviving commands, packed from `range_start`
    pub count: u32,
    pub range_start: u32,
    pub range_end: u32,
    /// Number of binding changes the compacted region needs
    pub bind_count: u32,
}

/// One slot as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandSlot {
    pub args: DrawIndirectArgs,
    pub meta: SlotMeta,
}

impl CommandSlot {
    pub const EMPTY: Self = Self {
        args: DrawIndirectArgs::EMPTY,
        meta: SlotMeta::EMPTY,
    };

    pub fn is_populated(&self) -> bool {
        self.meta.is_populated()
    }
}

/// Part of an execution range with a uniform encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionSegment {
    /// One slot per object, each rebinding its own state
    Slots(Range<u32>),
    /// A compacted region with bindings already merged
    Compacted(Range<u32>),
}

/// Validate an execution range against a list's capacity and compacted region.
///
/// A range that overlaps the compacted region has to cover all of it.
pub fn validate_execution_range(
    range: &Range<u32>,
    capacity: u32,
    compacted: Option<&Range<u32>>,
) -> Result<(), FrameError> {
    let invalid = |reason: String| FrameError::InvalidRange {
        range: range.clone(),
        reason,
    };
    if range.start > range.end {
        return Err(invalid("start is after end".into()));
    }
    if range.end > capacity {
        return Err(invalid(format!("exceeds the capacity of {} slots", capacity)));
    }
    if let Some(region) = compacted.filter(|r| !r.is_empty()) {
        let overlaps = range.start < region.end && region.start < range.end;
        if overlaps && (range.start > region.start || range.end < region.end) {
            return Err(invalid(format!(
                "splits the compacted region {:?}",
                region
            )));
        }
    }
    Ok(())
}

/// A fixed-capacity indirect command list and its device buffers
#[derive(Debug)]
pub struct CommandList {
    label: String,
    capacity: u32,
    args_buffer: BufferHandle,
    slot_buffer: BufferHandle,
    header_buffer: BufferHandle,
    argument_binding: BindGroupHandle,
    compacted: Option<Range<u32>>,
    registrations: Vec<(AccessMode, PipelineStage)>,
}

impl CommandList {
    /// Byte stride of one argument record
    pub const ARGS_STRIDE: u64 = std::mem::size_of::<DrawIndirectArgs>() as u64;
    const MIN_SIZE: u64 = 16;

    /// Layout of the argument binding: args, slot meta and header, all storage
    pub fn binding_layout() -> Vec<BindGroupLayoutEntry> {
        (0..3)
            .map(|binding| BindGroupLayoutEntry {
                binding,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageBuffer { read_only: false },
            })
            .collect()
    }

    /// Create the list buffers and its argument binding.
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        label: &str,
        capacity: u32,
        layout: BindGroupLayoutHandle,
    ) -> BackendResult<Self> {
        let args_size = (capacity as u64 * Self::ARGS_STRIDE).max(Self::MIN_SIZE);
        let slot_size = (capacity as u64 * std::mem::size_of::<SlotMeta>() as u64).max(Self::MIN_SIZE);

        let args_buffer = backend.create_buffer(&BufferDescriptor::new(
            &format!("{} Args", label),
            args_size,
            BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_SRC,
        ))?;
        let slot_buffer = backend.create_buffer(&BufferDescriptor::new(
            &format!("{} Slots", label),
            slot_size,
            BufferUsage::STORAGE | BufferUsage::COPY_SRC,
        ))?;
        let header_buffer = backend.create_buffer(&BufferDescriptor::new(
            &format!("{} Header", label),
            std::mem::size_of::<CompactionHeader>() as u64,
            BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_SRC,
        ))?;
        let argument_binding = backend.create_bind_group(
            layout,
            &[
                (0, BindGroupEntry::buffer(args_buffer)),
                (1, BindGroupEntry::buffer(slot_buffer)),
                (2, BindGroupEntry::buffer(header_buffer)),
            ],
        )?;

        log::debug!("Created command list {:?} with {} slots", label, capacity);
        Ok(Self {
            label: label.to_string(),
            capacity,
            args_buffer,
            slot_buffer,
            header_buffer,
            argument_binding,
            compacted: None,
            registrations: Vec::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn args_buffer(&self) -> BufferHandle {
        self.args_buffer
    }

    pub fn slot_buffer(&self) -> BufferHandle {
        self.slot_buffer
    }

    pub fn header_buffer(&self) -> BufferHandle {
        self.header_buffer
    }

    /// Bind group exposing the list to compute stages
    pub fn argument_binding(&self) -> BindGroupHandle {
        self.argument_binding
    }

    /// Region rewritten by compaction since the last generation pass
    pub fn compacted_region(&self) -> Option<&Range<u32>> {
        self.compacted.as_ref()
    }

    /// Byte offset of a slot's argument record
    pub fn args_offset(slot: u32) -> u64 {
        slot as u64 * Self::ARGS_STRIDE
    }

    /// Restore the one-slot-per-object mapping before regeneration
    pub(crate) fn reset_compaction(&mut self) {
        self.compacted = None;
    }

    pub(crate) fn mark_compacted(&mut self, region: Range<u32>) {
        self.compacted = Some(region);
    }

    pub fn validate_range(&self, range: &Range<u32>) -> Result<(), FrameError> {
        validate_execution_range(range, self.capacity, self.compacted.as_ref())
    }

    /// Split a validated range into uniformly encoded segments, in order
    pub fn segments(&self, range: Range<u32>) -> Vec<ExecutionSegment> {
        let region = match &self.compacted {
            Some(region) if region.start < range.end && range.start < region.end => region.clone(),
            _ => {
                return if range.is_empty() {
                    Vec::new()
                } else {
                    vec![ExecutionSegment::Slots(range)]
                };
            }
        };
        let mut segments = Vec::with_capacity(3);
        if range.start < region.start {
            segments.push(ExecutionSegment::Slots(range.start..region.start));
        }
        let after = region.end..range.end;
        segments.push(ExecutionSegment::Compacted(region));
        if !after.is_empty() {
            segments.push(ExecutionSegment::Slots(after));
        }
        segments
    }

    fn is_registered(&self, mode: AccessMode) -> bool {
        self.registrations.iter().any(|(m, _)| *m == mode)
    }

    /// Read slots and header back to the host. Waits for the device.
    pub fn read_snapshot<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> BackendResult<CommandListSnapshot> {
        let args = backend.read_buffer(self.args_buffer)?;
        let metas = backend.read_buffer(self.slot_buffer)?;
        let header = backend.read_buffer(self.header_buffer)?;

        let args = args
            .chunks_exact(std::mem::size_of::<DrawIndirectArgs>())
            .map(bytemuck::pod_read_unaligned::<DrawIndirectArgs>);
        let metas = metas
            .chunks_exact(std::mem::size_of::<SlotMeta>())
            .map(bytemuck::pod_read_unaligned::<SlotMeta>);
        let slots = args
            .zip(metas)
            .take(self.capacity as usize)
            .map(|(args, meta)| CommandSlot { args, meta })
            .collect();
        let header_size = std::mem::size_of::<CompactionHeader>();
        let header = header
            .get(..header_size)
            .map(bytemuck::pod_read_unaligned)
            .ok_or_else(|| BackendError::ReadbackFailed("compaction header truncated".into()))?;

        Ok(CommandListSnapshot {
            slots,
            header,
            compacted: self.compacted.clone(),
        })
    }
}

/// Host copy of a command list
#[derive(Debug, Clone, PartialEq)]
pub struct CommandListSnapshot {
    pub slots: Vec<CommandSlot>,
    pub header: CompactionHeader,
    pub compacted: Option<Range<u32>>,
}

impl CommandListSnapshot {
    /// Indices of populated slots
    pub fn populated_indices(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_populated())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn populated_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_populated()).count()
    }

    /// Surviving commands of the compacted region, in order
    pub fn compacted_commands(&self) -> &[CommandSlot] {
        let Some(region) = &self.compacted else {
            return &[];
        };
        let start = region.start as usize;
        let end = (start + self.header.count as usize).min(self.slots.len());
        self.slots.get(start..end).unwrap_or(&[])
    }
}

/// Arena of command lists addressed by [`CommandListRef`]
#[derive(Debug, Default)]
pub struct CommandListTable {
    lists: Vec<CommandList>,
    frame_index: u64,
}

impl CommandListTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, list: CommandList) -> CommandListRef {
        let reference = CommandListRef(self.lists.len() as u32);
        self.lists.push(list);
        reference
    }

    pub fn get(&self, reference: CommandListRef) -> Result<&CommandList, FrameError> {
        self.lists
            .get(reference.0 as usize)
            .ok_or(FrameError::UnknownCommandList(reference))
    }

    pub fn get_mut(&mut self, reference: CommandListRef) -> Result<&mut CommandList, FrameError> {
        self.lists
            .get_mut(reference.0 as usize)
            .ok_or(FrameError::UnknownCommandList(reference))
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Start a new frame; registrations from the previous frame are dropped
    pub fn begin_frame(&mut self, frame_index: u64) {
        self.frame_index = frame_index;
        for list in &mut self.lists {
            list.registrations.clear();
        }
    }

    /// Register `mode` access to a list for `stage` in the current frame
    pub fn register(
        &mut self,
        reference: CommandListRef,
        mode: AccessMode,
        stage: PipelineStage,
    ) -> Result<(), FrameError> {
        if !mode.allowed_in(stage) {
            return Err(FrameError::InvalidRegistration { mode, stage });
        }
        let list = self.get_mut(reference)?;
        if !list.registrations.contains(&(mode, stage)) {
            log::trace!("Registered {:?} access to {} for {}", mode, list.label, stage);
            list.registrations.push((mode, stage));
        }
        Ok(())
    }

    pub fn is_registered(&self, reference: CommandListRef, mode: AccessMode) -> bool {
        self.get(reference)
            .map(|list| list.is_registered(mode))
            .unwrap_or(false)
    }

    /// The list, provided `mode` access was registered this frame
    pub fn require(
        &self,
        reference: CommandListRef,
        mode: AccessMode,
    ) -> Result<&CommandList, FrameError> {
        let list = self.get(reference)?;
        if !list.is_registered(mode) {
            return Err(FrameError::UnregisteredAccess(reference, mode));
        }
        Ok(list)
    }

    /// Mutable variant of [`CommandListTable::require`]
    pub fn require_mut(
        &mut self,
        reference: CommandListRef,
        mode: AccessMode,
    ) -> Result<&mut CommandList, FrameError> {
        let list = self.get_mut(reference)?;
        if !list.is_registered(mode) {
            return Err(FrameError::UnregisteredAccess(reference, mode));
        }
        Ok(list)
    }
}
