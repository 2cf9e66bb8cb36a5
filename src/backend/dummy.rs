//! Host device backend.
//!
//! Buffers and textures live in host memory. Compute dispatches run the
//! [`HostKernel`] attached to the bound compute pipeline, and indirect draws
//! are resolved by reading their arguments back out of host memory, so the
//! whole GPU-driven frame can be executed and inspected without GPU hardware.
//! Nothing is rasterized: render targets only receive their clear color.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;

use crate::backend::traits::*;
use crate::backend::types::*;

/// Largest buffer the host device will allocate, matching the wgpu default limit.
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 256 << 20;

/// Host implementation of a compute entry point.
pub trait HostKernel: Send + Sync + fmt::Debug {
    /// Entry point name, for logging.
    fn label(&self) -> &str;

    /// Run one dispatch of `workgroups` over the bound buffers.
    fn dispatch(&self, bindings: &mut HostBindings, workgroups: [u32; 3]) -> BackendResult<()>;
}

/// Buffers bound to a host dispatch, keyed by `(group, binding)`.
///
/// Buffer contents are moved out of the device for the duration of the
/// dispatch and moved back afterwards; writes never change a buffer's size.
#[derive(Debug, Default)]
pub struct HostBindings {
    buffers: BTreeMap<(u32, u32), Vec<u8>>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind raw bytes at `(group, binding)`.
    pub fn insert(&mut self, group: u32, binding: u32, bytes: Vec<u8>) {
        self.buffers.insert((group, binding), bytes);
    }

    /// Raw bytes bound at `(group, binding)`.
    pub fn bytes(&self, group: u32, binding: u32) -> BackendResult<&[u8]> {
        self.buffers
            .get(&(group, binding))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                BackendError::CommandRejected(format!(
                    "nothing bound at group {} binding {}",
                    group, binding
                ))
            })
    }

    /// Decode the binding as an array of `T`. Trailing bytes are ignored.
    pub fn read<T: Pod>(&self, group: u32, binding: u32) -> BackendResult<Vec<T>> {
        let bytes = self.bytes(group, binding)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Decode the first `T` of the binding.
    pub fn read_one<T: Pod>(&self, group: u32, binding: u32) -> BackendResult<T> {
        let bytes = self.bytes(group, binding)?;
        let size = std::mem::size_of::<T>();
        if bytes.len() < size {
            return Err(BackendError::CommandRejected(format!(
                "binding {}:{} holds {} bytes, {} required",
                group,
                binding,
                bytes.len(),
                size
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    /// Overwrite the start of the binding with `data`.
    pub fn write<T: Pod>(&mut self, group: u32, binding: u32, data: &[T]) -> BackendResult<()> {
        let target = self.buffers.get_mut(&(group, binding)).ok_or_else(|| {
            BackendError::CommandRejected(format!(
                "nothing bound at group {} binding {}",
                group, binding
            ))
        })?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() > target.len() {
            return Err(BackendError::CommandRejected(format!(
                "write of {} bytes overflows binding {}:{} ({} bytes)",
                bytes.len(),
                group,
                binding,
                target.len()
            )));
        }
        target[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// A command as encoded into a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedCommand {
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    DrawIndirect {
        buffer: BufferHandle,
        offset: u64,
    },
    MultiDrawIndirectCount {
        buffer: BufferHandle,
        offset: u64,
        count_buffer: BufferHandle,
        count_offset: u64,
        max_count: u32,
    },
    Dispatch([u32; 3]),
}

impl EncodedCommand {
    /// Whether the command issues draws
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            EncodedCommand::DrawIndirect { .. }
                | EncodedCommand::MultiDrawIndirectCount { .. }
        )
    }
}

/// A draw after its indirect arguments were read from device memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDraw {
    pub pipeline: Option<RenderPipelineHandle>,
    pub bind_groups: Vec<(u32, BindGroupHandle)>,
    pub vertex_buffer: Option<BufferHandle>,
    pub vertices: Range<u32>,
    pub instances: Range<u32>,
}

/// Everything the host device saw during the most recent frame.
#[derive(Debug, Clone, Default)]
pub struct FrameLog {
    /// Labels of the passes in submission order
    pub passes: Vec<String>,
    /// Commands encoded into render passes
    pub render_commands: Vec<EncodedCommand>,
    /// Compute dispatches, as workgroup counts
    pub dispatches: Vec<[u32; 3]>,
    /// Draws that produced at least one vertex
    pub draws: Vec<ResolvedDraw>,
}

impl FrameLog {
    /// Number of draw commands encoded, whatever they resolved to.
    pub fn draw_command_count(&self) -> usize {
        self.render_commands.iter().filter(|c| c.is_draw()).count()
    }

    /// Number of bind group changes encoded into render passes.
    pub fn bind_group_changes(&self) -> usize {
        self.render_commands
            .iter()
            .filter(|c| matches!(c, EncodedCommand::SetBindGroup { .. }))
            .count()
    }

    /// Total number of commands encoded into render passes.
    pub fn encoded_command_count(&self) -> usize {
        self.render_commands.len()
    }
}

#[derive(Debug)]
struct HostBuffer {
    label: Option<String>,
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HostTexture {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

#[derive(Debug)]
struct HostBindGroup {
    entries: Vec<(u32, BindGroupEntry)>,
}

#[derive(Debug)]
struct HostComputePipeline {
    label: Option<String>,
    host_kernel: Option<Arc<dyn HostKernel>>,
}

#[derive(Debug)]
struct HostRenderPipeline {
    label: Option<String>,
}

#[derive(Debug)]
enum PendingPass {
    Render {
        desc: RenderPassDescriptor,
        commands: Vec<EncodedCommand>,
    },
    Compute {
        label: Option<String>,
        commands: Vec<EncodedCommand>,
    },
}

/// Host device implementing [`GraphicsBackend`].
#[derive(Debug)]
pub struct DummyBackend {
    capabilities: BackendCapabilities,
    max_buffer_size: u64,

    buffers: HashMap<u64, HostBuffer>,
    textures: HashMap<u64, HostTexture>,
    texture_views: HashMap<u64, u64>,
    bind_group_layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, HostBindGroup>,
    render_pipelines: HashMap<u64, HostRenderPipeline>,
    compute_pipelines: HashMap<u64, HostComputePipeline>,

    next_buffer_id: u64,
    next_texture_id: u64,
    next_view_id: u64,
    next_layout_id: u64,
    next_bind_group_id: u64,
    next_pipeline_id: u64,

    pending_pass: Option<PendingPass>,
    frame_log: FrameLog,
    frames_submitted: u64,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a host device that supports every optional capability.
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities {
            multi_draw_indirect_count: true,
        })
    }

    /// Create a host device with the given capabilities.
    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        log::debug!("DummyBackend: created with {:?}", capabilities);
        Self {
            capabilities,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_view_id: 1,
            next_layout_id: 1,
            next_bind_group_id: 1,
            next_pipeline_id: 1,
            pending_pass: None,
            frame_log: FrameLog::default(),
            frames_submitted: 0,
        }
    }

    /// Limit the size of a single buffer allocation.
    pub fn with_max_buffer_size(mut self, max_buffer_size: u64) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Log of the current or most recently submitted frame.
    pub fn frame_log(&self) -> &FrameLog {
        &self.frame_log
    }

    /// Number of frames submitted with `end_frame`.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn allocate(&self, label: &Option<String>, size: u64) -> BackendResult<Vec<u8>> {
        if size > self.max_buffer_size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: {} bytes exceeds the {} byte limit",
                label, size, self.max_buffer_size
            )));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(size as usize)
            .map_err(|_| BackendError::OutOfMemory)?;
        data.resize(size as usize, 0);
        Ok(data)
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<&HostBuffer> {
        self.buffers
            .get(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", handle)))
    }

    fn record(&mut self, command: EncodedCommand) {
        match &mut self.pending_pass {
            Some(PendingPass::Render { commands, .. }) | Some(PendingPass::Compute { commands, .. }) => {
                commands.push(command)
            }
            None => log::warn!("DummyBackend: {:?} recorded outside of a pass", command),
        }
    }

    fn read_indirect_args(&self, buffer: BufferHandle, offset: u64) -> BackendResult<DrawIndirectArgs> {
        let host = self.buffer(buffer)?;
        if !host.usage.contains(BufferUsage::INDIRECT) {
            return Err(BackendError::CommandRejected(format!(
                "{:?} lacks INDIRECT usage",
                host.label
            )));
        }
        let size = std::mem::size_of::<DrawIndirectArgs>();
        let start = offset as usize;
        let bytes = host.data.get(start..start + size).ok_or_else(|| {
            BackendError::CommandRejected(format!(
                "indirect read at offset {} past the end of {:?}",
                offset, host.label
            ))
        })?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn read_indirect_count(&self, buffer: BufferHandle, offset: u64) -> BackendResult<u32> {
        let host = self.buffer(buffer)?;
        if !host.usage.contains(BufferUsage::INDIRECT) {
            return Err(BackendError::CommandRejected(format!(
                "count buffer {:?} lacks INDIRECT usage",
                host.label
            )));
        }
        let start = offset as usize;
        let bytes = host.data.get(start..start + 4).ok_or_else(|| {
            BackendError::CommandRejected(format!(
                "count read at offset {} past the end of {:?}",
                offset, host.label
            ))
        })?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn replay_render_pass(
        &mut self,
        desc: &RenderPassDescriptor,
        commands: Vec<EncodedCommand>,
    ) -> BackendResult<()> {
        for attachment in &desc.color_attachments {
            if let LoadOp::Clear(color) = attachment.load_op {
                self.clear_view(attachment.view, color)?;
            }
        }

        let mut pipeline = None;
        let mut bind_groups: BTreeMap<u32, BindGroupHandle> = BTreeMap::new();
        let mut vertex_buffer = None;
        let mut draws = Vec::new();

        for command in &commands {
            let mut resolved = Vec::new();
            match command {
                EncodedCommand::SetRenderPipeline(handle) => {
                    if !self.render_pipelines.contains_key(&handle.0) {
                        return Err(BackendError::InvalidHandle(format!("{:?}", handle)));
                    }
                    pipeline = Some(*handle);
                }
                EncodedCommand::SetBindGroup { index, bind_group } => {
                    bind_groups.insert(*index, *bind_group);
                }
                EncodedCommand::SetVertexBuffer { buffer, .. } => {
                    self.buffer(*buffer)?;
                    vertex_buffer = Some(*buffer);
                }
                EncodedCommand::DrawIndirect { buffer, offset } => {
                    let args = self.read_indirect_args(*buffer, *offset)?;
                    resolved.push(args_ranges(&args));
                }
                EncodedCommand::MultiDrawIndirectCount {
                    buffer,
                    offset,
                    count_buffer,
                    count_offset,
                    max_count,
                } => {
                    if !self.capabilities.multi_draw_indirect_count {
                        return Err(BackendError::CommandRejected(
                            "multi_draw_indirect_count is not supported by this device".into(),
                        ));
                    }
                    let count = self
                        .read_indirect_count(*count_buffer, *count_offset)?
                        .min(*max_count);
                    let stride = std::mem::size_of::<DrawIndirectArgs>() as u64;
                    for i in 0..count as u64 {
                        let args = self.read_indirect_args(*buffer, offset + i * stride)?;
                        resolved.push(args_ranges(&args));
                    }
                }
                EncodedCommand::SetComputePipeline(_) | EncodedCommand::Dispatch(_) => {
                    return Err(BackendError::CommandRejected(format!(
                        "{:?} encoded into a render pass",
                        command
                    )));
                }
            }

            for (vertices, instances) in resolved {
                if vertices.is_empty() || instances.is_empty() {
                    continue;
                }
                if pipeline.is_none() {
                    return Err(BackendError::CommandRejected(
                        "draw without a render pipeline".into(),
                    ));
                }
                draws.push(ResolvedDraw {
                    pipeline,
                    bind_groups: bind_groups.iter().map(|(i, b)| (*i, *b)).collect(),
                    vertex_buffer,
                    vertices,
                    instances,
                });
            }
        }

        log::trace!(
            "DummyBackend: render pass {:?} encoded {} commands, resolved {} draws",
            desc.label,
            commands.len(),
            draws.len()
        );
        self.frame_log.render_commands.extend(commands);
        self.frame_log.draws.extend(draws);
        Ok(())
    }

    fn replay_compute_pass(&mut self, commands: Vec<EncodedCommand>) -> BackendResult<()> {
        let mut pipeline = None;
        let mut bind_groups: BTreeMap<u32, BindGroupHandle> = BTreeMap::new();

        for command in commands {
            match command {
                EncodedCommand::SetComputePipeline(handle) => pipeline = Some(handle),
                EncodedCommand::SetBindGroup { index, bind_group } => {
                    bind_groups.insert(index, bind_group);
                }
                EncodedCommand::Dispatch(workgroups) => {
                    let handle = pipeline.ok_or_else(|| {
                        BackendError::CommandRejected("dispatch without a compute pipeline".into())
                    })?;
                    self.frame_log.dispatches.push(workgroups);
                    self.run_dispatch(handle, &bind_groups, workgroups)?;
                }
                other => {
                    return Err(BackendError::CommandRejected(format!(
                        "{:?} encoded into a compute pass",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    fn run_dispatch(
        &mut self,
        pipeline: ComputePipelineHandle,
        bound: &BTreeMap<u32, BindGroupHandle>,
        workgroups: [u32; 3],
    ) -> BackendResult<()> {
        let compute = self
            .compute_pipelines
            .get(&pipeline.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", pipeline)))?;
        let Some(kernel) = compute.host_kernel.clone() else {
            log::trace!(
                "DummyBackend: {:?} has no host kernel, dispatch skipped",
                compute.label
            );
            return Ok(());
        };

        let mut bindings = HostBindings::new();
        let mut taken: Vec<((u32, u32), u64)> = Vec::new();
        let mut gather = || -> BackendResult<()> {
            for (&group, &handle) in bound {
                let bind_group = self
                    .bind_groups
                    .get(&handle.0)
                    .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", handle)))?;
                for (binding, entry) in &bind_group.entries {
                    let buffer = &entry.buffer;
                    if taken.iter().any(|(_, id)| *id == buffer.0) {
                        return Err(BackendError::CommandRejected(format!(
                            "{:?} bound twice in one dispatch",
                            buffer
                        )));
                    }
                    let host = self
                        .buffers
                        .get_mut(&buffer.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
                    bindings.insert(group, *binding, std::mem::take(&mut host.data));
                    taken.push(((group, *binding), buffer.0));
                }
            }
            Ok(())
        };
        let gathered = gather();

        let result = gathered.and_then(|_| {
            log::trace!(
                "DummyBackend: dispatching {} with {:?}",
                kernel.label(),
                workgroups
            );
            kernel.dispatch(&mut bindings, workgroups)
        });

        for (key, id) in taken {
            if let (Some(data), Some(host)) = (bindings.buffers.remove(&key), self.buffers.get_mut(&id)) {
                host.data = data;
            }
        }
        result
    }

    fn clear_view(&mut self, view: TextureViewHandle, color: [f32; 4]) -> BackendResult<()> {
        let texture_id = *self
            .texture_views
            .get(&view.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", view)))?;
        let texture = self
            .textures
            .get_mut(&texture_id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("texture {}", texture_id)))?;

        let to_byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        let texel = match texture.desc.format {
            TextureFormat::Rgba8Unorm => color.map(to_byte),
        };
        for pixel in texture.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&texel);
        }
        Ok(())
    }
}

fn args_ranges(args: &DrawIndirectArgs) -> (Range<u32>, Range<u32>) {
    (
        args.first_vertex..args.first_vertex.saturating_add(args.vertex_count),
        args.first_instance..args.first_instance.saturating_add(args.instance_count),
    )
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        if self.pending_pass.take().is_some() {
            log::warn!("DummyBackend: discarding a pass left open by the previous frame");
        }
        self.frame_log = FrameLog::default();
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.pending_pass.is_some() {
            return Err(BackendError::ValidationFailed(
                "frame submitted with an open pass".into(),
            ));
        }
        self.frames_submitted += 1;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let data = self.allocate(&desc.label, desc.size)?;
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(
            id,
            HostBuffer {
                label: desc.label.clone(),
                usage: desc.usage,
                data,
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let size = desc.size.max(data.len() as u64);
        let handle = self.create_buffer(&BufferDescriptor {
            size,
            ..desc.clone()
        })?;
        self.write_buffer(handle, 0, data)?;
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let host = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > host.data.len() {
            return Err(BackendError::CommandRejected(format!(
                "write of {} bytes at {} overflows {:?} ({} bytes)",
                data.len(),
                offset,
                host.label,
                host.data.len()
            )));
        }
        host.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        Ok(self.buffer(buffer)?.data.clone())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero extent",
                desc.label
            )));
        }
        let size = desc.width as u64 * desc.height as u64 * desc.format.bytes_per_pixel() as u64;
        let data = self
            .allocate(&desc.label, size)
            .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            HostTexture {
                desc: desc.clone(),
                data,
            },
        );
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::InvalidHandle(format!("{:?}", texture)));
        }
        let id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(id, texture.0);
        Ok(TextureViewHandle(id))
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        self.textures
            .get(&texture.0)
            .map(|t| t.data.clone())
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.next_layout_id;
        self.next_layout_id += 1;
        self.bind_group_layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", layout)))?;
        for (binding, entry) in entries {
            if !layout_entries.iter().any(|e| e.binding == *binding) {
                return Err(BackendError::ValidationFailed(format!(
                    "binding {} is not in layout {:?}",
                    binding, layout
                )));
            }
            self.buffer(entry.buffer)?;
        }
        let id = self.next_bind_group_id;
        self.next_bind_group_id += 1;
        self.bind_groups.insert(
            id,
            HostBindGroup {
                entries: entries.to_vec(),
            },
        );
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        log::trace!("DummyBackend: creating render pipeline {:?}", desc.label);
        for layout in &desc.bind_group_layouts {
            if !self.bind_group_layouts.contains_key(&layout.0) {
                return Err(BackendError::InvalidHandle(format!("{:?}", layout)));
            }
        }
        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        self.render_pipelines.insert(
            id,
            HostRenderPipeline {
                label: desc.label.clone(),
            },
        );
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        log::trace!("DummyBackend: creating compute pipeline {:?}", desc.label);
        for layout in &desc.bind_group_layouts {
            if !self.bind_group_layouts.contains_key(&layout.0) {
                return Err(BackendError::InvalidHandle(format!("{:?}", layout)));
            }
        }
        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        self.compute_pipelines.insert(
            id,
            HostComputePipeline {
                label: desc.label.clone(),
                host_kernel: desc.host_kernel.clone(),
            },
        );
        Ok(ComputePipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if let Some(label) = &desc.label {
            self.frame_log.passes.push(label.clone());
        }
        self.pending_pass = Some(PendingPass::Render {
            desc: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) -> BackendResult<()> {
        match self.pending_pass.take() {
            Some(PendingPass::Render { desc, commands }) => self.replay_render_pass(&desc, commands),
            Some(PendingPass::Compute { label, .. }) => Err(BackendError::CommandRejected(format!(
                "end_render_pass while compute pass {:?} is open",
                label
            ))),
            None => Err(BackendError::CommandRejected(
                "end_render_pass without an open pass".into(),
            )),
        }
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        if let Some(label) = label {
            self.frame_log.passes.push(label.to_string());
        }
        self.pending_pass = Some(PendingPass::Compute {
            label: label.map(str::to_string),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) -> BackendResult<()> {
        match self.pending_pass.take() {
            Some(PendingPass::Compute { commands, .. }) => self.replay_compute_pass(commands),
            Some(PendingPass::Render { desc, .. }) => Err(BackendError::CommandRejected(format!(
                "end_compute_pass while render pass {:?} is open",
                desc.label
            ))),
            None => Err(BackendError::CommandRejected(
                "end_compute_pass without an open pass".into(),
            )),
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(EncodedCommand::SetRenderPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record(EncodedCommand::SetComputePipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(EncodedCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(EncodedCommand::SetVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn draw_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        self.record(EncodedCommand::DrawIndirect { buffer, offset });
    }

    fn multi_draw_indirect_count(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        count_buffer: BufferHandle,
        count_offset: u64,
        max_count: u32,
    ) {
        self.record(EncodedCommand::MultiDrawIndirectCount {
            buffer,
            offset,
            count_buffer,
            count_offset,
            max_count,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record(EncodedCommand::Dispatch([x, y, z]));
    }
}
