//! wgpu device
//!
//! Headless: the pipeline renders into offscreen textures that are read back
//! through staging buffers. Pass encoding is deferred until the pass is
//! closed, so every handle a pass uses is checked before wgpu sees it.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::fmt::Debug;

/// Device objects of one kind, keyed by the id inside their handle
struct Table<T> {
    items: HashMap<u64, T>,
    next_id: u64,
}

impl<T> Table<T> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, item: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.items.insert(id, item);
        id
    }

    fn get(&self, id: u64) -> Option<&T> {
        self.items.get(&id)
    }

    fn contains(&self, id: u64) -> bool {
        self.items.contains_key(&id)
    }

    fn fetch(&self, id: u64, handle: impl Debug) -> BackendResult<&T> {
        self.get(id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", handle)))
    }
}

#[derive(Clone, Debug)]
enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    DrawIndirect { buffer: BufferHandle, offset: u64 },
    MultiDrawIndirectCount {
        buffer: BufferHandle,
        offset: u64,
        count_buffer: BufferHandle,
        count_offset: u64,
        max_count: u32,
    },
}

#[derive(Clone, Debug)]
enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch([u32; 3]),
}

/// Pass opened by `begin_*_pass` and flushed by the matching `end_*_pass`
enum OpenPass {
    Render {
        desc: RenderPassDescriptor,
        commands: Vec<RenderCommand>,
    },
    Compute {
        label: Option<String>,
        commands: Vec<ComputeCommand>,
    },
}

struct DeviceTexture {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

/// Headless wgpu device implementing [`GraphicsBackend`]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,

    buffers: Table<wgpu::Buffer>,
    textures: Table<DeviceTexture>,
    views: Table<wgpu::TextureView>,
    layouts: Table<wgpu::BindGroupLayout>,
    bind_groups: Table<wgpu::BindGroup>,
    render_pipelines: Table<wgpu::RenderPipeline>,
    compute_pipelines: Table<wgpu::ComputePipeline>,

    encoder: Option<wgpu::CommandEncoder>,
    /// A validation scope spans each frame
    frame_scope_open: bool,
    open_pass: Option<OpenPass>,
}

impl WgpuBackend {
    /// Create a headless backend, blocking on adapter and device requests.
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Create a headless backend.
    ///
    /// `WGPU_BACKEND` and `WGPU_POWER_PREF` narrow the adapter search. The
    /// adapter must support `INDIRECT_FIRST_INSTANCE`; count-driven
    /// multi-draw is enabled when the adapter offers it.
    pub async fn new_async() -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all()),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::util::power_preference_from_env()
                    .unwrap_or(wgpu::PowerPreference::HighPerformance),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("no adapter found".into()))?;

        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);

        let offered = adapter.features();
        if !offered.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE) {
            return Err(BackendError::InitializationFailed(format!(
                "{} cannot start indirect draws at a nonzero instance",
                info.name
            )));
        }
        let multi_draw =
            wgpu::Features::MULTI_DRAW_INDIRECT | wgpu::Features::MULTI_DRAW_INDIRECT_COUNT;
        let mut required_features = wgpu::Features::INDIRECT_FIRST_INSTANCE;
        if offered.contains(multi_draw) {
            required_features |= multi_draw;
        } else {
            log::info!("multi_draw_indirect_count unavailable, compacted regions draw per slot");
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Indirect Engine Device"),
                    required_features,
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            log::error!("Uncaptured wgpu error: {}", error);
        }));

        Ok(Self {
            device,
            queue,
            buffers: Table::new(),
            textures: Table::new(),
            views: Table::new(),
            layouts: Table::new(),
            bind_groups: Table::new(),
            render_pipelines: Table::new(),
            compute_pipelines: Table::new(),
            encoder: None,
            frame_scope_open: false,
            open_pass: None,
        })
    }

    /// Run `create` inside validation and out-of-memory error scopes.
    fn scoped<T>(
        &self,
        create: impl FnOnce(&wgpu::Device) -> T,
        on_error: fn(String) -> BackendError,
    ) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if out_of_memory.is_some() {
            return Err(BackendError::OutOfMemory);
        }
        match validation {
            Some(error) => Err(on_error(error.to_string())),
            None => Ok(value),
        }
    }

    fn allocate(&mut self, desc: &BufferDescriptor, mapped: bool) -> BackendResult<BufferHandle> {
        let limit = self.device.limits().max_buffer_size;
        if desc.size > limit {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: {} bytes exceeds the {} byte limit",
                desc.label, desc.size, limit
            )));
        }
        let buffer = self.scoped(
            |device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: desc.label.as_deref(),
                    size: desc.size,
                    usage: buffer_usages(desc.usage),
                    mapped_at_creation: mapped,
                })
            },
            BackendError::BufferCreationFailed,
        )?;
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn staging_buffer(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Submit `copy` on its own encoder and map `staging` once it completes.
    fn read_back(
        &self,
        staging: &wgpu::Buffer,
        copy: impl FnOnce(&mut wgpu::CommandEncoder),
    ) -> BackendResult<Vec<u8>> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        copy(&mut encoder);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn check_render_commands(&self, commands: &[RenderCommand]) -> BackendResult<()> {
        let multi_draw = self.capabilities().multi_draw_indirect_count;
        for command in commands {
            let known = match command {
                RenderCommand::SetPipeline(handle) => self.render_pipelines.contains(handle.0),
                RenderCommand::SetBindGroup { bind_group, .. } => {
                    self.bind_groups.contains(bind_group.0)
                }
                RenderCommand::SetVertexBuffer { buffer, .. }
                | RenderCommand::DrawIndirect { buffer, .. } => self.buffers.contains(buffer.0),
                RenderCommand::MultiDrawIndirectCount {
                    buffer,
                    count_buffer,
                    ..
                } => {
                    if !multi_draw {
                        return Err(BackendError::CommandRejected(
                            "multi_draw_indirect_count is not supported by this device".into(),
                        ));
                    }
                    self.buffers.contains(buffer.0) && self.buffers.contains(count_buffer.0)
                }
            };
            if !known {
                return Err(BackendError::InvalidHandle(format!("{:?}", command)));
            }
        }
        Ok(())
    }

    fn check_compute_commands(&self, commands: &[ComputeCommand]) -> BackendResult<()> {
        for command in commands {
            let known = match command {
                ComputeCommand::SetPipeline(handle) => self.compute_pipelines.contains(handle.0),
                ComputeCommand::SetBindGroup { bind_group, .. } => {
                    self.bind_groups.contains(bind_group.0)
                }
                ComputeCommand::Dispatch(_) => true,
            };
            if !known {
                return Err(BackendError::InvalidHandle(format!("{:?}", command)));
            }
        }
        Ok(())
    }

    fn record_render(&mut self, command: RenderCommand) {
        match &mut self.open_pass {
            Some(OpenPass::Render { commands, .. }) => commands.push(command),
            _ => log::warn!("{:?} recorded outside of a render pass", command),
        }
    }

    fn record_compute(&mut self, command: ComputeCommand) {
        match &mut self.open_pass {
            Some(OpenPass::Compute { commands, .. }) => commands.push(command),
            _ => log::warn!("{:?} recorded outside of a compute pass", command),
        }
    }

    fn encode_render_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        desc: &RenderPassDescriptor,
        commands: &[RenderCommand],
    ) -> BackendResult<()> {
        let mut attachments = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let view = self.views.fetch(attachment.view.0, attachment.view)?;
            let load = match attachment.load_op {
                LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                LoadOp::Load => wgpu::LoadOp::Load,
            };
            attachments.push(Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            }));
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: desc.label.as_deref(),
            color_attachments: &attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // Handles were checked before encoding
        for command in commands {
            match *command {
                RenderCommand::SetPipeline(handle) => {
                    if let Some(pipeline) = self.render_pipelines.get(handle.0) {
                        pass.set_pipeline(pipeline);
                    }
                }
                RenderCommand::SetBindGroup { index, bind_group } => {
                    if let Some(group) = self.bind_groups.get(bind_group.0) {
                        pass.set_bind_group(index, group, &[]);
                    }
                }
                RenderCommand::SetVertexBuffer {
                    slot,
                    buffer,
                    offset,
                } => {
                    if let Some(buffer) = self.buffers.get(buffer.0) {
                        pass.set_vertex_buffer(slot, buffer.slice(offset..));
                    }
                }
                RenderCommand::DrawIndirect { buffer, offset } => {
                    if let Some(buffer) = self.buffers.get(buffer.0) {
                        pass.draw_indirect(buffer, offset);
                    }
                }
                RenderCommand::MultiDrawIndirectCount {
                    buffer,
                    offset,
                    count_buffer,
                    count_offset,
                    max_count,
                } => {
                    if let (Some(args), Some(count)) =
                        (self.buffers.get(buffer.0), self.buffers.get(count_buffer.0))
                    {
                        pass.multi_draw_indirect_count(
                            args,
                            offset,
                            count,
                            count_offset,
                            max_count,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn encode_compute_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: Option<&str>,
        commands: &[ComputeCommand],
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label,
            timestamp_writes: None,
        });
        for command in commands {
            match *command {
                ComputeCommand::SetPipeline(handle) => {
                    if let Some(pipeline) = self.compute_pipelines.get(handle.0) {
                        pass.set_pipeline(pipeline);
                    }
                }
                ComputeCommand::SetBindGroup { index, bind_group } => {
                    if let Some(group) = self.bind_groups.get(bind_group.0) {
                        pass.set_bind_group(index, group, &[]);
                    }
                }
                ComputeCommand::Dispatch([x, y, z]) => pass.dispatch_workgroups(x, y, z),
            }
        }
    }

    fn pipeline_layout(
        &self,
        label: Option<&str>,
        layouts: &[BindGroupLayoutHandle],
    ) -> BackendResult<wgpu::PipelineLayout> {
        let layouts = layouts
            .iter()
            .map(|handle| self.layouts.fetch(handle.0, handle))
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            }))
    }
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    [
        (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::INDIRECT, wgpu::BufferUsages::INDIRECT),
    ]
    .into_iter()
    .filter(|(flag, _)| usage.contains(*flag))
    .fold(wgpu::BufferUsages::empty(), |acc, (_, usages)| acc | usages)
}

fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    [
        (TextureUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
        (
            TextureUsage::RENDER_ATTACHMENT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        ),
    ]
    .into_iter()
    .filter(|(flag, _)| usage.contains(*flag))
    .fold(wgpu::TextureUsages::empty(), |acc, (_, usages)| acc | usages)
}

fn shader_stages(visibility: ShaderStageFlags) -> wgpu::ShaderStages {
    [
        (ShaderStageFlags::VERTEX, wgpu::ShaderStages::VERTEX),
        (ShaderStageFlags::COMPUTE, wgpu::ShaderStages::COMPUTE),
    ]
    .into_iter()
    .filter(|(flag, _)| visibility.contains(*flag))
    .fold(wgpu::ShaderStages::empty(), |acc, (_, stages)| acc | stages)
}

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

fn blend_component(component: BlendComponent) -> wgpu::BlendComponent {
    let factor = |factor| match factor {
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
    };
    wgpu::BlendComponent {
        src_factor: factor(component.src_factor),
        dst_factor: factor(component.dst_factor),
        operation: wgpu::BlendOperation::Add,
    }
}

fn binding_type(ty: &BindingType) -> wgpu::BindingType {
    let ty = match *ty {
        BindingType::UniformBuffer => wgpu::BufferBindingType::Uniform,
        BindingType::StorageBuffer { read_only } => wgpu::BufferBindingType::Storage { read_only },
    };
    wgpu::BindingType::Buffer {
        ty,
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            multi_draw_indirect_count: self
                .device
                .features()
                .contains(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT),
        }
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        if self.open_pass.take().is_some() {
            log::warn!("Discarding a pass left open by the previous frame");
        }
        if self.frame_scope_open {
            let _ = pollster::block_on(self.device.pop_error_scope());
        }
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.frame_scope_open = true;
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        if !std::mem::take(&mut self.frame_scope_open) {
            return Ok(());
        }
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(BackendError::ValidationFailed(error.to_string())),
            None => Ok(()),
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        self.allocate(desc, false)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        // Mapped creation needs a size aligned to COPY_BUFFER_ALIGNMENT
        let size = desc
            .size
            .max(data.len() as u64)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let handle = self.allocate(&BufferDescriptor { size, ..desc.clone() }, true)?;
        let buffer = self.buffers.fetch(handle.0, handle)?;
        buffer.slice(..).get_mapped_range_mut()[..data.len()].copy_from_slice(data);
        buffer.unmap();
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let target = self.buffers.fetch(buffer.0, buffer)?;
        if offset + data.len() as u64 > target.size() {
            return Err(BackendError::CommandRejected(format!(
                "write of {} bytes at {} overflows a {} byte buffer",
                data.len(),
                offset,
                target.size()
            )));
        }
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        let source = self.buffers.fetch(buffer.0, buffer)?;
        let size = source.size();
        let staging = self.staging_buffer("Buffer Readback", size);
        self.read_back(&staging, |encoder| {
            encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size)
        })
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let texture = self.scoped(
            |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texture_format(desc.format),
                    usage: texture_usages(desc.usage),
                    view_formats: &[],
                })
            },
            BackendError::TextureCreationFailed,
        )?;
        let id = self.textures.insert(DeviceTexture {
            texture,
            desc: desc.clone(),
        });
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let view = self
            .textures
            .fetch(texture.0, texture)?
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(TextureViewHandle(self.views.insert(view)))
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        let DeviceTexture { texture: source, desc } = self.textures.fetch(texture.0, texture)?;

        // Copies need rows padded to COPY_BYTES_PER_ROW_ALIGNMENT
        let row_bytes = desc.width * desc.format.bytes_per_pixel();
        let padded_row_bytes = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging =
            self.staging_buffer("Texture Readback", padded_row_bytes as u64 * desc.height as u64);
        let extent = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let padded = self.read_back(&staging, |encoder| {
            encoder.copy_texture_to_buffer(
                source.as_image_copy(),
                wgpu::ImageCopyBuffer {
                    buffer: &staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row_bytes),
                        rows_per_image: Some(desc.height),
                    },
                },
                extent,
            )
        })?;

        Ok(padded
            .chunks_exact(padded_row_bytes as usize)
            .flat_map(|row| &row[..row_bytes as usize])
            .copied()
            .collect())
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: shader_stages(entry.visibility),
                ty: binding_type(&entry.ty),
                count: None,
            })
            .collect();
        let layout = self.scoped(
            |device| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: None,
                    entries: &entries,
                })
            },
            BackendError::PipelineCreationFailed,
        )?;
        Ok(BindGroupLayoutHandle(self.layouts.insert(layout)))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self.layouts.fetch(layout.0, layout)?;
        let entries = entries
            .iter()
            .map(|(binding, entry)| {
                let buffer = self.buffers.fetch(entry.buffer.0, entry.buffer)?;
                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: buffer.as_entire_binding(),
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let bind_group = self.scoped(
            |device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: None,
                    layout: layout_ref,
                    entries: &entries,
                })
            },
            BackendError::ValidationFailed,
        )?;
        Ok(BindGroupHandle(self.bind_groups.insert(bind_group)))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let label = desc.label.as_deref();
        let pipeline_layout = self.pipeline_layout(label, &desc.bind_group_layouts)?;

        let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|attribute| wgpu::VertexAttribute {
                        format: vertex_format(attribute.format),
                        offset: attribute.offset,
                        shader_location: attribute.location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: texture_format(target.format),
                    blend: target.blend.map(|blend| wgpu::BlendState {
                        color: blend_component(blend.color),
                        alpha: blend_component(blend.alpha),
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = self.scoped(
            |device| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label,
                    source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
                });
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label,
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: "vs_main",
                        buffers: &vertex_buffers,
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: "fs_main",
                        targets: &targets,
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                })
            },
            BackendError::PipelineCreationFailed,
        )?;
        Ok(RenderPipelineHandle(self.render_pipelines.insert(pipeline)))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let label = desc.label.as_deref();
        let pipeline_layout = self.pipeline_layout(label, &desc.bind_group_layouts)?;
        let pipeline = self.scoped(
            |device| {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label,
                    source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
                });
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label,
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: &desc.entry_point,
                    compilation_options: Default::default(),
                })
            },
            BackendError::PipelineCreationFailed,
        )?;
        Ok(ComputePipelineHandle(self.compute_pipelines.insert(pipeline)))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.open_pass = Some(OpenPass::Render {
            desc: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) -> BackendResult<()> {
        let Some(OpenPass::Render { desc, commands }) = self.open_pass.take() else {
            return Err(BackendError::CommandRejected(
                "end_render_pass without an open render pass".into(),
            ));
        };
        self.check_render_commands(&commands)?;
        let Some(mut encoder) = self.encoder.take() else {
            return Err(BackendError::CommandRejected(
                "render pass recorded outside of a frame".into(),
            ));
        };
        let result = self.encode_render_pass(&mut encoder, &desc, &commands);
        self.encoder = Some(encoder);
        result
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.open_pass = Some(OpenPass::Compute {
            label: label.map(str::to_string),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) -> BackendResult<()> {
        let Some(OpenPass::Compute { label, commands }) = self.open_pass.take() else {
            return Err(BackendError::CommandRejected(
                "end_compute_pass without an open compute pass".into(),
            ));
        };
        self.check_compute_commands(&commands)?;
        let Some(mut encoder) = self.encoder.take() else {
            return Err(BackendError::CommandRejected(
                "compute pass recorded outside of a frame".into(),
            ));
        };
        self.encode_compute_pass(&mut encoder, label.as_deref(), &commands);
        self.encoder = Some(encoder);
        Ok(())
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record_render(RenderCommand::SetPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record_compute(ComputeCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        match &mut self.open_pass {
            Some(OpenPass::Render { commands, .. }) => {
                commands.push(RenderCommand::SetBindGroup { index, bind_group })
            }
            Some(OpenPass::Compute { commands, .. }) => {
                commands.push(ComputeCommand::SetBindGroup { index, bind_group })
            }
            None => log::warn!("{:?} bound outside of a pass", bind_group),
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record_render(RenderCommand::SetVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn draw_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        self.record_render(RenderCommand::DrawIndirect { buffer, offset });
    }

    fn multi_draw_indirect_count(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        count_buffer: BufferHandle,
        count_offset: u64,
        max_count: u32,
    ) {
        self.record_render(RenderCommand::MultiDrawIndirectCount {
            buffer,
            offset,
            count_buffer,
            count_offset,
            max_count,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record_compute(ComputeCommand::Dispatch([x, y, z]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags_convert() {
        assert_eq!(
            buffer_usages(BufferUsage::STORAGE | BufferUsage::INDIRECT | BufferUsage::COPY_SRC),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_SRC
        );
        assert_eq!(
            texture_usages(TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC),
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC
        );
        assert_eq!(
            shader_stages(ShaderStageFlags::COMPUTE | ShaderStageFlags::VERTEX),
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::COMPUTE
        );
    }

    #[test]
    fn test_table_ids_start_at_one() {
        let mut table = Table::new();
        assert_eq!(table.insert("a"), 1);
        assert_eq!(table.insert("b"), 2);
        assert_eq!(table.get(2), Some(&"b"));
        assert!(!table.contains(3));
        assert!(matches!(
            table.fetch(3, "missing"),
            Err(BackendError::InvalidHandle(_))
        ));
    }
}
