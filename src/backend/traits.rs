//! Device abstraction shared by the wgpu device and the host device
//!
//! Devices own their objects; callers hold copyable handles into the device's
//! tables. A stale or foreign handle is reported as
//! [`BackendError::InvalidHandle`] when it is used.

use crate::backend::dummy::HostKernel;
use crate::backend::types::{flag_set, *};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("no usable device: {0}")]
    InitializationFailed(String),
    #[error("device request failed: {0}")]
    DeviceCreationFailed(String),
    #[error("buffer allocation failed: {0}")]
    BufferCreationFailed(String),
    #[error("texture allocation failed: {0}")]
    TextureCreationFailed(String),
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),
    #[error("unknown handle {0}")]
    InvalidHandle(String),
    #[error("command rejected: {0}")]
    CommandRejected(String),
    #[error("device validation error: {0}")]
    ValidationFailed(String),
    #[error("readback failed: {0}")]
    ReadbackFailed(String),
    #[error("device out of memory")]
    OutOfMemory,
    #[error("device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! device_handle {
    ($($(#[$doc:meta])* $name:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) u64);
        )*
    };
}

device_handle! {
    BufferHandle;
    TextureHandle;
    /// Render target view of a texture
    TextureViewHandle;
    RenderPipelineHandle;
    ComputePipelineHandle;
    BindGroupHandle;
    BindGroupLayoutHandle;
}

/// A whole buffer bound at one binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindGroupEntry {
    pub buffer: BufferHandle,
}

impl BindGroupEntry {
    pub fn buffer(buffer: BufferHandle) -> Self {
        Self { buffer }
    }
}

#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

flag_set! {
    /// Shader stages a binding is visible to
    ShaderStageFlags { VERTEX = 0, COMPUTE = 1 }
}

#[derive(Debug, Clone)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
}

/// Triangle-list pipeline without face culling
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    /// WGSL source containing `vs_main` and `fs_main`
    pub shader: String,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub color_targets: Vec<ColorTargetState>,
}

#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

/// Compute pipeline descriptor
///
/// `host_kernel` is the host-side implementation of the same entry point. The
/// host device executes it on dispatch; GPU devices ignore it.
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub entry_point: String,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub host_kernel: Option<Arc<dyn HostKernel>>,
}

/// Color target of a render pass; its contents are always stored
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp,
}

#[derive(Debug, Clone)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
}

/// Optional device capabilities the pipeline adapts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    /// `multi_draw_indirect_count` can be encoded
    pub multi_draw_indirect_count: bool,
}

/// A device the pipeline records frames on.
///
/// Resource creation reports errors immediately. Encoding calls are buffered
/// per pass; problems found while a pass is flushed are returned from
/// `end_render_pass`/`end_compute_pass`, and device-side validation failures
/// surface from `end_frame`.
pub trait GraphicsBackend {
    /// Name shown in logs
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Start a frame. Discards any pass a failed frame left open.
    fn begin_frame(&mut self) -> BackendResult<()>;

    fn end_frame(&mut self) -> BackendResult<()>;

    /// Allocate a zeroed buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Allocate a buffer holding `data`, at least `desc.size` bytes long
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Queue a host write; visible to work recorded after it
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Copy the contents of a buffer back to the host. Waits for the device.
    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>>;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;

    /// Copy a 2D texture back to the host as tightly packed rows. Waits for the device.
    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>>;

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle>;

    /// Open a render pass; the encoding calls below record into it
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    /// Close and flush the open render pass
    fn end_render_pass(&mut self) -> BackendResult<()>;

    fn begin_compute_pass(&mut self, label: Option<&str>);

    fn end_compute_pass(&mut self) -> BackendResult<()>;

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    /// Bind `bind_group` at `index` in whichever pass is open
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    /// Draw with arguments read from `buffer` at `offset` on the device
    fn draw_indirect(&mut self, buffer: BufferHandle, offset: u64);

    /// Draw up to `max_count` packed argument records starting at `offset`,
    /// with the actual count read from `count_buffer` on the device
    fn multi_draw_indirect_count(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        count_buffer: BufferHandle,
        count_offset: u64,
        max_count: u32,
    );

    /// Dispatch workgroups in the open compute pass
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
}

impl<B: GraphicsBackend + ?Sized> GraphicsBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn capabilities(&self) -> BackendCapabilities {
        (**self).capabilities()
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        (**self).begin_frame()
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        (**self).end_frame()
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        (**self).create_buffer(desc)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        (**self).create_buffer_init(desc, data)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        (**self).write_buffer(buffer, offset, data)
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        (**self).read_buffer(buffer)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        (**self).create_texture(desc)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        (**self).create_texture_view(texture)
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        (**self).read_texture(texture)
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        (**self).create_bind_group_layout(entries)
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        (**self).create_bind_group(layout, entries)
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        (**self).create_render_pipeline(desc)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        (**self).create_compute_pipeline(desc)
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        (**self).begin_render_pass(desc)
    }

    fn end_render_pass(&mut self) -> BackendResult<()> {
        (**self).end_render_pass()
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        (**self).begin_compute_pass(label)
    }

    fn end_compute_pass(&mut self) -> BackendResult<()> {
        (**self).end_compute_pass()
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        (**self).set_render_pipeline(pipeline)
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        (**self).set_compute_pipeline(pipeline)
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        (**self).set_bind_group(index, bind_group)
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        (**self).set_vertex_buffer(slot, buffer, offset)
    }

    fn draw_indirect(&mut self, buffer: BufferHandle, offset: u64) {
        (**self).draw_indirect(buffer, offset)
    }

    fn multi_draw_indirect_count(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        count_buffer: BufferHandle,
        count_offset: u64,
        max_count: u32,
    ) {
        (**self).multi_draw_indirect_count(buffer, offset, count_buffer, count_offset, max_count)
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        (**self).dispatch_compute(x, y, z)
    }
}
