//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
        }
    }
}

/// Declares a copyable bit set with named members, `|` and `contains`.
macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$doc:meta])* $flag:ident = $bit:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(u32);

        impl $name {
            $($(#[$doc])* pub const $flag: Self = Self(1 << $bit);)+

            pub fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

pub(crate) use flag_set;

flag_set! {
    /// How a texture may be used
    TextureUsage { COPY_SRC = 0, RENDER_ATTACHMENT = 1 }
}

flag_set! {
    /// How a buffer may be used
    BufferUsage {
        COPY_SRC = 0,
        COPY_DST = 1,
        VERTEX = 2,
        UNIFORM = 3,
        STORAGE = 4,
        /// Source of indirect draw arguments and counts
        INDIRECT = 5,
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn new(label: &str, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(label.to_string()),
            size,
            usage,
        }
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Per-vertex buffer layout
#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// 2D vertex with a position relative to the owning object and an RGBA color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: [f32; 4],
}

impl Vertex {
    pub fn new(position: Vec2, color: [f32; 4]) -> Self {
        Self { position, color }
    }

    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x2,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x4,
                    offset: 8,
                },
            ],
        }
    }
}

/// Per-frame uniform shared by command generation and execution
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FrameState {
    /// World-space translation applied to every object
    pub translation: Vec2,
    /// Per-axis scale correcting for the viewport aspect ratio
    pub aspect_scale: Vec2,
}

impl FrameState {
    pub fn new(translation: Vec2, aspect_scale: Vec2) -> Self {
        Self {
            translation,
            aspect_scale,
        }
    }
}

/// Object table record, one per scene object
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ObjectParams {
    /// Offset of the object's first vertex in the vertex store
    pub start_vertex: u32,
    pub num_vertices: u32,
    pub position: Vec2,
    pub bounding_radius: f32,
    pub _padding: u32,
}

/// Non-indexed indirect draw arguments as read by the device
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Draws nothing when executed
    pub const EMPTY: Self = Self {
        vertex_count: 0,
        instance_count: 0,
        first_vertex: 0,
        first_instance: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0 || self.instance_count == 0
    }
}

/// Slot is populated with a draw
pub const SLOT_POPULATED: u32 = 1;
/// Slot reuses the bindings of the previous slot in the compacted region
pub const SLOT_INHERITS_BINDINGS: u32 = 1 << 1;

/// Binding-state record stored next to each command slot
///
/// The record lives on the device and is never read back while a frame is
/// encoded. Execution binds the single scene binding set the pipeline
/// records into every populated slot, once per compacted region, which is
/// what the inherit flags describe for a single-set list. The pipeline never
/// produces lists that mix binding sets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct SlotMeta {
    /// Identifier of the binding set the slot draws with
    pub binding_set: u32,
    pub flags: u32,
}

impl SlotMeta {
    pub const EMPTY: Self = Self {
        binding_set: 0,
        flags: 0,
    };

    pub fn is_populated(&self) -> bool {
        self.flags & SLOT_POPULATED != 0
    }

    pub fn inherits_bindings(&self) -> bool {
        self.flags & SLOT_INHERITS_BINDINGS != 0
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Additive blend of `src * src_factor` and `dst * dst_factor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    /// Straight alpha over the existing target contents
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_record_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::size_of::<FrameState>(), 16);
        assert_eq!(std::mem::size_of::<ObjectParams>(), 24);
        assert_eq!(std::mem::size_of::<DrawIndirectArgs>(), 16);
        assert_eq!(std::mem::size_of::<SlotMeta>(), 8);
    }

    #[test]
    fn test_vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.array_stride, 24);
        let end = layout
            .attributes
            .iter()
            .map(|a| a.offset + a.format.size())
            .max();
        assert_eq!(end, Some(24));
    }

    #[test]
    fn test_empty_args() {
        assert!(DrawIndirectArgs::EMPTY.is_empty());
        let args = DrawIndirectArgs {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        };
        assert!(!args.is_empty());
    }
}
