//! Resources tracked by the render graph

use crate::backend::{BufferHandle, TextureViewHandle};
use crate::pipeline::command_list::{AccessMode, CommandListRef};

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Buffer imported into the graph
#[derive(Debug, Clone)]
pub struct VirtualBuffer {
    pub id: ResourceId,
    pub name: String,
    pub handle: BufferHandle,
}

/// Texture view imported into the graph
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub name: String,
    pub view: TextureViewHandle,
}

/// Indirect command list imported into the graph
#[derive(Debug, Clone)]
pub struct VirtualCommandList {
    pub id: ResourceId,
    pub name: String,
    pub list: CommandListRef,
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    Buffer(VirtualBuffer),
    Texture(VirtualTexture),
    CommandList(VirtualCommandList),
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Buffer(b) => b.id,
            VirtualResource::Texture(t) => t.id,
            VirtualResource::CommandList(c) => c.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Buffer(b) => &b.name,
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::CommandList(c) => &c.name,
        }
    }

    pub fn command_list(&self) -> Option<CommandListRef> {
        match self {
            VirtualResource::CommandList(c) => Some(c.list),
            _ => None,
        }
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read as uniform buffer
    UniformBuffer,
    /// Read/write as storage buffer
    StorageBufferRead,
    StorageBufferWrite,
    StorageBufferReadWrite,
    /// Bound as a vertex buffer
    VertexBuffer,
    /// Consumed as indirect draw arguments
    IndirectRead,
    /// Write as a render target
    RenderTarget,
}

impl ResourceUsage {
    /// Command list access implied by this usage, if it can apply to a list
    pub fn command_list_access(self) -> Option<AccessMode> {
        match self {
            ResourceUsage::StorageBufferWrite => Some(AccessMode::Write),
            ResourceUsage::StorageBufferReadWrite => Some(AccessMode::ReadWrite),
            ResourceUsage::IndirectRead => Some(AccessMode::Execute),
            _ => None,
        }
    }
}

/// Resource access declaration for a pass
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::UniformBuffer
                | ResourceUsage::StorageBufferRead
                | ResourceUsage::StorageBufferReadWrite
                | ResourceUsage::VertexBuffer
                | ResourceUsage::IndirectRead
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::RenderTarget
                | ResourceUsage::StorageBufferWrite
                | ResourceUsage::StorageBufferReadWrite
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_classification() {
        let access = |usage| ResourceAccess {
            resource: ResourceId(0),
            usage,
        };
        assert!(access(ResourceUsage::IndirectRead).is_read());
        assert!(!access(ResourceUsage::IndirectRead).is_write());
        assert!(access(ResourceUsage::StorageBufferReadWrite).is_read());
        assert!(access(ResourceUsage::StorageBufferReadWrite).is_write());
        assert!(access(ResourceUsage::RenderTarget).is_write());
    }

    #[test]
    fn test_command_list_access() {
        assert_eq!(
            ResourceUsage::StorageBufferWrite.command_list_access(),
            Some(AccessMode::Write)
        );
        assert_eq!(
            ResourceUsage::IndirectRead.command_list_access(),
            Some(AccessMode::Execute)
        );
        assert_eq!(ResourceUsage::UniformBuffer.command_list_access(), None);
    }
}
