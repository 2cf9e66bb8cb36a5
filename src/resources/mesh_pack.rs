//! Mesh pack: every object's vertices in one store plus a per-object table
//!
//! The vertex store holds all meshes back to back. Entry `i` of the object
//! table locates object `i` in that store and carries its placement, and `i`
//! stays the object's identity for the lifetime of the pipeline.

use crate::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, ObjectParams,
    Vertex,
};
use crate::error::SetupError;
use glam::Vec2;

/// Size of the placeholder buffers uploaded for an empty pack
pub const MIN_BUFFER_SIZE: u64 = 16;

/// One object of the scene before packing
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    /// Vertices relative to `position`, as a triangle list
    pub vertices: Vec<Vertex>,
    pub position: Vec2,
    pub bounding_radius: f32,
}

impl ObjectDescriptor {
    pub fn new(vertices: Vec<Vertex>, position: Vec2, bounding_radius: f32) -> Self {
        Self {
            vertices,
            position,
            bounding_radius,
        }
    }

    fn validate(&self, index: usize) -> Result<(), SetupError> {
        if !self.position.is_finite() {
            return Err(SetupError::InvalidObject {
                index,
                reason: format!("position {:?} is not finite", self.position),
            });
        }
        if !self.bounding_radius.is_finite() || self.bounding_radius < 0.0 {
            return Err(SetupError::InvalidObject {
                index,
                reason: format!(
                    "bounding radius {} must be finite and non-negative",
                    self.bounding_radius
                ),
            });
        }
        Ok(())
    }
}

/// Host-side mesh pack
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshPack {
    vertices: Vec<Vertex>,
    objects: Vec<ObjectParams>,
}

impl MeshPack {
    /// Pack `objects` into one vertex store and an object table.
    ///
    /// The per-object vertex lists are consumed as they are copied.
    pub fn build(objects: Vec<ObjectDescriptor>) -> Result<Self, SetupError> {
        if u32::try_from(objects.len()).is_err() {
            return Err(SetupError::InvalidConfig(format!(
                "{} objects exceed the u32 instance range",
                objects.len()
            )));
        }
        for (index, object) in objects.iter().enumerate() {
            object.validate(index)?;
        }

        let starts = pack_offsets(objects.iter().map(|o| o.vertices.len() as u64))?;
        let total: u64 = objects.iter().map(|o| o.vertices.len() as u64).sum();

        let mut vertices = Vec::new();
        vertices
            .try_reserve_exact(total as usize)
            .map_err(|_| SetupError::AllocationFailed {
                what: "vertex store",
                bytes: total * std::mem::size_of::<Vertex>() as u64,
            })?;
        let mut table = Vec::new();
        table
            .try_reserve_exact(objects.len())
            .map_err(|_| SetupError::AllocationFailed {
                what: "object table",
                bytes: (objects.len() * std::mem::size_of::<ObjectParams>()) as u64,
            })?;

        for (object, start_vertex) in objects.into_iter().zip(starts) {
            table.push(ObjectParams {
                start_vertex,
                num_vertices: object.vertices.len() as u32,
                position: object.position,
                bounding_radius: object.bounding_radius,
                _padding: 0,
            });
            vertices.extend(object.vertices);
        }

        log::info!(
            "Packed {} objects into a {} vertex store",
            table.len(),
            vertices.len()
        );
        Ok(Self {
            vertices,
            objects: table,
        })
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn objects(&self) -> &[ObjectParams] {
        &self.objects
    }

    pub fn object_count(&self) -> u32 {
        self.objects.len() as u32
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Vertices of object `index`
    pub fn object_vertices(&self, index: usize) -> Option<&[Vertex]> {
        let params = self.objects.get(index)?;
        let start = params.start_vertex as usize;
        self.vertices.get(start..start + params.num_vertices as usize)
    }
}

/// Running prefix sum of vertex counts, failing once the store would not be
/// addressable by a `u32` draw range.
pub fn pack_offsets(counts: impl IntoIterator<Item = u64>) -> Result<Vec<u32>, SetupError> {
    let mut starts = Vec::new();
    let mut running: u64 = 0;
    for count in counts {
        starts.push(running as u32);
        running += count;
        if running > u32::MAX as u64 {
            return Err(SetupError::VertexStoreOverflow { total: running });
        }
    }
    Ok(starts)
}

/// Device copy of a [`MeshPack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMeshPack {
    pub vertex_store: BufferHandle,
    pub object_table: BufferHandle,
    pub object_count: u32,
    pub vertex_count: u32,
}

impl GpuMeshPack {
    /// Create the vertex store and object table buffers.
    pub fn upload<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        pack: &MeshPack,
    ) -> BackendResult<Self> {
        let vertex_store = upload_or_placeholder(
            backend,
            "Vertex Store",
            bytemuck::cast_slice(pack.vertices()),
            BufferUsage::VERTEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
        )?;
        let object_table = upload_or_placeholder(
            backend,
            "Object Table",
            bytemuck::cast_slice(pack.objects()),
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        )?;

        Ok(Self {
            vertex_store,
            object_table,
            object_count: pack.object_count(),
            vertex_count: pack.vertex_count(),
        })
    }
}

fn upload_or_placeholder<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    label: &str,
    data: &[u8],
    usage: BufferUsage,
) -> BackendResult<BufferHandle> {
    let desc = BufferDescriptor::new(label, (data.len() as u64).max(MIN_BUFFER_SIZE), usage);
    if data.is_empty() {
        backend.create_buffer(&desc)
    } else {
        backend.create_buffer_init(&desc, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::resources::Mesh;

    fn object(vertex_count: usize, x: f32) -> ObjectDescriptor {
        let vertices = (0..vertex_count)
            .map(|i| Vertex::new(Vec2::new(i as f32, 0.0), [1.0; 4]))
            .collect();
        ObjectDescriptor::new(vertices, Vec2::new(x, 0.0), 1.0)
    }

    #[test]
    fn test_offsets_are_prefix_sums() {
        let counts = [3usize, 12, 6, 0, 9];
        let objects = counts
            .iter()
            .enumerate()
            .map(|(i, c)| object(*c, i as f32))
            .collect();
        let pack = MeshPack::build(objects).unwrap();

        let mut expected = 0;
        for (params, count) in pack.objects().iter().zip(counts) {
            assert_eq!(params.start_vertex, expected);
            assert_eq!(params.num_vertices, count as u32);
            expected += count as u32;
        }
        assert_eq!(pack.vertex_count(), counts.iter().sum::<usize>() as u32);
    }

    #[test]
    fn test_object_vertices_are_copied_in_order() {
        let a = Mesh::quad(0.5, [1.0, 0.0, 0.0, 1.0]);
        let b = Mesh::polygon(5, 0.5, [0.0, 1.0, 0.0, 1.0]);
        let pack = MeshPack::build(vec![
            ObjectDescriptor::new(a.vertices.clone(), Vec2::ZERO, 1.0),
            ObjectDescriptor::new(b.vertices.clone(), Vec2::ONE, 1.0),
        ])
        .unwrap();
        assert_eq!(pack.object_vertices(0), Some(a.vertices.as_slice()));
        assert_eq!(pack.object_vertices(1), Some(b.vertices.as_slice()));
        assert_eq!(pack.objects()[1].position, Vec2::ONE);
    }

    #[test]
    fn test_empty_pack() {
        let pack = MeshPack::build(Vec::new()).unwrap();
        assert!(pack.is_empty());
        assert_eq!(pack.vertex_count(), 0);

        let mut backend = DummyBackend::new();
        let gpu = GpuMeshPack::upload(&mut backend, &pack).unwrap();
        assert_eq!(gpu.object_count, 0);
        let store = backend.read_buffer(gpu.vertex_store).unwrap();
        assert_eq!(store.len() as u64, MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_overflow_is_detected() {
        let result = pack_offsets([u32::MAX as u64, 1]);
        assert!(matches!(
            result,
            Err(SetupError::VertexStoreOverflow { total }) if total == u32::MAX as u64 + 1
        ));
        assert_eq!(pack_offsets([u32::MAX as u64]).unwrap(), vec![0]);
    }

    #[test]
    fn test_invalid_objects_are_rejected() {
        let mut bad = object(3, 0.0);
        bad.bounding_radius = -1.0;
        assert!(matches!(
            MeshPack::build(vec![object(3, 0.0), bad]),
            Err(SetupError::InvalidObject { index: 1, .. })
        ));

        let mut bad = object(3, 0.0);
        bad.position.x = f32::INFINITY;
        assert!(MeshPack::build(vec![bad]).is_err());
    }

    #[test]
    fn test_upload_matches_host_data() {
        let pack = MeshPack::build(vec![object(3, 0.0), object(6, 1.0)]).unwrap();
        let mut backend = DummyBackend::new();
        let gpu = GpuMeshPack::upload(&mut backend, &pack).unwrap();
        let table = backend.read_buffer(gpu.object_table).unwrap();
        assert_eq!(table.as_slice(), bytemuck::cast_slice::<_, u8>(pack.objects()));
        assert_eq!(gpu.vertex_count, 9);
    }
}
