//! Mesh data structures and generation
//!
//! Meshes are non-indexed 2D triangle lists with positions relative to the
//! owning object's origin.

use crate::backend::types::Vertex;
use crate::error::SetupError;
use glam::Vec2;
use std::f32::consts::TAU;

/// Largest tooth count accepted by [`GearMesh`]
pub const MAX_GEAR_TEETH: u32 = 128;

/// A mesh made of vertex triples
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            name: name.to_string(),
        }
    }

    /// Calculate vertex count
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Calculate triangle count
    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Largest distance of any vertex from the origin
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| v.position.length())
            .fold(0.0, f32::max)
    }

    /// Create an axis-aligned square centered at origin
    pub fn quad(half_extent: f32, color: [f32; 4]) -> Self {
        let mut mesh = Mesh::new("quad");
        let h = half_extent;
        let corners = [
            Vec2::new(-h, -h),
            Vec2::new(h, -h),
            Vec2::new(h, h),
            Vec2::new(-h, h),
        ];
        for index in [0, 1, 2, 0, 2, 3] {
            mesh.vertices.push(Vertex::new(corners[index], color));
        }
        mesh
    }

    /// Create a regular polygon fan centered at origin
    pub fn polygon(sides: u32, radius: f32, color: [f32; 4]) -> Self {
        let mut mesh = Mesh::new("polygon");
        let step = TAU / sides.max(3) as f32;
        for i in 0..sides.max(3) {
            let a0 = i as f32 * step;
            let a1 = a0 + step;
            mesh.vertices.push(Vertex::new(Vec2::ZERO, color));
            mesh.vertices
                .push(Vertex::new(Vec2::from_angle(a0) * radius, color));
            mesh.vertices
                .push(Vertex::new(Vec2::from_angle(a1) * radius, color));
        }
        mesh
    }
}

/// Parameters for a procedurally generated gear
#[derive(Debug, Clone, PartialEq)]
pub struct GearMesh {
    pub teeth: u32,
    pub inner_radius: f32,
    pub outer_radius: f32,
    pub center_color: [f32; 4],
    pub edge_color: [f32; 4],
}

impl GearMesh {
    /// Validate gear parameters.
    ///
    /// `teeth` must be in `3..=MAX_GEAR_TEETH` and the radii must satisfy
    /// `0 < inner_radius < outer_radius`.
    pub fn new(teeth: u32, inner_radius: f32, outer_radius: f32) -> Result<Self, SetupError> {
        if !(3..=MAX_GEAR_TEETH).contains(&teeth) {
            return Err(SetupError::InvalidMesh(format!(
                "gear needs 3..={} teeth, got {}",
                MAX_GEAR_TEETH, teeth
            )));
        }
        if !(inner_radius.is_finite() && outer_radius.is_finite())
            || inner_radius <= 0.0
            || outer_radius <= inner_radius
        {
            return Err(SetupError::InvalidMesh(format!(
                "gear radii must satisfy 0 < inner < outer, got {} and {}",
                inner_radius, outer_radius
            )));
        }
        Ok(Self {
            teeth,
            inner_radius,
            outer_radius,
            center_color: [0.5, 0.5, 0.5, 1.0],
            edge_color: [1.0, 1.0, 1.0, 1.0],
        })
    }

    pub fn with_colors(mut self, center_color: [f32; 4], edge_color: [f32; 4]) -> Self {
        self.center_color = center_color;
        self.edge_color = edge_color;
        self
    }

    /// Vertices emitted per tooth: four fan triangles (root, rise, top, fall)
    pub const VERTICES_PER_TOOTH: u32 = 12;

    /// Number of vertices [`GearMesh::build`] produces
    pub fn vertex_count(&self) -> u32 {
        self.teeth * Self::VERTICES_PER_TOOTH
    }

    /// Build the gear as a triangle fan around its center
    pub fn build(&self) -> Mesh {
        let mut mesh = Mesh::new(&format!("gear_{}", self.teeth));
        mesh.vertices.reserve(self.vertex_count() as usize);

        let step = TAU / self.teeth as f32;
        let center = Vertex::new(Vec2::ZERO, self.center_color);
        let lerp = |t: f32| {
            let mut color = [0.0; 4];
            for (c, (a, b)) in color
                .iter_mut()
                .zip(self.center_color.iter().zip(self.edge_color.iter()))
            {
                *c = a + (b - a) * t;
            }
            color
        };
        let inner_color = lerp(self.inner_radius / self.outer_radius);

        for tooth in 0..self.teeth {
            let base = tooth as f32 * step;
            let profile = [
                (base, self.inner_radius, inner_color),
                (base + step * 0.25, self.outer_radius, self.edge_color),
                (base + step * 0.5, self.outer_radius, self.edge_color),
                (base + step * 0.75, self.inner_radius, inner_color),
                (base + step, self.inner_radius, inner_color),
            ];
            for pair in profile.windows(2) {
                let (a0, r0, c0) = pair[0];
                let (a1, r1, c1) = pair[1];
                mesh.vertices.push(center);
                mesh.vertices.push(Vertex::new(Vec2::from_angle(a0) * r0, c0));
                mesh.vertices.push(Vertex::new(Vec2::from_angle(a1) * r1, c1));
            }
        }

        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad() {
        let mesh = Mesh::quad(0.5, [1.0; 4]);
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        assert!((mesh.bounding_radius() - 0.5 * 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_gear_vertex_count() {
        for teeth in [3, 7, 20, MAX_GEAR_TEETH] {
            let gear = GearMesh::new(teeth, 0.7, 1.0).unwrap();
            let mesh = gear.build();
            assert_eq!(mesh.vertex_count() as u32, gear.vertex_count());
            assert_eq!(mesh.vertex_count() % 3, 0);
            assert!(mesh.bounding_radius() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_gear_rejects_bad_tooth_counts() {
        assert!(matches!(
            GearMesh::new(2, 0.7, 1.0),
            Err(SetupError::InvalidMesh(_))
        ));
        assert!(GearMesh::new(MAX_GEAR_TEETH + 1, 0.7, 1.0).is_err());
    }

    #[test]
    fn test_gear_rejects_bad_radii() {
        assert!(GearMesh::new(8, 0.0, 1.0).is_err());
        assert!(GearMesh::new(8, 1.0, 0.5).is_err());
        assert!(GearMesh::new(8, 0.5, f32::NAN).is_err());
    }

    #[test]
    fn test_gear_colors() {
        let mesh = GearMesh::new(4, 0.5, 1.0)
            .unwrap()
            .with_colors([0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0, 1.0])
            .build();
        assert_eq!(mesh.vertices[0].color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[1].color, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(mesh.vertices[2].color, [1.0, 1.0, 1.0, 1.0]);
    }
}
