//! Common utilities for pipeline integration tests.

use glam::Vec2;

use indirect_engine::backend::{FrameState, GraphicsBackend};
use indirect_engine::resources::{Mesh, ObjectDescriptor};
use indirect_engine::{DummyBackend, EngineConfig, GpuDrivenPipeline, WgpuBackend};

/// Clear color used by every test, as written to an Rgba8Unorm target
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
pub const CLEAR_TEXEL: [u8; 4] = [0, 0, 0, 255];

/// Vertices per test object
pub const QUAD_VERTICES: u32 = 6;

/// Available backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Host device, always available
    Dummy,
    /// wgpu on whatever adapter the machine offers
    Wgpu,
}

impl Backend {
    /// Create the device, or `None` when no adapter is available.
    pub fn create(self) -> Option<Box<dyn GraphicsBackend>> {
        match self {
            Backend::Dummy => Some(Box::new(DummyBackend::new())),
            Backend::Wgpu => match WgpuBackend::new() {
                Ok(backend) => Some(Box::new(backend)),
                Err(err) => {
                    eprintln!("wgpu unavailable: {}", err);
                    None
                }
            },
        }
    }
}

/// Small configuration with a neutral aspect ratio
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_size(64, 64)
        .with_view_scale(0.25)
        .with_clear_color(CLEAR_COLOR)
}

/// Quad objects of half extent 0.2 at the given x positions
pub fn quads_at(xs: &[f32]) -> Vec<ObjectDescriptor> {
    xs.iter()
        .map(|&x| {
            let mesh = Mesh::quad(0.2, [1.0, 1.0, 1.0, 1.0]);
            ObjectDescriptor::new(mesh.vertices, Vec2::new(x, 0.0), 0.3)
        })
        .collect()
}

/// The four-object scene: one object far off screen, three in view
pub fn four_objects() -> Vec<ObjectDescriptor> {
    quads_at(&[-20.0, -1.0, 0.0, 1.0])
}

/// Frame state with a translation and no aspect correction
pub fn frame_at(x: f32) -> FrameState {
    FrameState::new(Vec2::new(x, 0.0), Vec2::ONE)
}

/// Build a pipeline on `backend`, or `None` when the backend is unavailable.
pub fn create_pipeline(
    backend: Backend,
    config: EngineConfig,
    objects: Vec<ObjectDescriptor>,
) -> Option<GpuDrivenPipeline<Box<dyn GraphicsBackend>>> {
    let device = backend.create()?;
    Some(GpuDrivenPipeline::new(device, config, objects).expect("Pipeline setup should succeed"))
}
