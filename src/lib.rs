//! Indirect Engine - GPU-driven rendering with device-resident command lists
//!
//! Objects are packed into one vertex store at setup. Every frame a compute
//! kernel culls each object against the viewport and writes one indirect draw
//! command per object; an optional compaction pass packs the surviving
//! commands; the render pass then executes the list without per-object host
//! work.
//!
//! Two backends are supported:
//! - **wgpu**: Headless GPU device for compute, rendering and indirect draws
//! - **Dummy**: Host device executing compute kernels on the CPU, for
//!   inspection and testing without GPU hardware
//!
//! # Features
//! - Render graph ordering the generation, compaction and draw passes
//! - Command list access registered per frame and per stage
//! - Count-driven multi-draw of compacted regions where supported

pub mod backend;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;

use std::ops::Range;
use std::str::FromStr;

pub use backend::{DummyBackend, GraphicsBackend, WgpuBackend};
pub use engine::{FrameOutput, FrameReport, GpuDrivenPipeline};
pub use error::{FrameError, PipelineStage, SetupError};

use backend::BackendResult;

/// Environment variable selecting the backend (`wgpu` or `dummy`)
pub const BACKEND_ENV: &str = "INDIRECT_BACKEND";
/// Environment variable toggling compaction (`0`, `false` or `off` disable it)
pub const COMPACTION_ENV: &str = "INDIRECT_COMPACTION";

/// Backend selection for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BackendType {
    /// wgpu backend - runs on the GPU
    #[default]
    Wgpu,
    /// Host device - runs compute kernels on the CPU, rasterizes nothing
    Dummy,
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wgpu" | "gpu" => Ok(BackendType::Wgpu),
            "dummy" | "host" => Ok(BackendType::Dummy),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Configuration for the GPU-driven pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Color target width
    pub width: u32,
    /// Color target height
    pub height: u32,
    /// Which backend to use
    pub backend: BackendType,
    /// Run the compaction pass after command generation
    pub compaction: bool,
    /// Slots to compact; the whole list when `None`
    pub compaction_range: Option<Range<u32>>,
    /// Draw compacted regions with count-driven multi-draw when the device allows
    pub multi_draw: bool,
    /// Lanes per workgroup of the generation kernel
    pub workgroup_size: u32,
    /// World to clip scale
    pub view_scale: f32,
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            backend: BackendType::Wgpu,
            compaction: true,
            compaction_range: None,
            multi_draw: true,
            workgroup_size: 64,
            view_scale: 0.25,
            clear_color: [0.02, 0.02, 0.05, 1.0],
        }
    }
}

impl EngineConfig {
    /// Largest generation workgroup every device accepts
    pub const MAX_WORKGROUP_SIZE: u32 = 256;

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_overrides(
            std::env::var(BACKEND_ENV).ok().as_deref(),
            std::env::var(COMPACTION_ENV).ok().as_deref(),
        )
    }

    /// Apply override values as read from the environment
    pub fn with_overrides(mut self, backend: Option<&str>, compaction: Option<&str>) -> Self {
        if let Some(value) = backend {
            match value.parse() {
                Ok(backend) => self.backend = backend,
                Err(err) => log::warn!("Ignoring {}: {}", BACKEND_ENV, err),
            }
        }
        if let Some(value) = compaction {
            match value.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "off" | "no" => self.compaction = false,
                "1" | "true" | "on" | "yes" => self.compaction = true,
                other => log::warn!("Ignoring {}: unknown value '{}'", COMPACTION_ENV, other),
            }
        }
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_compaction(mut self, compaction: bool) -> Self {
        self.compaction = compaction;
        self
    }

    /// Enable compaction over `range` only
    pub fn with_compaction_range(mut self, range: Range<u32>) -> Self {
        self.compaction = true;
        self.compaction_range = Some(range);
        self
    }

    pub fn with_multi_draw(mut self, multi_draw: bool) -> Self {
        self.multi_draw = multi_draw;
        self
    }

    pub fn with_workgroup_size(mut self, workgroup_size: u32) -> Self {
        self.workgroup_size = workgroup_size;
        self
    }

    pub fn with_view_scale(mut self, view_scale: f32) -> Self {
        self.view_scale = view_scale;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    /// Check the values that do not depend on the scene
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.width == 0 || self.height == 0 {
            return Err(SetupError::InvalidConfig(format!(
                "color target of {}x{} is empty",
                self.width, self.height
            )));
        }
        if !(1..=Self::MAX_WORKGROUP_SIZE).contains(&self.workgroup_size) {
            return Err(SetupError::InvalidConfig(format!(
                "workgroup size {} is outside 1..={}",
                self.workgroup_size,
                Self::MAX_WORKGROUP_SIZE
            )));
        }
        if !self.view_scale.is_finite() || self.view_scale <= 0.0 {
            return Err(SetupError::InvalidConfig(format!(
                "view scale {} must be finite and positive",
                self.view_scale
            )));
        }
        Ok(())
    }

    /// Compaction range for a list of `capacity` slots, if compaction is on
    pub fn resolved_compaction_range(
        &self,
        capacity: u32,
    ) -> Result<Option<Range<u32>>, SetupError> {
        if !self.compaction {
            return Ok(None);
        }
        let range = self.compaction_range.clone().unwrap_or(0..capacity);
        if range.start > range.end || range.end > capacity {
            return Err(SetupError::InvalidConfig(format!(
                "compaction range {:?} does not fit {} slots",
                range, capacity
            )));
        }
        Ok(Some(range))
    }
}

/// Create the backend selected by `config`
pub fn create_backend(config: &EngineConfig) -> BackendResult<Box<dyn GraphicsBackend>> {
    match config.backend {
        BackendType::Wgpu => Ok(Box::new(WgpuBackend::new()?)),
        BackendType::Dummy => Ok(Box::new(DummyBackend::new())),
    }
}
