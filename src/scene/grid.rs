//! Default scene: a grid of gears of varying size

use glam::Vec2;

use crate::error::SetupError;
use crate::resources::{GearMesh, ObjectDescriptor, MAX_GEAR_TEETH};

/// Centered grid of positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPlacement {
    pub columns: u32,
    pub rows: u32,
    pub spacing: f32,
}

impl GridPlacement {
    pub fn new(columns: u32, rows: u32, spacing: f32) -> Self {
        Self {
            columns,
            rows,
            spacing,
        }
    }

    pub fn len(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of cell `index`, row-major from the bottom-left
    pub fn position(&self, index: usize) -> Vec2 {
        let columns = self.columns.max(1) as usize;
        let (column, row) = (index % columns, index / columns);
        let half_width = (self.columns.saturating_sub(1)) as f32 * 0.5;
        let half_height = (self.rows.saturating_sub(1)) as f32 * 0.5;
        Vec2::new(
            (column as f32 - half_width) * self.spacing,
            (row as f32 - half_height) * self.spacing,
        )
    }

    pub fn positions(&self) -> impl Iterator<Item = Vec2> + '_ {
        (0..self.len()).map(|i| self.position(i))
    }
}

/// Parameters of the default gear grid
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub columns: u32,
    pub rows: u32,
    pub spacing: f32,
    pub min_teeth: u32,
    pub max_teeth: u32,
    pub inner_radius: f32,
    pub outer_radius: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            columns: 32,
            rows: 8,
            spacing: 2.5,
            min_teeth: 6,
            max_teeth: 24,
            inner_radius: 0.8,
            outer_radius: 1.0,
        }
    }
}

impl SceneConfig {
    pub fn with_grid(mut self, columns: u32, rows: u32) -> Self {
        self.columns = columns;
        self.rows = rows;
        self
    }

    pub fn placement(&self) -> GridPlacement {
        GridPlacement::new(self.columns, self.rows, self.spacing)
    }

    /// Tooth count of object `index`, cycling through the configured range
    pub fn teeth_for(&self, index: usize) -> u32 {
        let low = self.min_teeth.min(self.max_teeth);
        let span = u64::from(self.max_teeth.max(self.min_teeth) - low) + 1;
        // span > index % span, so the sum stays within the range
        low + (index as u64 % span) as u32
    }

    /// Reject tooth ranges that would produce invalid gears.
    pub fn validate(&self) -> Result<(), SetupError> {
        let (low, high) = (
            self.min_teeth.min(self.max_teeth),
            self.max_teeth.max(self.min_teeth),
        );
        if low < 3 || high > MAX_GEAR_TEETH {
            return Err(SetupError::InvalidMesh(format!(
                "tooth range {}..={} is outside 3..={}",
                low, high, MAX_GEAR_TEETH
            )));
        }
        Ok(())
    }
}

/// Build one gear object per grid cell.
///
/// Tooth counts vary from cell to cell so meshes differ in size. Each object's
/// bounding radius is the gear's outer radius.
pub fn gear_grid_scene(config: &SceneConfig) -> Result<Vec<ObjectDescriptor>, SetupError> {
    config.validate()?;
    let placement = config.placement();
    let mut objects = Vec::new();
    objects
        .try_reserve_exact(placement.len())
        .map_err(|_| SetupError::AllocationFailed {
            what: "scene objects",
            bytes: (placement.len() * std::mem::size_of::<ObjectDescriptor>()) as u64,
        })?;

    for (index, position) in placement.positions().enumerate() {
        let hue = index as f32 / placement.len().max(1) as f32;
        let gear = GearMesh::new(config.teeth_for(index), config.inner_radius, config.outer_radius)?
            .with_colors([0.2, 0.2, 0.25, 1.0], [hue, 0.6, 1.0 - hue, 1.0]);
        objects.push(ObjectDescriptor::new(
            gear.build().vertices,
            position,
            gear.outer_radius,
        ));
    }

    log::info!(
        "Built gear grid of {}x{} ({} objects)",
        config.columns,
        config.rows,
        objects.len()
    );
    Ok(objects)
}
