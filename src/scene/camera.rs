//! Camera system
//!
//! Cameras produce the [`FrameState`] uploaded at the start of every frame.

use glam::Vec2;

use crate::backend::types::FrameState;

/// Size of the color target in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Per-axis scale that keeps world units square on screen.
    ///
    /// The wider axis is compressed; an empty viewport yields no correction.
    pub fn aspect_scale(&self) -> Vec2 {
        if self.width == 0 || self.height == 0 {
            return Vec2::ONE;
        }
        let (w, h) = (self.width as f32, self.height as f32);
        if self.width > self.height {
            Vec2::new(h / w, 1.0)
        } else {
            Vec2::new(1.0, w / h)
        }
    }
}

/// Source of the per-frame state
pub trait FrameStateProducer {
    fn frame_state(&mut self, frame_index: u64, viewport: Viewport) -> FrameState;
}

/// Camera with a fixed translation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StaticCamera {
    pub translation: Vec2,
}

impl StaticCamera {
    pub fn new(translation: Vec2) -> Self {
        Self { translation }
    }
}

impl FrameStateProducer for StaticCamera {
    fn frame_state(&mut self, _frame_index: u64, viewport: Viewport) -> FrameState {
        FrameState::new(self.translation, viewport.aspect_scale())
    }
}

/// Camera panning back and forth along the x axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollingCamera {
    /// Largest horizontal offset, in world units
    pub amplitude: f32,
    /// Phase advance per frame, in radians
    pub speed: f32,
    pub vertical_offset: f32,
}

impl Default for ScrollingCamera {
    fn default() -> Self {
        Self {
            amplitude: 8.0,
            speed: 0.05,
            vertical_offset: 0.0,
        }
    }
}

impl ScrollingCamera {
    pub fn new(amplitude: f32, speed: f32) -> Self {
        Self {
            amplitude,
            speed,
            vertical_offset: 0.0,
        }
    }

    pub fn translation_at(&self, frame_index: u64) -> Vec2 {
        let phase = (frame_index as f64 * self.speed as f64).sin() as f32;
        Vec2::new(self.amplitude * phase, self.vertical_offset)
    }
}

impl FrameStateProducer for ScrollingCamera {
    fn frame_state(&mut self, frame_index: u64, viewport: Viewport) -> FrameState {
        FrameState::new(self.translation_at(frame_index), viewport.aspect_scale())
    }
}
