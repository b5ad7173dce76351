//! Viewport slots
//!
//! Everything drawn is drawn *to* a viewport: a rectangle of some output
//! window with its own camera and its own frame-time history. A fixed set
//! of slots is available:
//! - Up to [`MAX_VIEWPORTS`] live at once, ids are slot indices
//! - Each keeps a ring of frame readings for an averaged FPS figure
//! - Destroying a slot frees it for the next create

use log::warn;

use std::time::Instant;

use crate::render::camera::CameraId;

/// Hard cap on simultaneous viewports.
pub const MAX_VIEWPORTS: usize = 4;
/// Number of frame-time readings averaged for the FPS counter.
pub const FPS_READINGS: usize = 64;

/// Handle to a viewport; the value is the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportId(pub usize);

pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub camera: Option<CameraId>,
    frame_readings: [f64; FPS_READINGS],
    frame_index: usize,
    old_time: Option<Instant>,
}

impl Viewport {
    fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            camera: None,
            frame_readings: [0.0; FPS_READINGS],
            frame_index: 0,
            old_time: None,
        }
    }

    /// Records a frame boundary. The reading ring only picks up a value
    /// once a previous boundary exists to measure against.
    pub fn tick(&mut self, now: Instant) {
        if let Some(old) = self.old_time {
            let delta = now.duration_since(old).as_secs_f64();
            if delta > 0.0 {
                self.frame_readings[self.frame_index] = 1.0 / delta;
                self.frame_index += 1;
                if self.frame_index >= FPS_READINGS {
                    self.frame_index = 0;
                }
            }
        }
        self.old_time = Some(now);
    }

    /// Frame rate averaged over the full reading ring.
    pub fn average_fps(&self) -> u32 {
        let total: f64 = self.frame_readings.iter().sum();
        (total / FPS_READINGS as f64) as u32
    }

    #[inline]
    pub fn rect(&self) -> (i32, i32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// The fixed array of viewport slots.
pub struct ViewportSet {
    slots: [Option<Viewport>; MAX_VIEWPORTS],
}

impl ViewportSet {
    pub fn new() -> Self {
        Self {
            slots: [None, None, None, None],
        }
    }

    /// Claims the first free slot, or warns and returns `None` when all
    /// slots are taken.
    pub fn create(&mut self, x: i32, y: i32, width: u32, height: u32) -> Option<ViewportId> {
        let Some(slot) = self.slots.iter().position(|slot| slot.is_none()) else {
            warn!("hit the viewport limit ({MAX_VIEWPORTS})");
            return None;
        };
        self.slots[slot] = Some(Viewport::new(x, y, width, height));
        Some(ViewportId(slot))
    }

    pub fn destroy(&mut self, id: ViewportId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = None;
        }
    }

    pub fn get(&self, id: ViewportId) -> Option<&Viewport> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: ViewportId) -> Option<&mut Viewport> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    pub fn set_camera(&mut self, id: ViewportId, camera: Option<CameraId>) {
        if let Some(viewport) = self.get_mut(id) {
            viewport.camera = camera;
        }
    }

    pub fn set_size(&mut self, id: ViewportId, width: u32, height: u32) {
        if let Some(viewport) = self.get_mut(id) {
            viewport.width = width;
            viewport.height = height;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ViewportSet {
    fn default() -> Self {
        Self::new()
    }
}
