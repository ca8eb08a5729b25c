//! Incremental capture of a hand-drawn trail.

use locomotion_core::Uv;

use crate::trail::{TrailError, WalkingTrail};

/// Points closer than this to the previous accepted point are dropped.
pub const DEFAULT_MIN_SPACING: f64 = 0.05;

#[derive(Clone, Debug)]
pub struct PolylineSketch {
    points: Vec<Uv>,
    min_spacing: f64,
}

impl Default for PolylineSketch {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SPACING)
    }
}

impl PolylineSketch {
    pub fn new(min_spacing: f64) -> Self {
        Self {
            points: Vec::new(),
            min_spacing: min_spacing.max(0.0),
        }
    }

    /// Append a point; returns whether it was kept.
    pub fn push(&mut self, point: Uv) -> bool {
        if let Some(last) = self.points.last() {
            let gap = (point - last).norm();
            // Coincident points would give non-ascending times
            if gap <= self.min_spacing || gap == 0.0 {
                return false;
            }
        }
        self.points.push(point);
        true
    }

    pub fn points(&self) -> &[Uv] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Fit a trail walked through the sketch at constant `speed`.
    pub fn to_trail(&self, speed: f64) -> Result<WalkingTrail, TrailError> {
        WalkingTrail::from_polyline(&self.points, speed)
    }
}
