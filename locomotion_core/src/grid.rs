//! Cell lookup over the floor and per-cell destination tables.

use crate::types::{uv, CellDestination, CellIndex, Uv};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Destinations reachable from each cell, precomputed by the floor model.
pub type EscapeRoutes = HashMap<CellIndex, Vec<CellDestination>>;

/// Maps locations to floor cells and back.
pub trait CellGrid {
    /// Cell containing `location`, or `None` off the floor.
    fn cell_at(&self, location: &Uv) -> Option<CellIndex>;
    /// Centre of the cell at `index`, or `None` if it does not exist.
    fn cell_center(&self, index: &CellIndex) -> Option<Uv>;
}

/// Axis-aligned grid of square cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniformCellGrid {
    /// Lower-left corner of cell (0, 0)
    pub origin: Uv,
    pub cell_size: f64,
    pub columns: i32,
    pub rows: i32,
}

impl UniformCellGrid {
    pub fn new(origin: Uv, cell_size: f64, columns: i32, rows: i32) -> Self {
        Self {
            origin,
            cell_size,
            columns,
            rows,
        }
    }

    fn contains(&self, index: &CellIndex) -> bool {
        (0..self.columns).contains(&index.i) && (0..self.rows).contains(&index.j)
    }
}

impl CellGrid for UniformCellGrid {
    fn cell_at(&self, location: &Uv) -> Option<CellIndex> {
        if self.cell_size <= 0.0 {
            return None;
        }
        let rel = location - self.origin;
        let i = (rel.x / self.cell_size).floor();
        let j = (rel.y / self.cell_size).floor();
        if !i.is_finite() || !j.is_finite() {
            return None;
        }
        let index = CellIndex::new(i as i32, j as i32);
        self.contains(&index).then_some(index)
    }

    fn cell_center(&self, index: &CellIndex) -> Option<Uv> {
        self.contains(index).then(|| {
            self.origin
                + uv(
                    (index.i as f64 + 0.5) * self.cell_size,
                    (index.j as f64 + 0.5) * self.cell_size,
                )
        })
    }
}
