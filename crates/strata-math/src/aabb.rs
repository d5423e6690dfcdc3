//! Axis-aligned bounding box over integer coordinates.

use serde::{Deserialize, Serialize};

use crate::{Coord, IntPoint3};

/// An axis-aligned 3D bounding box that grows to cover included points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: IntPoint3,
    /// Maximum corner.
    pub max: IntPoint3,
}

impl Aabb3 {
    /// Create an empty (undefined) bounding box.
    pub const fn new() -> Self {
        Self {
            min: IntPoint3::new(Coord::MAX, Coord::MAX, Coord::MAX),
            max: IntPoint3::new(Coord::MIN, Coord::MIN, Coord::MIN),
        }
    }

    /// Whether any point has been included yet.
    pub fn is_defined(&self) -> bool {
        self.min.x <= self.max.x
    }

    /// Grow the box to include `p`.
    pub fn include(&mut self, p: IntPoint3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    /// Grow the box in Z only.
    ///
    /// Has no effect until the box is defined in X and Y.
    pub fn include_z(&mut self, z: Coord) {
        if !self.is_defined() {
            return;
        }
        self.min.z = self.min.z.min(z);
        self.max.z = self.max.z.max(z);
    }

    /// Reset to the empty state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Aabb3 {
    fn default() -> Self {
        Self::new()
    }
}
