//! Integer micron points.

use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::{coord_to_mm, mm_to_coord, Coord, Point2};

/// A 2D point with integer micron coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntPoint {
    /// X coordinate (µm).
    pub x: Coord,
    /// Y coordinate (µm).
    pub y: Coord,
}

impl IntPoint {
    /// Create a point from micron coordinates.
    #[inline]
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    /// Create a point from millimetre coordinates.
    pub fn from_mm(x: f64, y: f64) -> Self {
        Self::new(mm_to_coord(x), mm_to_coord(y))
    }

    /// Lift to 3D at height `z`.
    #[inline]
    pub const fn with_z(self, z: Coord) -> IntPoint3 {
        IntPoint3::new(self.x, self.y, z)
    }

    /// Convert to a floating-point point in millimetres.
    pub fn to_mm(self) -> Point2 {
        Point2::new(coord_to_mm(self.x), coord_to_mm(self.y))
    }
}

impl From<Point2> for IntPoint {
    fn from(p: Point2) -> Self {
        Self::from_mm(p.x, p.y)
    }
}

impl Add for IntPoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for IntPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A 3D point with integer micron coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntPoint3 {
    /// X coordinate (µm).
    pub x: Coord,
    /// Y coordinate (µm).
    pub y: Coord,
    /// Z coordinate (µm).
    pub z: Coord,
}

impl IntPoint3 {
    /// Create a point from micron coordinates.
    #[inline]
    pub const fn new(x: Coord, y: Coord, z: Coord) -> Self {
        Self { x, y, z }
    }

    /// Create a point from millimetre coordinates.
    pub fn from_mm(x: f64, y: f64, z: f64) -> Self {
        Self::new(mm_to_coord(x), mm_to_coord(y), mm_to_coord(z))
    }

    /// Drop the Z coordinate.
    #[inline]
    pub const fn xy(self) -> IntPoint {
        IntPoint::new(self.x, self.y)
    }

    /// Euclidean length of this point taken as a vector, in millimetres.
    ///
    /// Squares are computed in i128 so long diagonal moves cannot overflow.
    pub fn length_mm(self) -> f64 {
        let x = self.x as i128;
        let y = self.y as i128;
        let z = self.z as i128;
        ((x * x + y * y + z * z) as f64).sqrt() / crate::COORD_PER_MM
    }

    /// Distance to `other` in millimetres.
    pub fn distance_mm(self, other: IntPoint3) -> f64 {
        (other - self).length_mm()
    }
}

impl Add for IntPoint3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for IntPoint3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_mm() {
        let a = IntPoint3::new(0, 0, 0);
        let b = IntPoint3::new(3000, 4000, 0);
        assert_relative_eq!(a.distance_mm(b), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_overflow_on_large_coords() {
        let a = IntPoint3::new(-4_000_000_000, 0, 0);
        let b = IntPoint3::new(4_000_000_000, 0, 0);
        assert_relative_eq!(a.distance_mm(b), 8_000_000.0, epsilon = 1e-3);
    }

    #[test]
    fn test_from_mm_round_trip() {
        let p = IntPoint::from_mm(12.3456, -0.5);
        assert_eq!(p, IntPoint::new(12346, -500));
        assert_eq!(p.with_z(200).xy(), p);
    }
}
