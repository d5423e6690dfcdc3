#![warn(missing_docs)]

//! Math types for the strata slicer.
//!
//! Thin wrappers around nalgebra for floating-point geometry in millimetres,
//! plus integer micron coordinates used wherever machine state must not
//! drift over thousands of moves.

mod aabb;
mod int_point;

pub use aabb::Aabb3;
pub use int_point::{IntPoint, IntPoint3};

use nalgebra::Vector2;

/// A point in 2D space (mm).
pub type Point2 = nalgebra::Point2<f64>;

/// A vector in 2D space (mm).
pub type Vec2 = Vector2<f64>;

/// A point in 3D space (mm).
pub type Point3 = nalgebra::Point3<f64>;

/// Integer coordinate in microns.
pub type Coord = i64;

/// Number of integer coordinate units per millimetre.
pub const COORD_PER_MM: f64 = 1000.0;

/// Convert millimetres to integer microns, rounding to the nearest unit.
#[inline]
pub fn mm_to_coord(mm: f64) -> Coord {
    (mm * COORD_PER_MM).round() as Coord
}

/// Convert integer microns to millimetres.
#[inline]
pub fn coord_to_mm(coord: Coord) -> f64 {
    coord as f64 / COORD_PER_MM
}

/// Tolerance constants for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Linear distance tolerance in mm.
    pub linear: f64,
    /// Angular tolerance in radians.
    pub angular: f64,
}

impl Tolerance {
    /// Default slicing tolerances (1e-6 mm linear, 1e-9 rad angular).
    pub const DEFAULT: Self = Self {
        linear: 1e-6,
        angular: 1e-9,
    };

    /// Check if two 2D points are coincident within tolerance.
    pub fn points_equal(&self, a: &Point2, b: &Point2) -> bool {
        (a - b).norm() < self.linear
    }

    /// Check if a scalar distance is effectively zero.
    pub fn is_zero(&self, d: f64) -> bool {
        d.abs() < self.linear
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Classification of the corner formed at `b` by the path `a -> b -> c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    /// Interior angle below 90 degrees.
    Acute,
    /// Exactly 90 degrees, or a degenerate corner with a zero-length leg.
    Right,
    /// Interior angle above 90 degrees.
    Obtuse,
}

/// Classify the corner at `b` by the sign of the dot product of its legs.
pub fn classify_corner(a: &Point2, b: &Point2, c: &Point2) -> Corner {
    let dot = (a - b).dot(&(c - b));
    if dot > 0.0 {
        Corner::Acute
    } else if dot < 0.0 {
        Corner::Obtuse
    } else {
        Corner::Right
    }
}
