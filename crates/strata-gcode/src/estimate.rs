//! Print time estimation.
//!
//! The exporter forwards every committed move to a [`TimeEstimator`] and later
//! drains the accumulated durations into per-feature totals.

use std::ops::{AddAssign, Index};

use strata_slicer::PrintFeatureType;

/// Seconds spent per feature.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureDurations([f64; PrintFeatureType::COUNT]);

impl FeatureDurations {
    /// Add `seconds` to `feature`.
    pub fn add(&mut self, feature: PrintFeatureType, seconds: f64) {
        self.0[feature.index()] += seconds;
    }

    /// Sum over all features.
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Non-zero entries.
    pub fn iter(&self) -> impl Iterator<Item = (PrintFeatureType, f64)> + '_ {
        PrintFeatureType::ALL
            .into_iter()
            .map(|feature| (feature, self.0[feature.index()]))
            .filter(|(_, seconds)| *seconds > 0.0)
    }
}

impl Index<PrintFeatureType> for FeatureDurations {
    type Output = f64;

    fn index(&self, feature: PrintFeatureType) -> &f64 {
        &self.0[feature.index()]
    }
}

impl AddAssign for FeatureDurations {
    fn add_assign(&mut self, other: Self) {
        for (total, seconds) in self.0.iter_mut().zip(other.0) {
            *total += seconds;
        }
    }
}

/// Machine position as seen by the estimator (mm, E in E units).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EstimatePosition {
    /// X (mm).
    pub x: f64,
    /// Y (mm).
    pub y: f64,
    /// Z (mm).
    pub z: f64,
    /// E axis.
    pub e: f64,
}

impl EstimatePosition {
    /// New position.
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x, y, z, e }
    }
}

/// Accumulates move durations per feature.
pub trait TimeEstimator: Send {
    /// Record a move to `target` at `speed` mm/s.
    fn plan(&mut self, target: EstimatePosition, speed: f64, feature: PrintFeatureType);

    /// Add a fixed duration (dwell, heating).
    fn add_time(&mut self, seconds: f64);

    /// Acceleration (mm/s²) for following moves.
    fn set_acceleration(&mut self, acceleration: f64);

    /// XY jerk (mm/s) for following moves.
    fn set_max_xy_jerk(&mut self, jerk: f64);

    /// Z speed limit (mm/s) for following moves.
    fn set_max_z_feedrate(&mut self, feedrate: f64);

    /// Durations of the moves planned since the last reset.
    fn calculate(&mut self) -> FeatureDurations;

    /// Forget planned moves, keeping the position and limits.
    fn reset(&mut self);
}

/// Trapezoid-profile estimator.
///
/// Each move accelerates from the jerk speed to its feedrate and back. Moves
/// too short to reach the feedrate follow a triangle profile.
#[derive(Debug, Clone)]
pub struct TrapezoidEstimator {
    position: EstimatePosition,
    acceleration: f64,
    max_xy_jerk: f64,
    max_z_feedrate: f64,
    planned: FeatureDurations,
}

impl Default for TrapezoidEstimator {
    fn default() -> Self {
        Self {
            position: EstimatePosition::default(),
            acceleration: 3000.0,
            max_xy_jerk: 20.0,
            max_z_feedrate: 0.0,
            planned: FeatureDurations::default(),
        }
    }
}

impl TrapezoidEstimator {
    /// Estimator starting at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    fn move_time(&self, distance: f64, speed: f64) -> f64 {
        let cruise = (speed - self.max_xy_jerk).max(0.0);
        if cruise == 0.0 || self.acceleration <= 0.0 {
            return distance / speed;
        }
        let ramp_distance = cruise * cruise / self.acceleration;
        if distance > ramp_distance {
            distance / speed + cruise * cruise / (speed * self.acceleration)
        } else {
            2.0 * (distance / self.acceleration).sqrt()
        }
    }
}

impl TimeEstimator for TrapezoidEstimator {
    fn plan(&mut self, target: EstimatePosition, speed: f64, feature: PrintFeatureType) {
        let dx = target.x - self.position.x;
        let dy = target.y - self.position.y;
        let dz = target.z - self.position.z;
        let de = target.e - self.position.e;
        self.position = target;

        let mut speed = speed;
        let xy = (dx * dx + dy * dy).sqrt();
        if self.max_z_feedrate > 0.0 && dz != 0.0 {
            let distance = (xy * xy + dz * dz).sqrt();
            let z_speed = speed * dz.abs() / distance;
            if z_speed > self.max_z_feedrate {
                speed *= self.max_z_feedrate / z_speed;
            }
        }
        if speed <= 0.0 {
            return;
        }

        let distance = (xy * xy + dz * dz).sqrt();
        let distance = if distance > 0.0 { distance } else { de.abs() };
        if distance == 0.0 {
            return;
        }
        let seconds = self.move_time(distance, speed);
        self.planned.add(feature, seconds);
    }

    fn add_time(&mut self, seconds: f64) {
        if seconds > 0.0 {
            self.planned.add(PrintFeatureType::NoneType, seconds);
        }
    }

    fn set_acceleration(&mut self, acceleration: f64) {
        self.acceleration = acceleration;
    }

    fn set_max_xy_jerk(&mut self, jerk: f64) {
        self.max_xy_jerk = jerk;
    }

    fn set_max_z_feedrate(&mut self, feedrate: f64) {
        self.max_z_feedrate = feedrate;
    }

    fn calculate(&mut self) -> FeatureDurations {
        self.planned
    }

    fn reset(&mut self) {
        self.planned = FeatureDurations::default();
    }
}
