//! Conversion between E-axis units and filament volume.
//!
//! The E axis counts either millimetres of filament (linear dialects) or cubic
//! millimetres of material (volumetric dialects). Volumes are always mm³.

use std::f64::consts::PI;

use crate::error::{GcodeError, Result};

/// Filament cross-section and E-axis mode of one extruder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtrusionUnits {
    /// Extruder index, for error reporting.
    pub extruder: usize,
    /// Filament cross-sectional area (mm²).
    pub filament_area: f64,
    /// Whether E values are volumes.
    pub volumetric: bool,
}

impl ExtrusionUnits {
    /// Units for a round filament of `diameter` mm.
    pub fn from_diameter(extruder: usize, diameter: f64, volumetric: bool) -> Self {
        Self {
            extruder,
            filament_area: filament_area(diameter),
            volumetric,
        }
    }

    /// Convert an E-axis amount to a volume in mm³.
    pub fn length_to_volume(&self, e: f64) -> Result<f64> {
        if self.volumetric {
            return Ok(e);
        }
        if e == 0.0 {
            return Ok(0.0);
        }
        self.check_area()?;
        Ok(e * self.filament_area)
    }

    /// Convert a volume in mm³ to an E-axis amount.
    pub fn volume_to_length(&self, mm3: f64) -> Result<f64> {
        if self.volumetric {
            return Ok(mm3);
        }
        if mm3 == 0.0 {
            return Ok(0.0);
        }
        self.check_area()?;
        Ok(mm3 / self.filament_area)
    }

    /// Convert an E-axis amount to millimetres of filament fed.
    pub fn filament_length(&self, e: f64) -> Result<f64> {
        if !self.volumetric || e == 0.0 {
            return Ok(e);
        }
        self.check_area()?;
        Ok(e / self.filament_area)
    }

    fn check_area(&self) -> Result<()> {
        if self.filament_area > 0.0 && self.filament_area.is_finite() {
            Ok(())
        } else {
            Err(GcodeError::InvalidFilamentArea {
                extruder: self.extruder,
                area: self.filament_area,
            })
        }
    }
}

/// Cross-sectional area (mm²) of round filament with the given diameter.
pub fn filament_area(diameter: f64) -> f64 {
    let radius = diameter / 2.0;
    PI * radius * radius
}
