//! Printer profile definitions.

use serde::{Deserialize, Serialize};

use crate::error::{GcodeError, Result};
use crate::flavor::GcodeFlavor;
use crate::retraction::RetractionConfig;

/// Settings of one extruder train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtruderConfig {
    /// Filament diameter (mm).
    pub filament_diameter: f64,
    /// Nozzle diameter (mm).
    pub nozzle_diameter: f64,
    /// Nozzle name reported in the Griffin header.
    pub nozzle_name: String,
    /// Print cooling fan driven by this extruder.
    pub fan_number: u32,
    /// Nozzle offset from the print head reference (mm).
    pub offset_x: f64,
    /// Nozzle offset from the print head reference (mm).
    pub offset_y: f64,
    /// Temperature required at the start of the print (°C).
    pub initial_temperature: f64,
    /// Temperature held while another extruder prints (°C).
    pub standby_temperature: f64,
    /// Material GUID reported in the header.
    pub material_guid: String,
    /// Whether the nozzle temperature is controlled by the slicer.
    pub nozzle_temp_enabled: bool,
    /// Lay a prime blob before the first use.
    pub prime_blob_enable: bool,
    /// Prime position (mm).
    pub prime_pos_x: f64,
    /// Prime position (mm).
    pub prime_pos_y: f64,
    /// Code emitted when this extruder becomes active.
    pub start_code: String,
    /// Code emitted when this extruder is switched away from.
    pub end_code: String,
    /// Code that cuts the reinforcement fiber fed through this extruder.
    pub fiber_cut_code: String,
    /// Code that feeds the fiber back to the nozzle tip after a cut.
    pub fiber_prime_code: String,
}

impl Default for ExtruderConfig {
    fn default() -> Self {
        Self {
            filament_diameter: 1.75,
            nozzle_diameter: 0.4,
            nozzle_name: "0.4 mm".into(),
            fan_number: 0,
            offset_x: 0.0,
            offset_y: 0.0,
            initial_temperature: 210.0,
            standby_temperature: 175.0,
            material_guid: String::new(),
            nozzle_temp_enabled: true,
            prime_blob_enable: false,
            prime_pos_x: 0.0,
            prime_pos_y: 0.0,
            start_code: String::new(),
            end_code: String::new(),
            fiber_cut_code: String::new(),
            fiber_prime_code: String::new(),
        }
    }
}

/// Flow-rate dependent E offset.
///
/// The offset is `speed × flow × factor` clamped to `[0, max_extrusion_offset]`
/// E units. A zero maximum disables compensation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowCompensation {
    /// Largest allowed offset (E units).
    pub max_extrusion_offset: f64,
    /// Offset per unit of volumetric flow.
    pub extrusion_offset_factor: f64,
}

impl Default for FlowCompensation {
    fn default() -> Self {
        Self {
            max_extrusion_offset: 0.0,
            extrusion_offset_factor: 1.0,
        }
    }
}

impl FlowCompensation {
    /// Whether compensation changes any E value.
    pub fn is_enabled(&self) -> bool {
        self.max_extrusion_offset > 0.0 && self.extrusion_offset_factor != 0.0
    }

    /// Offset for a move at `speed` mm/s with `flow` mm³/mm.
    pub fn offset(&self, speed: f64, flow: f64) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        (speed * flow * self.extrusion_offset_factor).clamp(0.0, self.max_extrusion_offset)
    }
}

/// Printer profile with machine-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterProfile {
    /// Profile name.
    pub name: String,
    /// G-code flavor.
    pub flavor: GcodeFlavor,
    /// Build plate type reported in the Griffin header.
    pub buildplate_type: String,
    /// Is the bed heated?
    pub heated_bed: bool,
    /// Extruder trains, indexed by extruder number.
    pub extruders: Vec<ExtruderConfig>,
    /// Emit relative E values (`M83`).
    pub relative_extrusion: bool,
    /// Use `G10`/`G11` instead of E moves for retraction.
    pub firmware_retraction: bool,
    /// Subtract the active nozzle offset from emitted X/Y.
    pub offset_coords_by_extruder: bool,
    /// Maximum feedrate Z (mm/s).
    pub max_feedrate_z: f64,
    /// Default acceleration (mm/s²).
    pub max_acceleration: f64,
    /// Default XY jerk (mm/s).
    pub max_xy_jerk: f64,
    /// Fan number (`P` parameter) of the build chamber fan, if the machine has one.
    pub chamber_fan: Option<u32>,
    /// Retraction between moves.
    pub retraction: RetractionConfig,
    /// Retraction before an extruder switch.
    pub switch_retraction: RetractionConfig,
    /// Flow-rate compensation.
    pub flow_compensation: FlowCompensation,
}

impl Default for PrinterProfile {
    fn default() -> Self {
        Self::generic()
    }
}

impl PrinterProfile {
    fn base(name: &str, flavor: GcodeFlavor) -> Self {
        Self {
            name: name.into(),
            flavor,
            buildplate_type: "glass".into(),
            heated_bed: true,
            extruders: vec![ExtruderConfig::default()],
            relative_extrusion: false,
            firmware_retraction: false,
            offset_coords_by_extruder: true,
            max_feedrate_z: 10.0,
            max_acceleration: 3000.0,
            max_xy_jerk: 20.0,
            chamber_fan: None,
            retraction: RetractionConfig::default(),
            switch_retraction: RetractionConfig::extruder_switch(),
            flow_compensation: FlowCompensation::default(),
        }
    }

    /// Generic printer profile.
    pub fn generic() -> Self {
        Self::base("Generic", GcodeFlavor::Marlin)
    }

    /// Creality Ender 3 profile.
    pub fn ender3() -> Self {
        Self {
            max_feedrate_z: 5.0,
            max_acceleration: 500.0,
            ..Self::base("Creality Ender 3", GcodeFlavor::Marlin)
        }
    }

    /// Prusa MK4 profile.
    pub fn prusa_mk4() -> Self {
        Self {
            max_feedrate_z: 12.0,
            max_acceleration: 4000.0,
            max_xy_jerk: 8.0,
            relative_extrusion: true,
            retraction: RetractionConfig {
                distance: 0.8,
                speed: 35.0,
                prime_speed: 35.0,
                ..Default::default()
            },
            ..Self::base("Prusa MK4", GcodeFlavor::Marlin)
        }
    }

    /// Voron 2.4 profile (RepRap-style firmware retraction).
    pub fn voron_24() -> Self {
        Self {
            max_feedrate_z: 15.0,
            max_acceleration: 5000.0,
            firmware_retraction: true,
            chamber_fan: Some(2),
            retraction: RetractionConfig {
                distance: 0.5,
                speed: 30.0,
                prime_speed: 30.0,
                ..Default::default()
            },
            ..Self::base("Voron 2.4 (350mm)", GcodeFlavor::RepRap)
        }
    }

    /// Ultimaker S5 profile (dual extrusion, Griffin header).
    pub fn ultimaker_s5() -> Self {
        let extruder = |offset_x: f64, prime_x: f64| ExtruderConfig {
            filament_diameter: 2.85,
            nozzle_name: "AA 0.4".into(),
            offset_x,
            prime_blob_enable: true,
            prime_pos_x: prime_x,
            prime_pos_y: 6.0,
            ..Default::default()
        };
        Self {
            buildplate_type: "glass".into(),
            extruders: vec![extruder(0.0, 330.0), extruder(22.0, 300.0)],
            max_feedrate_z: 40.0,
            retraction: RetractionConfig {
                distance: 6.5,
                speed: 25.0,
                prime_speed: 25.0,
                ..Default::default()
            },
            ..Self::base("Ultimaker S5", GcodeFlavor::Griffin)
        }
    }

    /// MakerBot Replicator profile.
    pub fn makerbot_replicator() -> Self {
        Self {
            retraction: RetractionConfig {
                distance: 1.0,
                speed: 25.0,
                prime_speed: 25.0,
                ..Default::default()
            },
            ..Self::base("MakerBot Replicator", GcodeFlavor::Makerbot)
        }
    }

    /// Bits From Bytes 3000 profile.
    pub fn bfb_3000() -> Self {
        Self {
            heated_bed: false,
            extruders: vec![ExtruderConfig {
                filament_diameter: 3.0,
                nozzle_diameter: 0.5,
                ..Default::default()
            }],
            ..Self::base("BFB 3000", GcodeFlavor::Bfb)
        }
    }

    /// Get all built-in profiles.
    pub fn all_profiles() -> Vec<Self> {
        vec![
            Self::generic(),
            Self::ender3(),
            Self::prusa_mk4(),
            Self::voron_24(),
            Self::ultimaker_s5(),
            Self::makerbot_replicator(),
            Self::bfb_3000(),
        ]
    }

    /// Load a profile from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check the profile for configuration faults.
    pub fn validate(&self) -> Result<()> {
        if self.extruders.is_empty() {
            return Err(GcodeError::InvalidSettings(
                "at least one extruder is required".into(),
            ));
        }
        let volumetric = self.flavor.is_volumetric();
        for (index, extruder) in self.extruders.iter().enumerate() {
            let diameter = extruder.filament_diameter;
            if !volumetric && !(diameter.is_finite() && diameter > 0.0) {
                return Err(GcodeError::InvalidFilamentArea {
                    extruder: index,
                    area: crate::units::filament_area(diameter),
                });
            }
            if !(extruder.nozzle_diameter.is_finite() && extruder.nozzle_diameter > 0.0) {
                return Err(GcodeError::InvalidSettings(format!(
                    "extruder {index} nozzle diameter must be positive"
                )));
            }
        }
        if self.max_feedrate_z <= 0.0 {
            return Err(GcodeError::InvalidSettings(
                "maximum Z feedrate must be positive".into(),
            ));
        }
        if self.flow_compensation.max_extrusion_offset < 0.0 {
            return Err(GcodeError::InvalidSettings(
                "max extrusion offset must not be negative".into(),
            ));
        }
        self.retraction.validate()?;
        self.switch_retraction.validate()?;
        Ok(())
    }

    /// Does the firmware perform retractions (`G10`/`G11`)?
    pub fn uses_firmware_retraction(&self) -> bool {
        self.flavor.requires_firmware_retraction()
            || (self.firmware_retraction && !self.flavor.is_batching())
    }
}
