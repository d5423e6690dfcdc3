//! Machine state owned by one export job.

use std::collections::HashMap;

use strata_math::{Aabb3, Coord, IntPoint3};

use crate::estimate::FeatureDurations;
use crate::extruder::ExtruderId;

/// Everything the exporter remembers about the machine between commands.
///
/// Values are the last ones actually written, so repeated requests can be
/// elided.
#[derive(Debug, Clone, Default)]
pub struct MachineState {
    /// Build plate position of the nozzle (µm), including any Z-hop.
    pub position: IntPoint3,
    /// Set when the machine may have moved without us knowing (extruder start code).
    pub position_unknown: bool,
    /// Last feedrate (mm/s).
    pub speed: f64,
    /// Last print acceleration (mm/s²).
    pub print_acceleration: Option<f64>,
    /// Last travel acceleration (mm/s²).
    pub travel_acceleration: Option<f64>,
    /// Last XY jerk (mm/s).
    pub jerk: Option<f64>,
    /// Last Z feedrate limit (mm/s).
    pub max_z_feedrate: Option<f64>,
    /// Z of the layer being printed (µm).
    pub current_layer_z: Coord,
    /// Current Z-hop above the layer (µm); zero when not hopped.
    pub z_hop_offset: Coord,
    /// Layer number being printed.
    pub layer_nr: i64,
    /// E value since the last rebase, without flow compensation.
    pub current_e_value: f64,
    /// Flow compensation added to every written E value.
    pub current_e_offset: f64,
    /// E values are deltas (`M83`).
    pub relative_extrusion: bool,
    /// Active extruder.
    pub current_extruder: Option<ExtruderId>,
    /// Last bed temperature (°C).
    pub bed_temperature: Option<f64>,
    /// Initial bed temperature reported in the header (°C).
    pub initial_bed_temperature: f64,
    /// Last speed per fan number (percent).
    pub fan_speeds: HashMap<u32, f64>,
    /// Last build chamber fan speed (percent).
    pub chamber_fan_speed: Option<f64>,
    /// Bounds of every emitted coordinate.
    pub bounding_box: Aabb3,
    /// Print time drained from the estimator.
    pub total_print_time: FeatureDurations,
}

impl MachineState {
    /// State at the start of a job.
    pub fn new(relative_extrusion: bool) -> Self {
        Self {
            relative_extrusion,
            ..Default::default()
        }
    }
}
