//! Per-extruder state table.

use crate::error::{GcodeError, Result};
use crate::printer::ExtruderConfig;
use crate::retraction::RetractionHistory;
use crate::units::ExtrusionUnits;

/// Index of an extruder that exists in an [`ExtruderTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtruderId(usize);

impl ExtruderId {
    /// Position of the extruder in its table.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Job state of one extruder train.
#[derive(Debug, Clone)]
pub struct ExtruderState {
    /// Any command targeted this extruder. Never cleared.
    pub is_used: bool,
    /// The initial prime sequence ran.
    pub is_primed: bool,
    /// E-axis units of this extruder.
    pub units: ExtrusionUnits,
    /// Volume (mm³) folded in at each E rebase.
    pub total_filament_mm3: f64,
    /// Last commanded temperature (°C).
    pub current_temperature: Option<f64>,
    /// Temperature required at the start of the print (°C).
    pub initial_temperature: f64,
    /// The last temperature command waited.
    pub waited_for_temperature: bool,
    /// Filament is withdrawn from the nozzle tip.
    pub is_retracted: bool,
    /// Current retraction depth (E units).
    pub retracted_amount: f64,
    /// Retraction depth at E = 0, after the last rebase (E units).
    pub retracted_amount_at_e_start: f64,
    /// E value the next prime returns to: where the current retraction
    /// began, or the retraction depth after a rebase.
    pub e_amount_at_retraction_start: f64,
    /// Material owed to the next prime (mm³).
    pub prime_volume_debt: f64,
    /// Speed (mm/s) of the next prime.
    pub last_retraction_prime_speed: f64,
    /// Extruded volume at recent retractions.
    pub recent_retraction_volumes: RetractionHistory,
    /// Print cooling fan of this extruder.
    pub fan_number: u32,
}

impl ExtruderState {
    /// Fresh state for an extruder with `config`.
    pub fn new(index: usize, config: &ExtruderConfig, volumetric: bool) -> Self {
        Self {
            is_used: false,
            is_primed: false,
            units: ExtrusionUnits::from_diameter(index, config.filament_diameter, volumetric),
            total_filament_mm3: 0.0,
            current_temperature: None,
            initial_temperature: config.initial_temperature,
            waited_for_temperature: false,
            is_retracted: false,
            retracted_amount: 0.0,
            retracted_amount_at_e_start: 0.0,
            e_amount_at_retraction_start: 0.0,
            prime_volume_debt: 0.0,
            last_retraction_prime_speed: 0.0,
            recent_retraction_volumes: RetractionHistory::default(),
            fan_number: config.fan_number,
        }
    }

    /// Filament cross-section (mm²).
    pub fn filament_area(&self) -> f64 {
        self.units.filament_area
    }

    /// Convert an E amount to mm³.
    pub fn e_to_mm3(&self, e: f64) -> Result<f64> {
        self.units.length_to_volume(e)
    }

    /// Convert mm³ to an E amount.
    pub fn mm3_to_e(&self, mm3: f64) -> Result<f64> {
        self.units.volume_to_length(mm3)
    }

    /// Convert millimetres of filament to an E amount.
    pub fn mm_to_e(&self, mm: f64) -> f64 {
        if self.units.volumetric {
            mm * self.filament_area()
        } else {
            mm
        }
    }

    fn clear_job(&mut self) {
        self.total_filament_mm3 = 0.0;
        self.current_temperature = None;
        self.waited_for_temperature = false;
        self.retracted_amount_at_e_start = self.retracted_amount;
        self.e_amount_at_retraction_start = self.retracted_amount;
        self.recent_retraction_volumes.clear();
    }
}

/// Ordered collection of extruder states.
#[derive(Debug, Clone)]
pub struct ExtruderTable {
    extruders: Vec<ExtruderState>,
}

impl ExtruderTable {
    /// Build one state per configured extruder.
    pub fn new(configs: &[ExtruderConfig], volumetric: bool) -> Self {
        Self {
            extruders: configs
                .iter()
                .enumerate()
                .map(|(index, config)| ExtruderState::new(index, config, volumetric))
                .collect(),
        }
    }

    /// Validate `index`.
    pub fn id(&self, index: usize) -> Result<ExtruderId> {
        if index < self.extruders.len() {
            Ok(ExtruderId(index))
        } else {
            Err(GcodeError::ExtruderOutOfRange {
                index,
                count: self.extruders.len(),
            })
        }
    }

    /// Number of extruders.
    pub fn len(&self) -> usize {
        self.extruders.len()
    }

    /// True if no extruder is configured.
    pub fn is_empty(&self) -> bool {
        self.extruders.is_empty()
    }

    /// State of `id`.
    pub fn get(&self, id: ExtruderId) -> &ExtruderState {
        &self.extruders[id.0]
    }

    /// Mutable state of `id`.
    pub fn get_mut(&mut self, id: ExtruderId) -> &mut ExtruderState {
        &mut self.extruders[id.0]
    }

    /// All extruders in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ExtruderId, &ExtruderState)> {
        self.extruders
            .iter()
            .enumerate()
            .map(|(index, state)| (ExtruderId(index), state))
    }

    /// Extruders that have been used, in index order.
    pub fn used(&self) -> impl Iterator<Item = (ExtruderId, &ExtruderState)> {
        self.iter().filter(|(_, state)| state.is_used)
    }

    /// Forget filament totals, temperatures and retraction history of every extruder.
    pub fn clear_job(&mut self) {
        for state in &mut self.extruders {
            state.clear_job();
        }
    }
}
