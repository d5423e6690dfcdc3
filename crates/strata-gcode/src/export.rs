//! The toolpath emission state machine.
//!
//! [`GcodeExport`] owns the machine state of one job and turns travel,
//! extrusion, retraction and machine-setting requests into dialect text. It
//! elides commands whose value is already in effect and tracks filament use
//! per extruder across E-axis rebases.

use std::io::Write;

use strata_math::{coord_to_mm, mm_to_coord, Aabb3, Coord, IntPoint, IntPoint3};
use strata_slicer::PrintFeatureType;
use tracing::{debug, info, warn};

use crate::error::{GcodeError, Result};
use crate::estimate::{EstimatePosition, FeatureDurations, TimeEstimator, TrapezoidEstimator};
use crate::extruder::{ExtruderId, ExtruderState, ExtruderTable};
use crate::flavor::GcodeFlavor;
use crate::formatter::{
    self, fmt_decimal, GcodeFormatter, MoveCommand, MoveKind, RetractCommand, TemperatureCommand,
    UnretractCommand,
};
use crate::printer::{FlowCompensation, PrinterProfile};
use crate::retraction::RetractionConfig;
use crate::state::MachineState;

/// Extruded volume (mm³) after which the E axis is rebased on the next prime.
pub const E_REBASE_VOLUME: f64 = 10_000.0;

/// Speed the estimator assumes for firmware retractions (mm/s).
const FIRMWARE_RETRACT_SPEED: f64 = 25.0;

/// Smallest retraction depth change (E units) worth a command.
const RETRACT_EPSILON: f64 = 1e-6;

/// G-code writer for one print job.
///
/// All commands go through one exporter in program order. Output is written
/// to `W` as it is produced; batching dialects hold back move lines until the
/// next non-move command, [`flush`](Self::flush) or [`finalize`](Self::finalize).
pub struct GcodeExport<W: Write> {
    out: W,
    profile: PrinterProfile,
    formatter: Box<dyn GcodeFormatter>,
    estimator: Box<dyn TimeEstimator>,
    extruders: ExtruderTable,
    state: MachineState,
}

impl<W: Write> GcodeExport<W> {
    /// Create an exporter for `profile` writing to `out`.
    ///
    /// The profile is validated up front; configuration faults are returned
    /// before anything is written.
    pub fn new(out: W, profile: PrinterProfile) -> Result<Self> {
        profile.validate()?;
        let formatter = formatter::for_flavor(profile.flavor, profile.uses_firmware_retraction());
        let mut estimator = TrapezoidEstimator::new();
        estimator.set_acceleration(profile.max_acceleration);
        estimator.set_max_xy_jerk(profile.max_xy_jerk);
        estimator.set_max_z_feedrate(profile.max_feedrate_z);
        let extruders = ExtruderTable::new(&profile.extruders, profile.flavor.is_volumetric());
        let state = MachineState::new(profile.relative_extrusion);
        Ok(Self {
            out,
            profile,
            formatter,
            estimator: Box::new(estimator),
            extruders,
            state,
        })
    }

    /// Replace the time estimator.
    pub fn with_estimator(mut self, estimator: Box<dyn TimeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Printer profile of this job.
    pub fn profile(&self) -> &PrinterProfile {
        &self.profile
    }

    /// Dialect being written.
    pub fn flavor(&self) -> GcodeFlavor {
        self.formatter.flavor()
    }

    /// Machine state.
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// Extruder table.
    pub fn extruders(&self) -> &ExtruderTable {
        &self.extruders
    }

    /// State of extruder `index`.
    pub fn extruder(&self, index: usize) -> Result<&ExtruderState> {
        let id = self.extruders.id(index)?;
        Ok(self.extruders.get(id))
    }

    /// Active extruder index.
    pub fn current_extruder(&self) -> Option<usize> {
        self.state.current_extruder.map(ExtruderId::index)
    }

    /// Nozzle position on the build plate (µm).
    pub fn position(&self) -> IntPoint3 {
        self.state.position
    }

    /// E value since the last rebase.
    pub fn current_e_value(&self) -> f64 {
        self.state.current_e_value
    }

    /// Whether the active extruder is retracted.
    pub fn is_retracted(&self) -> bool {
        self.state
            .current_extruder
            .is_some_and(|id| self.extruders.get(id).is_retracted)
    }

    /// Bounds of every emitted coordinate.
    pub fn bounding_box(&self) -> Aabb3 {
        self.state.bounding_box
    }

    /// The output sink.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Consume the exporter and return the sink.
    ///
    /// Batched moves that were never flushed are lost.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn active(&self) -> Result<ExtruderId> {
        self.state
            .current_extruder
            .ok_or(GcodeError::ExtruderNotStarted)
    }

    fn write_raw(&mut self, text: &str) -> Result<()> {
        if !text.is_empty() {
            self.out.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    /// Write a non-move line, flushing batched moves first.
    fn write_line(&mut self, text: &str) -> Result<()> {
        let pending = self.formatter.flush_batch();
        self.write_raw(&pending)?;
        self.write_raw(text)
    }

    /// Write batched moves and flush the sink.
    pub fn flush(&mut self) -> Result<()> {
        let pending = self.formatter.flush_batch();
        self.write_raw(&pending)?;
        self.out.flush()?;
        Ok(())
    }

    // ---- comments and raw code -------------------------------------------

    /// `;<text>`
    pub fn write_comment(&mut self, text: &str) -> Result<()> {
        self.write_line(&format!(";{text}\n"))
    }

    /// `;TYPE:<feature>` for features that have an annotation.
    pub fn write_type_comment(&mut self, feature: PrintFeatureType) -> Result<()> {
        match feature.type_comment() {
            Some(name) => self.write_line(&format!(";TYPE:{name}\n")),
            None => Ok(()),
        }
    }

    /// `;LAYER:<n>`; the next move writes every field.
    pub fn write_layer_comment(&mut self, layer_nr: i64) -> Result<()> {
        self.state.layer_nr = layer_nr;
        self.formatter.invalidate();
        self.write_line(&format!(";LAYER:{layer_nr}\n"))
    }

    /// `;LAYER_COUNT:<n>`
    pub fn write_layer_count_comment(&mut self, layer_count: usize) -> Result<()> {
        self.write_line(&format!(";LAYER_COUNT:{layer_count}\n"))
    }

    /// `;TIME_ELAPSED:<seconds>`
    pub fn write_time_comment(&mut self, seconds: f64) -> Result<()> {
        self.write_line(&format!(";TIME_ELAPSED:{}\n", fmt_decimal(seconds, 6)))
    }

    /// Write a raw code snippet.
    pub fn write_code(&mut self, code: &str) -> Result<()> {
        if code.is_empty() {
            return Ok(());
        }
        if code.ends_with('\n') {
            self.write_line(code)
        } else {
            self.write_line(&format!("{code}\n"))
        }
    }

    /// Write extruder start/end code in absolute extrusion mode.
    fn write_extruder_code(&mut self, code: &str) -> Result<()> {
        if code.is_empty() {
            return Ok(());
        }
        let relative = self.state.relative_extrusion;
        if relative {
            self.write_line("M82\n")?;
        }
        self.write_code(code)?;
        if relative {
            self.write_line("M83\n")?;
        }
        Ok(())
    }

    /// Switch between relative (`M83`) and absolute (`M82`) E values.
    pub fn write_extrusion_mode(&mut self, relative: bool) -> Result<()> {
        self.state.relative_extrusion = relative;
        self.write_line(if relative { "M83\n" } else { "M82\n" })
    }

    /// Dwell for `seconds` (`G4 P<ms>`).
    pub fn write_delay(&mut self, seconds: f64) -> Result<()> {
        self.write_line(&format!("G4 P{}\n", fmt_decimal(seconds * 1000.0, 0)))?;
        self.estimator.add_time(seconds);
        Ok(())
    }

    // ---- layer and job settings -------------------------------------------

    /// Z of the layer being printed (µm).
    pub fn set_layer_z(&mut self, z: Coord) {
        self.state.current_layer_z = z;
    }

    /// Layer number being printed.
    pub fn set_layer_nr(&mut self, layer_nr: i64) {
        self.state.layer_nr = layer_nr;
    }

    /// Replace the flow-rate compensation settings.
    pub fn set_flow_compensation(&mut self, compensation: FlowCompensation) {
        self.profile.flow_compensation = compensation;
    }

    /// Set the temperature extruder `extruder` must have at the start.
    ///
    /// Dialects whose firmware preheats from the header treat it as already
    /// commanded.
    pub fn set_initial_temperature(&mut self, extruder: usize, temperature: f64) -> Result<()> {
        let id = self.extruders.id(extruder)?;
        let preheats = self.formatter.firmware_preheats();
        let state = self.extruders.get_mut(id);
        state.initial_temperature = temperature;
        if preheats {
            state.current_temperature = Some(temperature);
        }
        Ok(())
    }

    /// Initial temperatures: print temperature for `start_extruder`, standby for the others.
    pub fn set_initial_temperatures(&mut self, start_extruder: usize) -> Result<()> {
        self.extruders.id(start_extruder)?;
        let temperatures: Vec<f64> = self
            .profile
            .extruders
            .iter()
            .enumerate()
            .map(|(index, config)| {
                if index == start_extruder {
                    config.initial_temperature
                } else {
                    config.standby_temperature
                }
            })
            .collect();
        for (index, temperature) in temperatures.into_iter().enumerate() {
            self.set_initial_temperature(index, temperature)?;
        }
        Ok(())
    }

    /// Bed temperature reported in the header.
    pub fn set_initial_bed_temperature(&mut self, temperature: f64) {
        self.state.initial_bed_temperature = temperature;
        if self.formatter.firmware_preheats() {
            self.state.bed_temperature = Some(temperature);
        }
    }

    // ---- motion ------------------------------------------------------------

    fn gcode_position(&self, p: IntPoint3) -> IntPoint3 {
        match self.state.current_extruder {
            Some(id) if self.profile.offset_coords_by_extruder => {
                let config = &self.profile.extruders[id.index()];
                IntPoint3::new(
                    p.x - mm_to_coord(config.offset_x),
                    p.y - mm_to_coord(config.offset_y),
                    p.z,
                )
            }
            _ => p,
        }
    }

    fn travel_feature(&self) -> PrintFeatureType {
        if self.is_retracted() {
            PrintFeatureType::MoveRetraction
        } else {
            PrintFeatureType::MoveCombing
        }
    }

    fn plan(&mut self, speed: f64, feature: PrintFeatureType) {
        let p = self.gcode_position(self.state.position);
        let target = EstimatePosition::new(
            coord_to_mm(p.x),
            coord_to_mm(p.y),
            coord_to_mm(p.z),
            self.state.current_e_value,
        );
        self.estimator.plan(target, speed, feature);
    }

    fn commit_move(
        &mut self,
        kind: MoveKind,
        target: IntPoint3,
        speed: f64,
        e: Option<f64>,
        mm3_per_mm: f64,
        feature: PrintFeatureType,
    ) -> Result<()> {
        let position = self.gcode_position(target);
        let cmd = MoveCommand {
            kind,
            position,
            speed,
            e,
            extruder: self.current_extruder().unwrap_or(0),
            mm3_per_mm,
        };
        let text = self.formatter.format_move(&cmd);
        self.write_raw(&text)?;
        self.state.position = target;
        self.state.position_unknown = false;
        self.state.speed = speed;
        self.state.bounding_box.include(position);
        self.plan(speed, feature);
        Ok(())
    }

    /// Travel to `p` without extruding.
    ///
    /// An active Z-hop is kept: the move ends `z_hop_offset` above `p.z`.
    pub fn travel(&mut self, p: IntPoint3, speed: f64) -> Result<()> {
        let target = IntPoint3::new(p.x, p.y, p.z + self.state.z_hop_offset);
        if !self.state.position_unknown && target == self.state.position {
            return Ok(());
        }
        let feature = self.travel_feature();
        self.commit_move(MoveKind::Travel, target, speed, None, 0.0, feature)
    }

    /// Travel to `p` on the current layer.
    pub fn travel_xy(&mut self, p: IntPoint, speed: f64) -> Result<()> {
        self.travel(p.with_z(self.state.current_layer_z), speed)
    }

    /// Extrude a line to `p` with `flow` mm³ per mm of travel.
    ///
    /// The active extruder must be primed. A pending Z-hop is ended first.
    /// With `update_offset` the flow-rate compensation offset is recomputed
    /// for this move.
    pub fn extrude(
        &mut self,
        p: IntPoint3,
        speed: f64,
        flow: f64,
        feature: PrintFeatureType,
        update_offset: bool,
    ) -> Result<()> {
        let id = self.active()?;
        if self.extruders.get(id).is_retracted {
            return Err(GcodeError::ExtrudeWhileRetracted(id.index()));
        }
        if flow < 0.0 {
            warn!(flow, extruder = id.index(), "negative extrusion move");
        }
        if self.state.z_hop_offset != 0 {
            self.z_hop_end()?;
        }
        if !self.state.position_unknown && p == self.state.position {
            return Ok(());
        }

        let distance = self.state.position.distance_mm(p);
        let e_per_mm = self.extruders.get(id).mm3_to_e(flow)?;
        let previous = self.state.current_e_value + self.state.current_e_offset;
        if update_offset {
            let offset = self.profile.flow_compensation.offset(speed, e_per_mm);
            if offset != self.state.current_e_offset {
                self.state.current_e_offset = offset;
                self.write_line(&format!(
                    ";FLOW_RATE_COMPENSATED_OFFSET = {}\n",
                    fmt_decimal(offset, 5)
                ))?;
            }
        }
        self.state.current_e_value += e_per_mm * distance;
        let written = self.state.current_e_value + self.state.current_e_offset;
        let e = self.e_field(previous, written);
        self.commit_move(MoveKind::Extrude, p, speed, e, flow, feature)
    }

    /// Extrude a line to `p` on the current layer.
    pub fn extrude_xy(
        &mut self,
        p: IntPoint,
        speed: f64,
        flow: f64,
        feature: PrintFeatureType,
        update_offset: bool,
    ) -> Result<()> {
        self.extrude(
            p.with_z(self.state.current_layer_z),
            speed,
            flow,
            feature,
            update_offset,
        )
    }

    /// Extruding move to `p` that leaves the E axis alone.
    ///
    /// Lays fiber that the head motion pulls from the nozzle, so the active
    /// extruder may stay retracted. A pending Z-hop is ended first.
    pub fn write_dry_extrusion(
        &mut self,
        p: IntPoint3,
        speed: f64,
        feature: PrintFeatureType,
    ) -> Result<()> {
        self.active()?;
        if self.state.z_hop_offset != 0 {
            self.z_hop_end()?;
        }
        if !self.state.position_unknown && p == self.state.position {
            return Ok(());
        }
        self.commit_move(MoveKind::Extrude, p, speed, None, 0.0, feature)
    }

    /// Dry extrusion to `p` on the current layer.
    pub fn write_dry_extrusion_xy(
        &mut self,
        p: IntPoint,
        speed: f64,
        feature: PrintFeatureType,
    ) -> Result<()> {
        self.write_dry_extrusion(p.with_z(self.state.current_layer_z), speed, feature)
    }

    /// E field for a move from written E `previous` to `written`.
    fn e_field(&self, previous: f64, written: f64) -> Option<f64> {
        if written == previous {
            None
        } else if self.state.relative_extrusion {
            Some(written - previous)
        } else {
            Some(written)
        }
    }

    fn move_z(&mut self, z: Coord) -> Result<()> {
        let speed = self.profile.max_feedrate_z;
        let target = IntPoint3::new(self.state.position.x, self.state.position.y, z);
        let position = self.gcode_position(target);
        let cmd = MoveCommand {
            kind: MoveKind::Travel,
            position,
            speed,
            e: None,
            extruder: self.current_extruder().unwrap_or(0),
            mm3_per_mm: 0.0,
        };
        let text = self.formatter.format_move(&cmd);
        self.write_raw(&text)?;
        self.state.position = target;
        self.state.speed = speed;
        self.state.bounding_box.include_z(z);
        let feature = self.travel_feature();
        self.plan(speed, feature);
        Ok(())
    }

    /// Lift the nozzle `height` µm above the layer.
    ///
    /// While already hopped, only a higher hop has an effect.
    pub fn z_hop_start(&mut self, height: Coord) -> Result<()> {
        if height <= self.state.z_hop_offset {
            return Ok(());
        }
        self.state.z_hop_offset = height;
        self.move_z(self.state.current_layer_z + height)
    }

    /// Return the nozzle to the layer height. No-op when not hopped.
    pub fn z_hop_end(&mut self) -> Result<()> {
        if self.state.z_hop_offset == 0 {
            return Ok(());
        }
        self.state.z_hop_offset = 0;
        self.move_z(self.state.current_layer_z)
    }

    // ---- retraction ----------------------------------------------------------

    /// Volume extruded by `id` since the last E rebase (mm³).
    fn current_extruded_volume(&self, id: ExtruderId) -> Result<f64> {
        let ext = self.extruders.get(id);
        let mut amount = self.state.current_e_value;
        if !self.formatter.uses_firmware_retraction() {
            amount += ext.retracted_amount - ext.retracted_amount_at_e_start;
        }
        ext.e_to_mm3(amount)
    }

    /// Retract the active extruder.
    ///
    /// Without `force` this is a no-op while retracted, and is skipped when
    /// the retraction-count window is exhausted. A forced retraction while
    /// retracted only deepens the retraction; under firmware retraction only
    /// an extruder-switch retraction of a different length is repeated.
    pub fn retract(
        &mut self,
        config: &RetractionConfig,
        force: bool,
        extruder_switch: bool,
    ) -> Result<()> {
        let id = self.active()?;
        let firmware = self.formatter.uses_firmware_retraction();
        let extruded = self.current_extruded_volume(id)?;

        let ext = self.extruders.get_mut(id);
        let amount = ext.mm_to_e(config.distance);
        let change = amount - ext.retracted_amount;
        if ext.is_retracted {
            let changes = if firmware {
                extruder_switch && change.abs() >= RETRACT_EPSILON
            } else {
                change >= RETRACT_EPSILON
            };
            if !force || !changes {
                return Ok(());
            }
        } else if change < RETRACT_EPSILON {
            return Ok(());
        }
        let window = config.retraction_extrusion_window * ext.filament_area();
        let history = &mut ext.recent_retraction_volumes;
        history.set_capacity(config.retraction_count_max);
        if !force && !history.allows(extruded, window) {
            debug!(
                extruder = id.index(),
                count = history.len(),
                "retraction skipped, retraction count window exhausted"
            );
            return Ok(());
        }
        history.push(extruded);

        if !ext.is_retracted {
            ext.e_amount_at_retraction_start = self.state.current_e_value;
        }
        ext.last_retraction_prime_speed = config.prime_speed;
        ext.retracted_amount = amount;
        ext.is_retracted = true;
        ext.prime_volume_debt += config.prime_volume;

        let previous = self.state.current_e_value + self.state.current_e_offset;
        let (e, speed) = if firmware {
            (0.0, FIRMWARE_RETRACT_SPEED)
        } else {
            self.state.current_e_value -= change;
            let written = self.state.current_e_value + self.state.current_e_offset;
            let e = if self.state.relative_extrusion {
                written - previous
            } else {
                written
            };
            (e, config.speed)
        };
        let cmd = RetractCommand {
            extruder: id.index(),
            e,
            speed,
            extruder_switch,
        };
        let text = self.formatter.format_retract(&cmd);
        self.write_raw(&text)?;
        self.state.speed = speed;
        self.plan(speed, PrintFeatureType::MoveRetraction);
        Ok(())
    }

    /// Undo the active extruder's retraction and pay its prime debt.
    ///
    /// No-op when the extruder is not retracted. Nothing is written when the
    /// E axis doesn't move. May rebase the E axis afterwards.
    pub fn unretract_and_prime(&mut self) -> Result<()> {
        let id = self.active()?;
        let firmware = self.formatter.uses_firmware_retraction();
        let ext = self.extruders.get(id);
        if !ext.is_retracted {
            return Ok(());
        }
        let prime_e = ext.mm3_to_e(ext.prime_volume_debt)?;
        let speed = if ext.last_retraction_prime_speed > 0.0 {
            ext.last_retraction_prime_speed
        } else {
            self.profile.retraction.prime_speed
        };
        let (restore, target) = if firmware {
            (ext.retracted_amount > 0.0, self.state.current_e_value + prime_e)
        } else {
            (false, ext.e_amount_at_retraction_start + prime_e)
        };

        let previous = self.state.current_e_value + self.state.current_e_offset;
        self.state.current_e_value = target;
        let written = self.state.current_e_value + self.state.current_e_offset;
        let e = self.e_field(previous, written);
        if restore || e.is_some() {
            let cmd = UnretractCommand {
                extruder: id.index(),
                restore,
                e,
                speed,
            };
            let text = self.formatter.format_unretract(&cmd);
            self.write_raw(&text)?;
            let plan_speed = if e.is_some() {
                speed
            } else {
                FIRMWARE_RETRACT_SPEED
            };
            self.state.speed = plan_speed;
            self.plan(plan_speed, PrintFeatureType::MoveRetraction);
        }

        let ext = self.extruders.get_mut(id);
        ext.prime_volume_debt = 0.0;
        ext.retracted_amount = 0.0;
        ext.is_retracted = false;

        let extruded = self.current_extruded_volume(id)?;
        if self.formatter.allows_e_rebase() && extruded > E_REBASE_VOLUME {
            debug!(extruder = id.index(), extruded, "rebasing E axis");
            self.rebase_e(id)?;
        }
        Ok(())
    }

    /// Owe `volume` mm³ to the next prime of the active extruder.
    pub fn add_coasted_volume(&mut self, volume: f64) -> Result<()> {
        let id = self.active()?;
        self.extruders.get_mut(id).prime_volume_debt += volume;
        Ok(())
    }

    /// Rebase the E axis of the active extruder to zero.
    ///
    /// The extruded volume is folded into the extruder's total. Fails while
    /// the extruder is retracted.
    pub fn reset_extrusion_value(&mut self) -> Result<()> {
        let id = self.active()?;
        if self.extruders.get(id).is_retracted {
            return Err(GcodeError::ResetWhileRetracted(id.index()));
        }
        self.rebase_e(id)
    }

    /// Rebase without the retraction check; valid mid-switch.
    fn rebase_e(&mut self, id: ExtruderId) -> Result<()> {
        let volume = self.current_extruded_volume(id)?;
        if !self.state.relative_extrusion {
            let text = self
                .formatter
                .format_reset_e(id.index(), self.state.current_e_offset);
            self.write_line(&text)?;
        }
        let ext = self.extruders.get_mut(id);
        ext.total_filament_mm3 += volume;
        ext.recent_retraction_volumes.rebase(volume);
        ext.retracted_amount_at_e_start = ext.retracted_amount;
        ext.e_amount_at_retraction_start = ext.retracted_amount;
        self.state.current_e_value = 0.0;
        Ok(())
    }

    /// Filament used by `extruder` so far (mm³).
    pub fn total_filament_used(&self, extruder: usize) -> Result<f64> {
        let id = self.extruders.id(extruder)?;
        let mut total = self.extruders.get(id).total_filament_mm3;
        if self.state.current_extruder == Some(id) {
            total += self.current_extruded_volume(id)?;
        }
        Ok(total)
    }

    // ---- extruders -------------------------------------------------------------

    /// Make `index` the active extruder.
    ///
    /// Marks it used, selects the tool, zeroes its E axis and writes its
    /// start code. Any previously active extruder's E is folded into its
    /// total first.
    pub fn start_extruder(&mut self, index: usize) -> Result<()> {
        let id = self.extruders.id(index)?;
        if let Some(previous) = self.state.current_extruder.filter(|previous| *previous != id) {
            self.rebase_e(previous)?;
        }
        self.activate(id)
    }

    fn activate(&mut self, id: ExtruderId) -> Result<()> {
        self.extruders.get_mut(id).is_used = true;
        let needs_tool_change = match self.state.current_extruder {
            Some(previous) => previous != id,
            None => id.index() != 0,
        };
        if needs_tool_change {
            let text = self.formatter.format_tool_change(id.index());
            self.write_line(&text)?;
        }
        self.state.current_extruder = Some(id);
        self.rebase_e(id)?;
        let start_code = self.profile.extruders[id.index()].start_code.clone();
        self.write_extruder_code(&start_code)?;
        self.formatter.invalidate();
        self.state.position_unknown = true;
        Ok(())
    }

    /// Switch from the active extruder to `index`.
    ///
    /// The old extruder is retracted with `config` regardless of its state,
    /// its E is folded into its total and its end code written. The new
    /// extruder starts retracted; call
    /// [`unretract_and_prime`](Self::unretract_and_prime) before extruding.
    pub fn switch_extruder(&mut self, index: usize, config: &RetractionConfig) -> Result<()> {
        let new = self.extruders.id(index)?;
        let old = self.active()?;
        if old == new {
            return Ok(());
        }
        info!(from = old.index(), to = index, "switching extruder");
        self.retract(config, true, true)?;
        self.rebase_e(old)?;
        let end_code = self.profile.extruders[old.index()].end_code.clone();
        self.write_extruder_code(&end_code)?;
        self.activate(new)?;
        self.extruders.get_mut(new).is_retracted = true;
        Ok(())
    }

    /// [`switch_extruder`](Self::switch_extruder) with the profile's switch retraction.
    pub fn change_extruder(&mut self, index: usize) -> Result<()> {
        let config = self.profile.switch_retraction.clone();
        self.switch_extruder(index, &config)
    }

    /// Lay the one-time prime for the active extruder.
    ///
    /// Travels to the prime position first when a prime blob is configured.
    pub fn write_prime_train(&mut self, travel_speed: f64) -> Result<()> {
        let id = self.active()?;
        if self.extruders.get(id).is_primed {
            return Ok(());
        }
        let config = &self.profile.extruders[id.index()];
        let blob = config.prime_blob_enable;
        let prime_pos = IntPoint::from_mm(config.prime_pos_x, config.prime_pos_y);
        if blob {
            self.travel_xy(prime_pos, travel_speed)?;
        }
        let z = self.gcode_position(self.state.position).z;
        let text = self.formatter.format_prime_train(blob, z);
        self.write_line(&text)?;
        self.extruders.get_mut(id).is_primed = true;
        Ok(())
    }

    /// Cut the fiber fed through the active extruder.
    pub fn write_fiber_cut(&mut self) -> Result<()> {
        let id = self.active()?;
        let code = self.profile.extruders[id.index()].fiber_cut_code.clone();
        self.write_fiber_code(id, &code)
    }

    /// Feed the fiber of the active extruder back to the nozzle tip.
    pub fn write_fiber_prime(&mut self) -> Result<()> {
        let id = self.active()?;
        let code = self.profile.extruders[id.index()].fiber_prime_code.clone();
        self.write_fiber_code(id, &code)
    }

    fn write_fiber_code(&mut self, id: ExtruderId, code: &str) -> Result<()> {
        if code.is_empty() {
            debug!(extruder = id.index(), "no fiber code configured");
            return Ok(());
        }
        self.write_extruder_code(code)?;
        self.formatter.invalidate();
        Ok(())
    }

    // ---- machine settings --------------------------------------------------------

    /// Set a nozzle temperature; with `wait`, block until it is reached.
    ///
    /// Unchanged temperatures are not rewritten unless waiting.
    pub fn write_temperature_command(
        &mut self,
        extruder: usize,
        temperature: f64,
        wait: bool,
    ) -> Result<()> {
        let id = self.extruders.id(extruder)?;
        if !self.profile.extruders[extruder].nozzle_temp_enabled {
            return Ok(());
        }
        if !wait && self.extruders.get(id).current_temperature == Some(temperature) {
            return Ok(());
        }
        let address_tool = match self.state.current_extruder {
            Some(current) => current != id,
            None => extruder != 0,
        };
        let cmd = TemperatureCommand {
            extruder,
            temperature,
            wait,
            address_tool,
        };
        let text = self.formatter.format_temperature(&cmd);
        self.write_line(&text)?;
        let state = self.extruders.get_mut(id);
        state.current_temperature = Some(temperature);
        state.waited_for_temperature = wait;
        Ok(())
    }

    /// Set the bed temperature; with `wait`, block until it is reached.
    pub fn write_bed_temperature(&mut self, temperature: f64, wait: bool) -> Result<()> {
        if !self.profile.heated_bed {
            return Ok(());
        }
        if !wait && self.state.bed_temperature == Some(temperature) {
            return Ok(());
        }
        let text = self.formatter.format_bed_temperature(temperature, wait);
        self.write_line(&text)?;
        self.state.bed_temperature = Some(temperature);
        Ok(())
    }

    /// Set the active extruder's cooling fan to `percent`.
    pub fn write_fan_command(&mut self, percent: f64) -> Result<()> {
        let fan = self
            .state
            .current_extruder
            .map_or(0, |id| self.extruders.get(id).fan_number);
        if let Some(current) = self.state.fan_speeds.get(&fan) {
            if (current - percent).abs() < 0.1 {
                return Ok(());
            }
        }
        let text = self.formatter.format_fan(percent, fan);
        self.write_line(&text)?;
        self.state.fan_speeds.insert(fan, percent);
        Ok(())
    }

    /// Set the build chamber fan to `percent`. No-op without a chamber fan.
    pub fn write_chamber_fan_command(&mut self, percent: f64) -> Result<()> {
        let Some(fan) = self.profile.chamber_fan else {
            return Ok(());
        };
        if let Some(current) = self.state.chamber_fan_speed {
            if (current - percent).abs() < 0.1 {
                return Ok(());
            }
        }
        let text = self.formatter.format_fan(percent, fan);
        self.write_line(&text)?;
        self.state.chamber_fan_speed = Some(percent);
        Ok(())
    }

    /// Acceleration for extruding moves (mm/s²).
    pub fn write_print_acceleration(&mut self, acceleration: f64) -> Result<()> {
        if self.state.print_acceleration == Some(acceleration) {
            return Ok(());
        }
        let text = self.formatter.format_print_acceleration(acceleration);
        self.write_line(&text)?;
        self.state.print_acceleration = Some(acceleration);
        self.estimator.set_acceleration(acceleration);
        Ok(())
    }

    /// Acceleration for travel moves (mm/s²).
    pub fn write_travel_acceleration(&mut self, acceleration: f64) -> Result<()> {
        if self.state.travel_acceleration == Some(acceleration) {
            return Ok(());
        }
        let text = self.formatter.format_travel_acceleration(acceleration);
        self.write_line(&text)?;
        self.state.travel_acceleration = Some(acceleration);
        self.estimator.set_acceleration(acceleration);
        Ok(())
    }

    /// XY jerk (mm/s).
    pub fn write_jerk(&mut self, jerk: f64) -> Result<()> {
        if self.state.jerk == Some(jerk) {
            return Ok(());
        }
        let text = self.formatter.format_jerk(jerk);
        self.write_line(&text)?;
        self.state.jerk = Some(jerk);
        self.estimator.set_max_xy_jerk(jerk);
        Ok(())
    }

    /// Z feedrate limit (mm/s).
    pub fn write_max_z_feedrate(&mut self, feedrate: f64) -> Result<()> {
        if self.state.max_z_feedrate == Some(feedrate) {
            return Ok(());
        }
        let text = self.formatter.format_max_z_feedrate(feedrate);
        self.write_line(&text)?;
        self.state.max_z_feedrate = Some(feedrate);
        self.estimator.set_max_z_feedrate(feedrate);
        Ok(())
    }

    // ---- print time ----------------------------------------------------------------

    /// Drain the estimator into the per-feature totals and write the elapsed time.
    pub fn update_total_print_time(&mut self) -> Result<()> {
        let durations = self.estimator.calculate();
        self.state.total_print_time += durations;
        self.estimator.reset();
        let total = self.state.total_print_time.total();
        self.write_time_comment(total)
    }

    /// Accumulated print time per feature.
    pub fn total_print_time_per_feature(&self) -> &FeatureDurations {
        &self.state.total_print_time
    }

    /// Accumulated print time over all features (s).
    pub fn sum_total_print_times(&self) -> f64 {
        self.state.total_print_time.total()
    }

    /// Clear print times, filament totals and temperatures for a new job.
    ///
    /// Flavor and configuration are kept.
    pub fn reset_total_print_time_and_filament(&mut self) {
        self.state.total_print_time = FeatureDurations::default();
        self.state.current_e_value = 0.0;
        self.state.bed_temperature = None;
        self.extruders.clear_job();
        self.estimator.reset();
    }

    /// Finish the job: fan off, end code, flush.
    pub fn finalize(&mut self, end_code: &str) -> Result<()> {
        self.write_fan_command(0.0)?;
        self.write_code(end_code)?;
        self.flush()?;

        let print_time = self.sum_total_print_times();
        info!(
            seconds = print_time,
            "print time {}h {}m {}s",
            (print_time / 3600.0) as u64,
            (print_time / 60.0) as u64 % 60,
            print_time as u64 % 60
        );
        let used: Vec<usize> = self.extruders.used().map(|(id, _)| id.index()).collect();
        for extruder in used {
            let filament = self.total_filament_used(extruder)?;
            if filament > 0.0 {
                info!(extruder, filament_mm3 = filament, "filament used");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn exporter(profile: PrinterProfile) -> GcodeExport<Vec<u8>> {
        GcodeExport::new(Vec::new(), profile).unwrap()
    }

    fn output(export: &GcodeExport<Vec<u8>>) -> String {
        String::from_utf8(export.get_ref().clone()).unwrap()
    }

    #[test]
    fn test_extrude_before_start_is_misuse() {
        let mut export = exporter(PrinterProfile::generic());
        let err = export
            .extrude(
                IntPoint3::new(1000, 0, 0),
                30.0,
                0.1,
                PrintFeatureType::Infill,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, GcodeError::ExtruderNotStarted));
        assert!(!err.is_config_fault());
    }

    #[test]
    fn test_extrude_while_retracted_is_misuse() {
        let mut export = exporter(PrinterProfile::generic());
        export.start_extruder(0).unwrap();
        export.retract(&RetractionConfig::default(), false, false).unwrap();
        let err = export
            .extrude_xy(IntPoint::new(1000, 0), 30.0, 0.1, PrintFeatureType::Skin, false)
            .unwrap_err();
        assert!(matches!(err, GcodeError::ExtrudeWhileRetracted(0)));
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let mut profile = PrinterProfile::generic();
        profile.extruders[0].filament_diameter = 0.0;
        let err = GcodeExport::new(Vec::new(), profile).err().unwrap();
        assert!(err.is_config_fault());
    }

    #[test]
    fn test_relative_extrusion_deltas() {
        let mut profile = PrinterProfile::generic();
        profile.relative_extrusion = true;
        profile.flavor = GcodeFlavor::MarlinVolumetric;
        let mut export = exporter(profile);
        export.start_extruder(0).unwrap();
        export
            .extrude_xy(IntPoint::new(10_000, 0), 20.0, 0.5, PrintFeatureType::Infill, false)
            .unwrap();
        export
            .extrude_xy(IntPoint::new(20_000, 0), 20.0, 0.5, PrintFeatureType::Infill, false)
            .unwrap();
        let text = output(&export);
        assert!(!text.contains("G92"));
        assert_eq!(text.matches(" E5\n").count(), 2);
        assert_relative_eq!(export.total_filament_used(0).unwrap(), 10.0);
    }

    #[test]
    fn test_flow_compensation_offset_written_once() {
        let mut profile = PrinterProfile::generic();
        profile.flavor = GcodeFlavor::MarlinVolumetric;
        profile.flow_compensation = FlowCompensation {
            max_extrusion_offset: 4.0,
            extrusion_offset_factor: 0.1,
        };
        let mut export = exporter(profile);
        export.start_extruder(0).unwrap();
        export
            .extrude_xy(IntPoint::new(10_000, 0), 20.0, 0.5, PrintFeatureType::Infill, true)
            .unwrap();
        export
            .extrude_xy(IntPoint::new(20_000, 0), 20.0, 0.5, PrintFeatureType::Infill, true)
            .unwrap();
        let text = output(&export);
        assert_eq!(text.matches(";FLOW_RATE_COMPENSATED_OFFSET = 1\n").count(), 1);
        // offset leads the E axis but is not counted as filament
        assert!(text.contains("G1 X20 E11\n"));
        assert_relative_eq!(export.total_filament_used(0).unwrap(), 10.0);
    }

    #[test]
    fn test_retraction_window() {
        let mut export = exporter(PrinterProfile::generic());
        export.start_extruder(0).unwrap();
        let config = RetractionConfig {
            retraction_count_max: 1,
            retraction_extrusion_window: 100.0,
            ..Default::default()
        };
        export.retract(&config, false, false).unwrap();
        export.unretract_and_prime().unwrap();
        export.retract(&config, false, false).unwrap();
        assert!(!export.is_retracted());
        export.retract(&config, true, false).unwrap();
        assert!(export.is_retracted());
    }

    #[test]
    fn test_prime_debt_paid_on_unretract() {
        let mut profile = PrinterProfile::generic();
        profile.flavor = GcodeFlavor::MarlinVolumetric;
        let mut export = exporter(profile);
        export.start_extruder(0).unwrap();
        let config = RetractionConfig {
            distance: 0.0,
            ..Default::default()
        };
        // zero distance: no retraction at all
        export.retract(&config, false, false).unwrap();
        assert!(!export.is_retracted());

        let config = RetractionConfig {
            distance: 1.0,
            prime_volume: 0.5,
            ..Default::default()
        };
        export.retract(&config, false, false).unwrap();
        export.add_coasted_volume(0.25).unwrap();
        let retracted = export.current_e_value();
        export.unretract_and_prime().unwrap();
        let area = export.extruder(0).unwrap().filament_area();
        assert_relative_eq!(export.current_e_value() - retracted, area + 0.75);
        assert_relative_eq!(export.total_filament_used(0).unwrap(), 0.75);
    }

    #[test]
    fn test_auto_rebase_after_large_volume() {
        let mut profile = PrinterProfile::generic();
        profile.flavor = GcodeFlavor::MarlinVolumetric;
        let mut export = exporter(profile);
        export.start_extruder(0).unwrap();
        export
            .extrude_xy(IntPoint::new(100_000, 0), 50.0, 101.0, PrintFeatureType::Infill, false)
            .unwrap();
        export.retract(&RetractionConfig::default(), false, false).unwrap();
        export.unretract_and_prime().unwrap();
        assert_eq!(export.current_e_value(), 0.0);
        assert_relative_eq!(export.total_filament_used(0).unwrap(), 10_100.0);
        assert_eq!(output(&export).matches("G92 E0").count(), 2);
    }

    #[test]
    fn test_no_auto_rebase_on_makerbot() {
        let mut profile = PrinterProfile::makerbot_replicator();
        profile.extruders[0].filament_diameter = 1.0;
        let mut export = exporter(profile);
        export.start_extruder(0).unwrap();
        let flow = 200.0 * crate::units::filament_area(1.0);
        export
            .extrude_xy(IntPoint::new(100_000, 0), 50.0, flow, PrintFeatureType::Infill, false)
            .unwrap();
        export.retract(&RetractionConfig::default(), false, false).unwrap();
        export.unretract_and_prime().unwrap();
        assert!(export.current_e_value() > 0.0);
    }

    #[test]
    fn test_extruder_offset_applied() {
        let mut profile = PrinterProfile::ultimaker_s5();
        profile.extruders[1].offset_y = 2.0;
        let mut export = exporter(profile);
        export.start_extruder(1).unwrap();
        export.travel_xy(IntPoint::new(50_000, 10_000), 150.0).unwrap();
        let text = output(&export);
        assert!(text.starts_with("T1\n"));
        assert!(text.contains("X28 Y8"));
        assert_eq!(export.position(), IntPoint3::new(50_000, 10_000, 0));
        assert_eq!(export.bounding_box().max.x, 28_000);
    }

    #[test]
    fn test_prime_train_once() {
        let mut export = exporter(PrinterProfile::ultimaker_s5());
        export.start_extruder(0).unwrap();
        export.write_prime_train(150.0).unwrap();
        export.write_prime_train(150.0).unwrap();
        let text = output(&export);
        assert_eq!(text.matches("G280").count(), 1);
        assert!(text.contains("G0 F9000 X330 Y6"));
    }

    #[test]
    fn test_initial_temperatures() {
        let mut export = exporter(PrinterProfile::ultimaker_s5());
        export.set_initial_temperatures(1).unwrap();
        assert_eq!(export.extruder(1).unwrap().initial_temperature, 210.0);
        assert_eq!(export.extruder(0).unwrap().initial_temperature, 175.0);
        // Griffin firmware preheats, so nothing is rewritten
        export.write_temperature_command(1, 210.0, false).unwrap();
        assert_eq!(output(&export), "");
        assert!(export.set_initial_temperatures(5).unwrap_err().is_config_fault());
    }

    #[test]
    fn test_print_time_accumulates() {
        let mut export = exporter(PrinterProfile::generic());
        export.start_extruder(0).unwrap();
        export.travel_xy(IntPoint::new(100_000, 0), 100.0).unwrap();
        export.write_delay(2.0).unwrap();
        export.update_total_print_time().unwrap();
        let per_feature = *export.total_print_time_per_feature();
        assert!(per_feature[PrintFeatureType::MoveCombing] > 1.0);
        assert_relative_eq!(per_feature[PrintFeatureType::NoneType], 2.0);
        assert!(output(&export).contains(";TIME_ELAPSED:"));

        export.reset_total_print_time_and_filament();
        assert_eq!(export.sum_total_print_times(), 0.0);
    }
}
