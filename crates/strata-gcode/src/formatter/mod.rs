//! Dialect formatters.
//!
//! A formatter turns resolved machine commands into text for one firmware
//! dialect. It is chosen once per job by [`for_flavor`]; the exporter never
//! branches on the flavor itself. Every method returns the text to append,
//! which may be empty when nothing needs to be written.

mod bfb;
mod standard;

pub use bfb::Bfb;
pub use standard::{Griffin, Mach3, Makerbot, Marlin, RepRap, Repetier, UltiGcode};

use strata_math::{Coord, IntPoint3};

use crate::flavor::GcodeFlavor;

/// Kind of motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Non-extruding move (`G0`).
    Travel,
    /// Extruding move (`G1`).
    Extrude,
}

/// A resolved move in machine coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveCommand {
    /// Travel or extrusion.
    pub kind: MoveKind,
    /// Target in emitted coordinates (µm).
    pub position: IntPoint3,
    /// Feedrate (mm/s).
    pub speed: f64,
    /// E field to write, or `None` when E does not change.
    pub e: Option<f64>,
    /// Active extruder.
    pub extruder: usize,
    /// Volumetric flow (mm³ per mm of motion); zero for travel.
    pub mm3_per_mm: f64,
}

/// A retraction resolved to its E field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetractCommand {
    /// Active extruder.
    pub extruder: usize,
    /// E field (absolute value or delta).
    pub e: f64,
    /// Retraction speed (mm/s).
    pub speed: f64,
    /// Retraction before an extruder switch.
    pub extruder_switch: bool,
}

/// An un-retraction and prime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnretractCommand {
    /// Active extruder.
    pub extruder: usize,
    /// Undo a firmware retraction (`G11`).
    pub restore: bool,
    /// E field of the prime move, if one is needed.
    pub e: Option<f64>,
    /// Prime speed (mm/s).
    pub speed: f64,
}

/// A nozzle temperature change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureCommand {
    /// Target extruder.
    pub extruder: usize,
    /// Temperature (°C).
    pub temperature: f64,
    /// Block until reached.
    pub wait: bool,
    /// Address the extruder explicitly (`T<n>`); false for the active one.
    pub address_tool: bool,
}

/// Last written F/X/Y/Z fields, for suppressing unchanged ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldCache {
    speed: Option<f64>,
    x: Option<Coord>,
    y: Option<Coord>,
    z: Option<Coord>,
}

impl FieldCache {
    /// Forget every field so the next move writes all of them.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// Record `speed`, returning it if it differs from the last written one.
    pub fn speed(&mut self, speed: f64) -> Option<f64> {
        changed(&mut self.speed, speed)
    }

    /// Record `x`, returning it if it changed.
    pub fn x(&mut self, x: Coord) -> Option<Coord> {
        changed(&mut self.x, x)
    }

    /// Record `y`, returning it if it changed.
    pub fn y(&mut self, y: Coord) -> Option<Coord> {
        changed(&mut self.y, y)
    }

    /// Record `z`, returning it if it changed.
    pub fn z(&mut self, z: Coord) -> Option<Coord> {
        changed(&mut self.z, z)
    }

    /// Force `speed` as the last written feedrate.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = Some(speed);
    }
}

fn changed<T: PartialEq + Copy>(slot: &mut Option<T>, value: T) -> Option<T> {
    if *slot == Some(value) {
        None
    } else {
        *slot = Some(value);
        Some(value)
    }
}

/// State shared by the line-per-command formatters.
#[derive(Debug, Clone, Default)]
pub struct FormatterCore {
    /// Field suppression cache.
    pub fields: FieldCache,
    /// Retract with `G10`/`G11`.
    pub firmware_retraction: bool,
}

impl FormatterCore {
    /// Core with the given retraction mode.
    pub fn new(firmware_retraction: bool) -> Self {
        Self {
            fields: FieldCache::default(),
            firmware_retraction,
        }
    }

    /// `G0`/`G1` line with unchanged fields left out.
    pub fn move_line(&mut self, cmd: &MoveCommand, axis: char) -> String {
        let mut line = String::from(match cmd.kind {
            MoveKind::Travel => "G0",
            MoveKind::Extrude => "G1",
        });
        let code_len = line.len();
        if let Some(speed) = self.fields.speed(cmd.speed) {
            line.push_str(&format!(" F{}", fmt_decimal(speed * 60.0, 1)));
        }
        if let Some(x) = self.fields.x(cmd.position.x) {
            line.push_str(&format!(" X{}", fmt_coord(x)));
        }
        if let Some(y) = self.fields.y(cmd.position.y) {
            line.push_str(&format!(" Y{}", fmt_coord(y)));
        }
        if let Some(z) = self.fields.z(cmd.position.z) {
            line.push_str(&format!(" Z{}", fmt_coord(z)));
        }
        if let Some(e) = cmd.e {
            line.push_str(&format!(" {axis}{}", fmt_decimal(e, 5)));
        }
        if line.len() == code_len {
            return String::new();
        }
        line.push('\n');
        line
    }

    /// `G1 F<speed> <axis><e>` line; F is always written.
    pub fn e_line(&mut self, speed: f64, axis: char, e: f64) -> String {
        self.fields.set_speed(speed);
        format!(
            "G1 F{} {axis}{}\n",
            fmt_decimal(speed * 60.0, 1),
            fmt_decimal(e, 5)
        )
    }
}

/// Serializes machine commands for one firmware dialect.
pub trait GcodeFormatter: Send {
    /// Dialect implemented by this formatter.
    fn flavor(&self) -> GcodeFlavor;

    /// Shared line state.
    fn core(&self) -> &FormatterCore;

    /// Shared line state.
    fn core_mut(&mut self) -> &mut FormatterCore;

    /// Retractions are performed by the firmware.
    fn uses_firmware_retraction(&self) -> bool {
        self.core().firmware_retraction
    }

    /// May the E axis be rebased with `G92` during the print?
    fn allows_e_rebase(&self) -> bool {
        self.flavor().allows_e_rebase()
    }

    /// The firmware heats the nozzles from the file header.
    fn firmware_preheats(&self) -> bool {
        false
    }

    /// Axis letter feeding `extruder`.
    fn extruder_axis(&self, _extruder: usize) -> char {
        'E'
    }

    /// A travel or extrusion move.
    fn format_move(&mut self, cmd: &MoveCommand) -> String {
        let axis = self.extruder_axis(cmd.extruder);
        self.core_mut().move_line(cmd, axis)
    }

    /// A retraction.
    fn format_retract(&mut self, cmd: &RetractCommand) -> String {
        if self.uses_firmware_retraction() {
            return "G10\n".into();
        }
        let axis = self.extruder_axis(cmd.extruder);
        self.core_mut().e_line(cmd.speed, axis, cmd.e)
    }

    /// An un-retraction and prime.
    fn format_unretract(&mut self, cmd: &UnretractCommand) -> String {
        let mut out = String::new();
        if cmd.restore {
            out.push_str("G11\n");
        }
        if let Some(e) = cmd.e {
            let axis = self.extruder_axis(cmd.extruder);
            out.push_str(&self.core_mut().e_line(cmd.speed, axis, e));
        }
        out
    }

    /// Nozzle temperature (`M104`, or `M109` when waiting).
    fn format_temperature(&mut self, cmd: &TemperatureCommand) -> String {
        let code = if cmd.wait { "M109" } else { "M104" };
        temperature_line(code, cmd)
    }

    /// Bed temperature (`M140`, or `M190` when waiting).
    fn format_bed_temperature(&mut self, temperature: f64, wait: bool) -> String {
        let code = if wait { "M190" } else { "M140" };
        format!("{code} S{}\n", fmt_decimal(temperature, 1))
    }

    /// Print cooling fan at `percent` (0-100).
    fn format_fan(&mut self, percent: f64, fan: u32) -> String {
        let mut line = if percent > 0.0 {
            format!("M106 S{}", fmt_decimal(percent * 255.0 / 100.0, 1))
        } else {
            "M107".to_string()
        };
        if fan != 0 {
            line.push_str(&format!(" P{fan}"));
        }
        line.push('\n');
        line
    }

    /// Acceleration for extruding moves.
    fn format_print_acceleration(&mut self, acceleration: f64) -> String {
        format!("M204 S{}\n", fmt_decimal(acceleration, 0))
    }

    /// Acceleration for travel moves.
    fn format_travel_acceleration(&mut self, acceleration: f64) -> String {
        format!("M204 T{}\n", fmt_decimal(acceleration, 0))
    }

    /// XY jerk (mm/s).
    fn format_jerk(&mut self, jerk: f64) -> String {
        let jerk = fmt_decimal(jerk, 2);
        format!("M205 X{jerk} Y{jerk}\n")
    }

    /// Z feedrate limit (mm/s).
    fn format_max_z_feedrate(&mut self, feedrate: f64) -> String {
        format!("M203 Z{}\n", fmt_decimal(feedrate, 2))
    }

    /// Select `extruder` as the active tool.
    fn format_tool_change(&mut self, extruder: usize) -> String {
        format!("T{extruder}\n")
    }

    /// Rebase the E axis so its current position reads `value`.
    fn format_reset_e(&mut self, extruder: usize, value: f64) -> String {
        format!(
            "G92 {}{}\n",
            self.extruder_axis(extruder),
            fmt_decimal(value, 5)
        )
    }

    /// Firmware prime sequence for the active extruder, if the dialect has one.
    ///
    /// `z` is the current Z, restored after a prime that moves the head.
    fn format_prime_train(&mut self, _blob: bool, _z: Coord) -> String {
        String::new()
    }

    /// Text held back by a batching dialect.
    fn flush_batch(&mut self) -> String {
        String::new()
    }

    /// Force every field on the next move.
    fn invalidate(&mut self) {
        self.core_mut().fields.invalidate();
    }
}

fn temperature_line(code: &str, cmd: &TemperatureCommand) -> String {
    let mut line = code.to_string();
    if cmd.address_tool {
        line.push_str(&format!(" T{}", cmd.extruder));
    }
    line.push_str(&format!(" S{}\n", fmt_decimal(cmd.temperature, 1)));
    line
}

/// Formatter for `flavor`.
///
/// `firmware_retraction` requests `G10`/`G11` on dialects where it is optional.
pub fn for_flavor(flavor: GcodeFlavor, firmware_retraction: bool) -> Box<dyn GcodeFormatter> {
    match flavor {
        GcodeFlavor::Marlin | GcodeFlavor::MarlinVolumetric => {
            Box::new(Marlin::new(flavor, firmware_retraction))
        }
        GcodeFlavor::RepRap => Box::new(RepRap::new(firmware_retraction)),
        GcodeFlavor::Repetier => Box::new(Repetier::new(firmware_retraction)),
        GcodeFlavor::UltiGCode => Box::new(UltiGcode::new()),
        GcodeFlavor::Griffin => Box::new(Griffin::new()),
        GcodeFlavor::Makerbot => Box::new(Makerbot::new(firmware_retraction)),
        GcodeFlavor::Mach3 => Box::new(Mach3::new(firmware_retraction)),
        GcodeFlavor::Bfb => Box::new(Bfb::new()),
    }
}

/// Format a value with at most `precision` decimals, trailing zeros removed.
pub fn fmt_decimal(value: f64, precision: usize) -> String {
    let text = format!("{:.prec$}", value, prec = precision);
    let text = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text.as_str()
    };
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Format a micron coordinate as millimetres without rounding.
pub fn fmt_coord(coord: Coord) -> String {
    let sign = if coord < 0 { "-" } else { "" };
    let abs = coord.unsigned_abs();
    let whole = abs / 1000;
    let frac = abs % 1000;
    if frac == 0 {
        format!("{sign}{whole}")
    } else {
        let frac = format!("{frac:03}");
        format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extrude(x: Coord, y: Coord, speed: f64, e: f64) -> MoveCommand {
        MoveCommand {
            kind: MoveKind::Extrude,
            position: IntPoint3::new(x, y, 200),
            speed,
            e: Some(e),
            extruder: 0,
            mm3_per_mm: 0.05,
        }
    }

    #[test]
    fn test_fmt_decimal() {
        assert_eq!(fmt_decimal(1800.0, 1), "1800");
        assert_eq!(fmt_decimal(1.23456789, 5), "1.23457");
        assert_eq!(fmt_decimal(-0.000001, 5), "0");
        assert_eq!(fmt_decimal(0.5, 2), "0.5");
    }

    #[test]
    fn test_fmt_coord() {
        assert_eq!(fmt_coord(10_000), "10");
        assert_eq!(fmt_coord(10_500), "10.5");
        assert_eq!(fmt_coord(-250), "-0.25");
        assert_eq!(fmt_coord(1), "0.001");
    }

    #[test]
    fn test_unchanged_fields_suppressed() {
        let mut fmt = for_flavor(GcodeFlavor::Marlin, false);
        assert_eq!(
            fmt.format_move(&extrude(10_000, 0, 30.0, 1.0)),
            "G1 F1800 X10 Y0 Z0.2 E1\n"
        );
        assert_eq!(fmt.format_move(&extrude(20_000, 0, 30.0, 2.0)), "G1 X20 E2\n");
        fmt.invalidate();
        assert_eq!(
            fmt.format_move(&extrude(30_000, 0, 30.0, 3.0)),
            "G1 F1800 X30 Y0 Z0.2 E3\n"
        );
    }

    #[test]
    fn test_no_op_move_is_empty() {
        let mut fmt = for_flavor(GcodeFlavor::Marlin, false);
        let mut cmd = extrude(10_000, 0, 30.0, 1.0);
        fmt.format_move(&cmd);
        cmd.kind = MoveKind::Travel;
        cmd.e = None;
        assert_eq!(fmt.format_move(&cmd), "");
    }

    #[test]
    fn test_retract_sets_speed_field() {
        let mut fmt = for_flavor(GcodeFlavor::Marlin, false);
        let retract = RetractCommand {
            extruder: 0,
            e: -5.0,
            speed: 45.0,
            extruder_switch: false,
        };
        assert_eq!(fmt.format_retract(&retract), "G1 F2700 E-5\n");
        let line = fmt.format_move(&extrude(0, 0, 45.0, 1.0));
        assert!(!line.contains('F'));
    }

    #[test]
    fn test_fan() {
        let mut fmt = for_flavor(GcodeFlavor::Marlin, false);
        assert_eq!(fmt.format_fan(100.0, 0), "M106 S255\n");
        assert_eq!(fmt.format_fan(0.0, 1), "M107 P1\n");
    }
}
