//! Bits From Bytes dialect.
//!
//! BFB firmware drives the extruder motor by RPM instead of an E axis. The
//! motor is switched on (`M101`, `M201`, ...) before extruding and off
//! (`M103`) before travelling. Every move line carries X, Y, Z and F.
//!
//! Move lines are held in a batch that is written out when the motor mode
//! changes or on an explicit flush. Moves that don't change X/Y produce no line
//! of their own: their Z and F are carried by the next XY line, or written on
//! flush if no such line follows.

use strata_math::{Coord, IntPoint};

use super::{fmt_coord, fmt_decimal, FormatterCore, GcodeFormatter, MoveCommand, MoveKind};
use super::{RetractCommand, UnretractCommand};
use crate::flavor::GcodeFlavor;

/// Cubic millimetres of material per extruder motor revolution.
const MM3_PER_RPM: f64 = 4.0;

/// Batching BFB formatter.
#[derive(Debug, Clone, Default)]
pub struct Bfb {
    core: FormatterCore,
    batch: Vec<String>,
    last_xy: Option<IntPoint>,
    /// Z and feedrate of a dropped Z-only move.
    dirty: Option<(Coord, f64)>,
    motor_on: bool,
    rpm: Option<f64>,
}

impl Bfb {
    /// New formatter with the motor off.
    pub fn new() -> Self {
        Self::default()
    }

    fn start_motor(&mut self, extruder: usize, rpm: f64) -> String {
        let mut out = self.flush_batch();
        if self.rpm != Some(rpm) {
            out.push_str(&format!("M108 S{}\n", fmt_decimal(rpm, 1)));
            self.rpm = Some(rpm);
        }
        out.push_str(&format!("M{}\n", (extruder + 1) * 100 + 1));
        self.motor_on = true;
        out
    }

    fn stop_motor(&mut self) -> String {
        let mut out = self.flush_batch();
        out.push_str("M103\n");
        self.motor_on = false;
        out
    }
}

impl GcodeFormatter for Bfb {
    fn flavor(&self) -> GcodeFlavor {
        GcodeFlavor::Bfb
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn uses_firmware_retraction(&self) -> bool {
        false
    }

    fn format_move(&mut self, cmd: &MoveCommand) -> String {
        let rpm = match cmd.kind {
            MoveKind::Extrude => cmd.mm3_per_mm * cmd.speed * 60.0 / MM3_PER_RPM,
            MoveKind::Travel => 0.0,
        };
        let mut out = String::new();
        let mut feedrate = cmd.speed * 60.0;
        if rpm > 0.0 {
            if !self.motor_on {
                out = self.start_motor(cmd.extruder, rpm);
            }
            // the firmware rounds RPM to 0.01; scale F to keep the extrusion ratio
            let rounded = (rpm * 100.0).round() / 100.0;
            if rounded > 0.0 {
                feedrate *= rpm / rounded;
            }
        } else if self.motor_on {
            out = self.stop_motor();
        }

        let xy = cmd.position.xy();
        if self.last_xy == Some(xy) {
            self.dirty = Some((cmd.position.z, feedrate));
            return out;
        }
        self.last_xy = Some(xy);
        self.dirty = None;
        self.batch.push(format!(
            "G1 X{} Y{} Z{} F{}\n",
            fmt_coord(xy.x),
            fmt_coord(xy.y),
            fmt_coord(cmd.position.z),
            fmt_decimal(feedrate, 1)
        ));
        out
    }

    fn format_retract(&mut self, _cmd: &RetractCommand) -> String {
        if self.motor_on {
            self.stop_motor()
        } else {
            String::new()
        }
    }

    fn format_unretract(&mut self, _cmd: &UnretractCommand) -> String {
        String::new()
    }

    fn flush_batch(&mut self) -> String {
        let mut out: String = self.batch.drain(..).collect();
        if let Some((z, feedrate)) = self.dirty.take() {
            out.push_str(&format!(
                "G1 Z{} F{}\n",
                fmt_coord(z),
                fmt_decimal(feedrate, 1)
            ));
        }
        out
    }

    fn invalidate(&mut self) {
        self.last_xy = None;
    }
}
