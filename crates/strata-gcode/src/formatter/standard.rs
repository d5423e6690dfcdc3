//! Line-per-command dialects.

use strata_math::Coord;

use super::{
    fmt_coord, fmt_decimal, temperature_line, FormatterCore, GcodeFormatter, RetractCommand,
    TemperatureCommand,
};
use crate::flavor::GcodeFlavor;

/// Marlin, optionally with a volumetric E axis.
#[derive(Debug, Clone)]
pub struct Marlin {
    flavor: GcodeFlavor,
    core: FormatterCore,
}

impl Marlin {
    /// Formatter for `flavor` (`Marlin` or `MarlinVolumetric`).
    pub fn new(flavor: GcodeFlavor, firmware_retraction: bool) -> Self {
        Self {
            flavor,
            core: FormatterCore::new(firmware_retraction),
        }
    }
}

impl GcodeFormatter for Marlin {
    fn flavor(&self) -> GcodeFlavor {
        self.flavor
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn format_temperature(&mut self, cmd: &TemperatureCommand) -> String {
        if cmd.wait {
            // M105 keeps Marlin from dropping the target while it waits
            format!("M105\n{}", temperature_line("M109", cmd))
        } else {
            temperature_line("M104", cmd)
        }
    }

    fn format_bed_temperature(&mut self, temperature: f64, wait: bool) -> String {
        let temperature = fmt_decimal(temperature, 1);
        if wait {
            format!("M140 S{temperature}\nM105\nM190 S{temperature}\n")
        } else {
            format!("M140 S{temperature}\n")
        }
    }
}

/// RepRapFirmware.
#[derive(Debug, Clone)]
pub struct RepRap {
    core: FormatterCore,
}

impl RepRap {
    /// New formatter.
    pub fn new(firmware_retraction: bool) -> Self {
        Self {
            core: FormatterCore::new(firmware_retraction),
        }
    }
}

impl GcodeFormatter for RepRap {
    fn flavor(&self) -> GcodeFlavor {
        GcodeFlavor::RepRap
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn format_print_acceleration(&mut self, acceleration: f64) -> String {
        format!("M204 P{}\n", fmt_decimal(acceleration, 0))
    }

    fn format_jerk(&mut self, jerk: f64) -> String {
        // mm/min
        let jerk = fmt_decimal(jerk * 60.0, 2);
        format!("M566 X{jerk} Y{jerk}\n")
    }

    fn format_max_z_feedrate(&mut self, feedrate: f64) -> String {
        format!("M203 Z{}\n", fmt_decimal(feedrate * 60.0, 2))
    }
}

/// Repetier firmware.
#[derive(Debug, Clone)]
pub struct Repetier {
    core: FormatterCore,
}

impl Repetier {
    /// New formatter.
    pub fn new(firmware_retraction: bool) -> Self {
        Self {
            core: FormatterCore::new(firmware_retraction),
        }
    }
}

impl GcodeFormatter for Repetier {
    fn flavor(&self) -> GcodeFlavor {
        GcodeFlavor::Repetier
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn format_retract(&mut self, cmd: &RetractCommand) -> String {
        if !self.uses_firmware_retraction() {
            return self.core.e_line(cmd.speed, 'E', cmd.e);
        }
        if cmd.extruder_switch {
            "G10 S1\n".into()
        } else {
            "G10\n".into()
        }
    }

    fn format_print_acceleration(&mut self, acceleration: f64) -> String {
        let acceleration = fmt_decimal(acceleration, 0);
        format!("M201 X{acceleration} Y{acceleration}\n")
    }

    fn format_travel_acceleration(&mut self, acceleration: f64) -> String {
        let acceleration = fmt_decimal(acceleration, 0);
        format!("M202 X{acceleration} Y{acceleration}\n")
    }

    fn format_jerk(&mut self, jerk: f64) -> String {
        format!("M207 X{}\n", fmt_decimal(jerk, 2))
    }

    fn format_max_z_feedrate(&mut self, _feedrate: f64) -> String {
        String::new()
    }
}

/// Ultimaker 2 UltiGCode: volumetric E, firmware retraction, firmware-managed heating.
#[derive(Debug, Clone)]
pub struct UltiGcode {
    core: FormatterCore,
}

impl UltiGcode {
    /// New formatter.
    pub fn new() -> Self {
        Self {
            core: FormatterCore::new(true),
        }
    }
}

impl Default for UltiGcode {
    fn default() -> Self {
        Self::new()
    }
}

impl GcodeFormatter for UltiGcode {
    fn flavor(&self) -> GcodeFlavor {
        GcodeFlavor::UltiGCode
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn firmware_preheats(&self) -> bool {
        true
    }

    fn format_bed_temperature(&mut self, _temperature: f64, _wait: bool) -> String {
        String::new()
    }
}

/// Ultimaker Griffin: firmware retraction and a `G280` prime.
#[derive(Debug, Clone)]
pub struct Griffin {
    core: FormatterCore,
}

impl Griffin {
    /// New formatter.
    pub fn new() -> Self {
        Self {
            core: FormatterCore::new(true),
        }
    }
}

impl Default for Griffin {
    fn default() -> Self {
        Self::new()
    }
}

impl GcodeFormatter for Griffin {
    fn flavor(&self) -> GcodeFlavor {
        GcodeFlavor::Griffin
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn firmware_preheats(&self) -> bool {
        true
    }

    fn format_prime_train(&mut self, blob: bool, z: Coord) -> String {
        if blob {
            return "G280\n".into();
        }
        // G280 S1 primes in place but leaves Z wherever the firmware put it
        self.core.fields.invalidate();
        format!("G280 S1\nG0 Z{}\n", fmt_coord(z))
    }
}

/// MakerBot (pre-X3G).
#[derive(Debug, Clone)]
pub struct Makerbot {
    core: FormatterCore,
}

impl Makerbot {
    /// New formatter.
    pub fn new(firmware_retraction: bool) -> Self {
        Self {
            core: FormatterCore::new(firmware_retraction),
        }
    }
}

impl GcodeFormatter for Makerbot {
    fn flavor(&self) -> GcodeFlavor {
        GcodeFlavor::Makerbot
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn format_temperature(&mut self, cmd: &TemperatureCommand) -> String {
        temperature_line("M104", cmd)
    }

    fn format_fan(&mut self, percent: f64, _fan: u32) -> String {
        if percent >= 50.0 {
            "M126 T0\n".into()
        } else {
            "M127 T0\n".into()
        }
    }

    fn format_tool_change(&mut self, extruder: usize) -> String {
        format!("M135 T{extruder}\n")
    }
}

/// Mach3: one axis letter per extruder.
#[derive(Debug, Clone)]
pub struct Mach3 {
    core: FormatterCore,
}

impl Mach3 {
    /// New formatter.
    pub fn new(firmware_retraction: bool) -> Self {
        Self {
            core: FormatterCore::new(firmware_retraction),
        }
    }
}

impl GcodeFormatter for Mach3 {
    fn flavor(&self) -> GcodeFlavor {
        GcodeFlavor::Mach3
    }

    fn core(&self) -> &FormatterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    fn extruder_axis(&self, extruder: usize) -> char {
        GcodeFlavor::Mach3.extruder_axis(extruder)
    }
}
