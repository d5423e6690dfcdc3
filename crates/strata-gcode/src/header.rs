//! File header block.

use std::io::Write;

use strata_math::{coord_to_mm, IntPoint3};

use crate::error::Result;
use crate::export::GcodeExport;
use crate::flavor::GcodeFlavor;
use crate::formatter::{fmt_coord, fmt_decimal};

/// `;TIME:` value written when no estimate is available yet.
const PLACEHOLDER_PRINT_TIME: u64 = 6666;

impl<W: Write> GcodeExport<W> {
    /// Header block describing the job.
    ///
    /// `filament_used` holds mm³ per extruder, `material_ids` per-extruder
    /// material GUIDs that override the configured ones. Griffin gets the
    /// `;START_OF_HEADER` block; every other dialect gets the plain header.
    pub fn file_header(
        &self,
        print_time: Option<f64>,
        filament_used: &[f64],
        material_ids: &[String],
    ) -> Result<String> {
        if self.flavor() == GcodeFlavor::Griffin {
            Ok(self.griffin_header(print_time, filament_used, material_ids))
        } else {
            self.plain_header(print_time, filament_used)
        }
    }

    fn griffin_header(
        &self,
        print_time: Option<f64>,
        filament_used: &[f64],
        material_ids: &[String],
    ) -> String {
        let profile = self.profile();
        let mut header = String::new();
        header.push_str(";START_OF_HEADER\n;HEADER_VERSION:0.1\n;FLAVOR:Griffin\n");
        header.push_str(";GENERATOR.NAME:strata\n");
        header.push_str(&format!(";GENERATOR.VERSION:{}\n", env!("CARGO_PKG_VERSION")));
        header.push_str(&format!(";TARGET_MACHINE.NAME:{}\n", profile.name));

        for (id, state) in self.extruders().used() {
            let n = id.index();
            let config = &profile.extruders[n];
            let prefix = format!(";EXTRUDER_TRAIN.{n}.");
            header.push_str(&format!(
                "{prefix}INITIAL_TEMPERATURE:{}\n",
                fmt_decimal(state.initial_temperature, 1)
            ));
            if let Some(volume) = filament_used.get(n) {
                header.push_str(&format!(
                    "{prefix}MATERIAL.VOLUME_USED:{}\n",
                    volume.round() as i64
                ));
            }
            let guid = material_ids
                .get(n)
                .map_or(config.material_guid.as_str(), String::as_str);
            header.push_str(&format!("{prefix}MATERIAL.GUID:{guid}\n"));
            header.push_str(&format!(
                "{prefix}NOZZLE.DIAMETER:{}\n",
                fmt_decimal(config.nozzle_diameter, 2)
            ));
            header.push_str(&format!("{prefix}NOZZLE.NAME:{}\n", config.nozzle_name));
        }

        header.push_str(&format!(";BUILD_PLATE.TYPE:{}\n", profile.buildplate_type));
        header.push_str(&format!(
            ";BUILD_PLATE.INITIAL_TEMPERATURE:{}\n",
            fmt_decimal(self.state().initial_bed_temperature, 1)
        ));
        if let Some(seconds) = print_time {
            header.push_str(&format!(";PRINT.TIME:{}\n", seconds.round() as i64));
        }
        header.push_str(";PRINT.GROUPS:1\n");
        let (min, max) = self.print_bounds();
        for (axis, lo, hi) in [('X', min.x, max.x), ('Y', min.y, max.y), ('Z', min.z, max.z)] {
            header.push_str(&format!(";PRINT.SIZE.MIN.{axis}:{}\n", fmt_coord(lo)));
            header.push_str(&format!(";PRINT.SIZE.MAX.{axis}:{}\n", fmt_coord(hi)));
        }
        header.push_str(";END_OF_HEADER\n");
        header
    }

    fn plain_header(&self, print_time: Option<f64>, filament_used: &[f64]) -> Result<String> {
        let flavor = self.flavor();
        let mut header = String::new();
        header.push_str(&format!(";FLAVOR:{}\n", flavor.name()));
        let time = print_time.map_or(PLACEHOLDER_PRINT_TIME, |seconds| seconds.round() as u64);
        header.push_str(&format!(";TIME:{time}\n"));

        if flavor == GcodeFlavor::UltiGCode {
            let first = filament_used.first().copied().unwrap_or(0.0);
            let second = filament_used.get(1).copied().unwrap_or(0.0);
            header.push_str(&format!(";MATERIAL:{}\n", first.round() as i64));
            header.push_str(&format!(";MATERIAL2:{}\n", second.round() as i64));
            let nozzle = self.profile().extruders[0].nozzle_diameter;
            header.push_str(&format!(";NOZZLE_DIAMETER:{}\n", fmt_decimal(nozzle, 2)));
        } else if flavor.reports_filament_in_metres() && !filament_used.is_empty() {
            let mut amounts = Vec::with_capacity(filament_used.len());
            for (index, volume) in filament_used.iter().enumerate() {
                let amount = match self.extruders().id(index) {
                    Ok(id) if !flavor.is_volumetric() => {
                        let metres = self.extruders().get(id).units.volume_to_length(*volume)?
                            / 1000.0;
                        format!("{}m", fmt_decimal(metres, 5))
                    }
                    _ => format!("{}mm3", fmt_decimal(*volume, 2)),
                };
                amounts.push(amount);
            }
            header.push_str(&format!(";Filament used: {}\n", amounts.join(", ")));
        }

        let (min, max) = self.print_bounds();
        for (name, value) in [
            ("MINX", min.x),
            ("MINY", min.y),
            ("MINZ", min.z),
            ("MAXX", max.x),
            ("MAXY", max.y),
            ("MAXZ", max.z),
        ] {
            header.push_str(&format!(";{name}:{}\n", fmt_decimal(coord_to_mm(value), 3)));
        }
        Ok(header)
    }

    /// Emitted bounds, or a zero box before anything was emitted.
    fn print_bounds(&self) -> (IntPoint3, IntPoint3) {
        let bounds = self.bounding_box();
        if bounds.is_defined() {
            (bounds.min, bounds.max)
        } else {
            (IntPoint3::default(), IntPoint3::default())
        }
    }
}
