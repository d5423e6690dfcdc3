#![warn(missing_docs)]

//! G-code emission for the strata slicer.
//!
//! [`GcodeExport`] is the state machine between a slicer's toolpaths and a
//! printer's firmware. It tracks nozzle position, per-extruder retraction and
//! filament use, temperatures and fans, elides redundant commands, and writes
//! one of several firmware dialects ([`GcodeFlavor`]).
//!
//! # Example
//!
//! ```
//! use strata_gcode::{GcodeExport, PrinterProfile};
//! use strata_math::IntPoint;
//! use strata_slicer::PrintFeatureType;
//!
//! let profile = PrinterProfile::generic();
//! let retraction = profile.retraction.clone();
//! let mut export = GcodeExport::new(Vec::new(), profile)?;
//! export.start_extruder(0)?;
//! export.set_layer_z(200);
//! export.travel_xy(IntPoint::new(10_000, 10_000), 150.0)?;
//! export.extrude_xy(IntPoint::new(30_000, 10_000), 40.0, 0.08, PrintFeatureType::OuterWall, false)?;
//! export.retract(&retraction, false, false)?;
//! export.finalize("M84")?;
//!
//! let gcode = String::from_utf8(export.into_inner()).unwrap();
//! assert!(gcode.contains("G1 F2700 E"));
//! # Ok::<(), strata_gcode::GcodeError>(())
//! ```

pub mod error;
pub mod estimate;
pub mod export;
pub mod extruder;
pub mod flavor;
pub mod formatter;
mod header;
pub mod printer;
pub mod retraction;
pub mod state;
pub mod units;

pub use error::{GcodeError, Result};
pub use estimate::{FeatureDurations, TimeEstimator, TrapezoidEstimator};
pub use export::GcodeExport;
pub use extruder::{ExtruderId, ExtruderState, ExtruderTable};
pub use flavor::GcodeFlavor;
pub use formatter::GcodeFormatter;
pub use printer::{ExtruderConfig, FlowCompensation, PrinterProfile};
pub use retraction::{RetractionConfig, RetractionHistory};
pub use state::MachineState;
pub use units::ExtrusionUnits;
