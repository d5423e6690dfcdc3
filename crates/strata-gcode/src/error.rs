//! Error types for G-code emission.

use thiserror::Error;

/// Errors from G-code emission.
#[derive(Error, Debug)]
pub enum GcodeError {
    /// A non-volumetric extruder has no usable filament cross-section.
    #[error("extruder {extruder} has invalid filament area {area} mm²")]
    InvalidFilamentArea {
        /// Extruder index.
        extruder: usize,
        /// Offending area.
        area: f64,
    },

    /// Extruder index outside the configured extruders.
    #[error("extruder {index} out of range ({count} configured)")]
    ExtruderOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of configured extruders.
        count: usize,
    },

    /// Unrecognised G-code flavor name.
    #[error("unknown G-code flavor: {0}")]
    UnknownFlavor(String),

    /// Invalid printer or retraction settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Settings could not be decoded.
    #[error("settings JSON error: {0}")]
    SettingsJson(#[from] serde_json::Error),

    /// A move was requested before any extruder was started.
    #[error("no extruder has been started")]
    ExtruderNotStarted,

    /// An extrusion was requested while the active extruder is retracted.
    #[error("extruder {0} is retracted; unretract before extruding")]
    ExtrudeWhileRetracted(usize),

    /// The E axis was rebased while the active extruder is retracted.
    #[error("cannot reset the extrusion value while extruder {0} is retracted")]
    ResetWhileRetracted(usize),

    /// The output sink rejected a write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GcodeError {
    /// Whether this error is a configuration fault that must abort the export.
    pub fn is_config_fault(&self) -> bool {
        matches!(
            self,
            GcodeError::InvalidFilamentArea { .. }
                | GcodeError::ExtruderOutOfRange { .. }
                | GcodeError::UnknownFlavor(_)
                | GcodeError::InvalidSettings(_)
                | GcodeError::SettingsJson(_)
        )
    }
}

/// Result type for G-code emission.
pub type Result<T> = std::result::Result<T, GcodeError>;
