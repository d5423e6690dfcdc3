//! Error types for the slicer.

use thiserror::Error;

/// Errors that can occur while preparing toolpath geometry.
#[derive(Error, Debug)]
pub enum SlicerError {
    /// Invalid reinforcement or geometry settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Result type for slicer operations.
pub type Result<T> = std::result::Result<T, SlicerError>;
