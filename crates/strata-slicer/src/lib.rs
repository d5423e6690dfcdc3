#![warn(missing_docs)]

//! Toolpath geometry for the strata slicer.
//!
//! This crate holds the geometry handed to G-code emission: closed contours,
//! the feature tags attached to every move, and the fiber reinforcement rings
//! derived from wall insets.
//!
//! # Example
//!
//! ```ignore
//! use strata_slicer::{generate_layer_reinforcement, ReinforcementSettings, SliceLayer};
//!
//! let mut layers: Vec<SliceLayer> = build_layers_with_insets();
//! let settings = ReinforcementSettings {
//!     enabled: true,
//!     ..Default::default()
//! };
//! generate_layer_reinforcement(&mut layers, &settings)?;
//! ```

pub mod error;
pub mod feature;
pub mod path;
pub mod reinforcement;

pub use error::{Result, SlicerError};
pub use feature::PrintFeatureType;
pub use path::Polygon;
pub use reinforcement::{
    generate_layer_reinforcement, generate_reinforcement_insets, ReinforcementSettings,
    SliceLayer, SliceLayerPart,
};
