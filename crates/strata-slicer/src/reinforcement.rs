//! Concentric fiber reinforcement rings derived from wall insets.
//!
//! Each ring is the innermost wall inset pushed further into the part. Rings
//! are simplified and each contour's seam is moved to an obtuse corner.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strata_math::Point2;
use tracing::debug;

use crate::error::{Result, SlicerError};
use crate::path::Polygon;

/// Shortest segment kept when simplifying a ring (mm).
const SIMPLIFY_MIN_SEGMENT: f64 = 0.010;
/// Largest deviation removed when simplifying a ring (mm).
const SIMPLIFY_MAX_DEVIATION: f64 = 0.005;

/// Settings for fiber reinforcement rings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforcementSettings {
    /// Generate reinforcement at all.
    pub enabled: bool,
    /// First reinforced layer.
    pub start_layer: usize,
    /// Number of consecutive reinforced layers.
    pub layer_count: usize,
    /// Maximum number of concentric rings per part.
    pub concentric_rings: usize,
    /// Fiber line width (mm).
    pub fiber_line_width: f64,
    /// Number of plastic walls.
    pub wall_line_count: usize,
    /// Outer wall line width (mm).
    pub wall_line_width_0: f64,
    /// Inner wall line width (mm).
    pub wall_line_width_x: f64,
    /// Minimum length of the first fiber segment when the seam cannot sit on an obtuse corner (mm).
    pub min_fiber_line_length: f64,
}

impl Default for ReinforcementSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_layer: 1,
            layer_count: 10,
            concentric_rings: 2,
            fiber_line_width: 0.9,
            wall_line_count: 2,
            wall_line_width_0: 0.4,
            wall_line_width_x: 0.4,
            min_fiber_line_length: 5.0,
        }
    }
}

impl ReinforcementSettings {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if self.fiber_line_width <= 0.0 {
            return Err(SlicerError::InvalidSettings(
                "fiber_line_width must be positive".into(),
            ));
        }
        if self.wall_line_width_0 <= 0.0 || self.wall_line_width_x <= 0.0 {
            return Err(SlicerError::InvalidSettings(
                "wall line widths must be positive".into(),
            ));
        }
        if self.min_fiber_line_length < 0.0 {
            return Err(SlicerError::InvalidSettings(
                "min_fiber_line_length must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Whether layer `layer_nr` receives reinforcement.
    pub fn applies_to_layer(&self, layer_nr: usize) -> bool {
        self.enabled
            && self.concentric_rings > 0
            && layer_nr >= self.start_layer
            && layer_nr < self.start_layer + self.layer_count
    }

    /// Distance from the innermost wall inset to the centre line of ring `ring`.
    fn ring_offset(&self, ring: usize) -> f64 {
        let inset_offset = if self.wall_line_count > 1 {
            self.wall_line_width_x / 2.0
        } else {
            self.wall_line_width_0 / 2.0
        };
        inset_offset + self.fiber_line_width / 2.0 + self.fiber_line_width * ring as f64
    }
}

/// One connected region of a layer.
#[derive(Debug, Clone, Default)]
pub struct SliceLayerPart {
    /// Wall insets from outside to inside; each inset may hold several contours.
    pub insets: Vec<Vec<Polygon>>,
    /// Reinforcement rings from outside to inside.
    pub fiber_insets: Vec<Vec<Polygon>>,
}

/// A single layer handed to reinforcement generation.
#[derive(Debug, Clone, Default)]
pub struct SliceLayer {
    /// Layer index (0 = first layer).
    pub index: usize,
    /// Parts on this layer.
    pub parts: Vec<SliceLayerPart>,
}

/// Generate reinforcement rings for one part, replacing any previous rings.
///
/// Only reads and writes `part`, so parts and layers can be processed in parallel.
pub fn generate_reinforcement_insets(
    part: &mut SliceLayerPart,
    settings: &ReinforcementSettings,
    layer_nr: usize,
) {
    part.fiber_insets.clear();
    if !settings.applies_to_layer(layer_nr) {
        return;
    }
    let Some(innermost) = part.insets.last() else {
        return;
    };

    for ring in 0..settings.concentric_rings {
        let distance = settings.ring_offset(ring);
        let mut contours: Vec<Polygon> = innermost
            .iter()
            .filter_map(|poly| poly.offset(distance))
            .collect();

        for poly in &mut contours {
            poly.simplify(SIMPLIFY_MIN_SEGMENT, SIMPLIFY_MAX_DEVIATION);
            poly.remove_degenerate_verts();
        }
        let before = contours.len();
        contours.retain(|poly| !poly.is_empty());
        if contours.len() < before {
            debug!(
                layer = layer_nr,
                ring,
                dropped = before - contours.len(),
                "dropped degenerate reinforcement contours"
            );
        }

        if contours.is_empty() {
            break;
        }

        for poly in &mut contours {
            place_seam(poly, settings.min_fiber_line_length);
        }
        part.fiber_insets.push(contours);
    }
}

/// Generate reinforcement rings for every part of every layer, in parallel per layer.
pub fn generate_layer_reinforcement(
    layers: &mut [SliceLayer],
    settings: &ReinforcementSettings,
) -> Result<()> {
    settings.validate()?;
    layers.par_iter_mut().for_each(|layer| {
        let layer_nr = layer.index;
        for part in &mut layer.parts {
            generate_reinforcement_insets(part, settings, layer_nr);
        }
    });
    Ok(())
}

/// Move the start of `poly` to an obtuse corner.
///
/// Without an obtuse corner, a new start point is inserted on the first edge
/// longer than `min_line_length`, far enough from the old start that the first
/// segment is at least `min_line_length` long (or half the edge).
fn place_seam(poly: &mut Polygon, min_line_length: f64) {
    if let Some(start) = poly.first_obtuse_corner() {
        poly.rotate_start(start);
        return;
    }

    let p0 = poly.points[0];
    let edge_end = poly
        .points
        .iter()
        .skip(1)
        .find(|p| (**p - p0).norm() > min_line_length)
        .copied();

    if let Some(p1) = edge_end {
        let edge = p1 - p0;
        let length = edge.norm();
        let ratio = (length / 2.0).max(min_line_length) / length;
        let start = Point2::from(p0.coords + edge * ratio);
        poly.points.push(p0);
        poly.points[0] = start;
    }
}
