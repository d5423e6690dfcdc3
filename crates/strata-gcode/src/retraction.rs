//! Retraction settings and the recent-retraction window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{GcodeError, Result};

/// How far and how fast filament is withdrawn and restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetractionConfig {
    /// Retraction distance (mm of filament).
    pub distance: f64,
    /// Retraction speed (mm/s).
    pub speed: f64,
    /// Un-retraction (prime) speed (mm/s).
    pub prime_speed: f64,
    /// Extra material added on the following prime (mm³).
    pub prime_volume: f64,
    /// Maximum retractions inside one extrusion window.
    pub retraction_count_max: usize,
    /// Extrusion window (mm of filament) for `retraction_count_max`.
    pub retraction_extrusion_window: f64,
}

impl Default for RetractionConfig {
    fn default() -> Self {
        Self {
            distance: 5.0,
            speed: 45.0,
            prime_speed: 45.0,
            prime_volume: 0.0,
            retraction_count_max: 90,
            retraction_extrusion_window: 10.0,
        }
    }
}

impl RetractionConfig {
    /// Retraction used when swapping filament between extruders.
    pub fn extruder_switch() -> Self {
        Self {
            distance: 16.0,
            speed: 20.0,
            prime_speed: 20.0,
            ..Default::default()
        }
    }

    /// Reject negative or non-finite settings.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("distance", self.distance),
            ("speed", self.speed),
            ("prime_speed", self.prime_speed),
            ("prime_volume", self.prime_volume),
            ("retraction_extrusion_window", self.retraction_extrusion_window),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(GcodeError::InvalidSettings(format!(
                    "retraction {name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.distance > 0.0 && (self.speed <= 0.0 || self.prime_speed <= 0.0) {
            return Err(GcodeError::InvalidSettings(
                "retraction speeds must be positive when retracting".into(),
            ));
        }
        Ok(())
    }
}

/// Extruded volumes (mm³) at the most recent retractions, newest first.
///
/// Holds at most `capacity` entries; pushing onto a full history evicts the
/// oldest one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetractionHistory {
    entries: VecDeque<f64>,
    capacity: usize,
}

impl RetractionHistory {
    /// Empty history holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, dropping the oldest entries that no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.entries.truncate(capacity);
    }

    /// Number of recorded retractions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no retraction is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once `capacity` retractions are recorded.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Volume at the oldest recorded retraction.
    pub fn oldest(&self) -> Option<f64> {
        self.entries.back().copied()
    }

    /// Record a retraction, returning the evicted oldest entry if any.
    pub fn push(&mut self, extruded_volume: f64) -> Option<f64> {
        if self.capacity == 0 {
            return None;
        }
        self.entries.push_front(extruded_volume);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Shift every entry down by `volume` after the E axis was rebased.
    pub fn rebase(&mut self, volume: f64) {
        for entry in &mut self.entries {
            *entry -= volume;
        }
    }

    /// Whether a retraction at `extruded_volume` fits the window.
    ///
    /// A full history blocks retractions until `window_volume` more material
    /// has been extruded since the oldest entry.
    pub fn allows(&self, extruded_volume: f64, window_volume: f64) -> bool {
        if self.capacity == 0 {
            return false;
        }
        match self.oldest() {
            Some(oldest) if self.is_full() => extruded_volume >= oldest + window_volume,
            _ => true,
        }
    }

    /// Recorded volumes, newest first.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().copied()
    }

    /// Forget all recorded retractions.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = RetractionHistory::with_capacity(2);
        assert_eq!(history.push(1.0), None);
        assert_eq!(history.push(2.0), None);
        assert_eq!(history.push(3.0), Some(1.0));
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![3.0, 2.0]);
        assert_eq!(history.oldest(), Some(2.0));
    }

    #[test]
    fn test_window() {
        let mut history = RetractionHistory::with_capacity(2);
        assert!(history.allows(0.0, 10.0));
        history.push(0.0);
        history.push(1.0);
        assert!(!history.allows(5.0, 10.0));
        assert!(history.allows(10.0, 10.0));
    }

    #[test]
    fn test_zero_capacity_blocks() {
        let mut history = RetractionHistory::with_capacity(0);
        assert!(!history.allows(100.0, 0.0));
        assert_eq!(history.push(1.0), None);
        assert!(history.is_empty());
    }

    #[test]
    fn test_shrink_drops_oldest() {
        let mut history = RetractionHistory::with_capacity(3);
        history.push(1.0);
        history.push(2.0);
        history.push(3.0);
        history.set_capacity(1);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![3.0]);
    }

    #[test]
    fn test_rebase() {
        let mut history = RetractionHistory::with_capacity(2);
        history.push(12.0);
        history.rebase(10.0);
        assert_eq!(history.oldest(), Some(2.0));
    }

    #[test]
    fn test_validate() {
        assert!(RetractionConfig::default().validate().is_ok());
        let bad = RetractionConfig {
            speed: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().unwrap_err().is_config_fault());
    }
}
