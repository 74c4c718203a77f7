//! Per-Room Threshold Parameters
//!
//! The entire trained state of the model is one small table: for every
//! predictable room, the two delta magnitudes above which a change is
//! attributed to an opened window. [`ParameterSet`] is that table in
//! memory; [`LoadOutcome`] is the tagged result of reading it back from
//! storage, where "no file yet" and "file is garbage" are expected
//! states rather than errors.

use crate::reading::RoomId;

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, string::String};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

/// Trained thresholds for one room.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThresholdParams {
    /// Temperature delta magnitude (°C) above which a window is assumed open.
    pub delta_temperature_threshold: f32,
    /// Humidity delta magnitude (percentage points) above which a window is
    /// assumed open.
    pub delta_humidity_threshold: f32,
}

impl ThresholdParams {
    /// Create a threshold pair.
    pub fn new(delta_temperature_threshold: f32, delta_humidity_threshold: f32) -> Self {
        Self {
            delta_temperature_threshold,
            delta_humidity_threshold,
        }
    }

    /// Check that both thresholds are finite numbers.
    ///
    /// A NaN threshold would make every comparison false and silently
    /// disable the room, so non-finite pairs are rejected wherever a set
    /// crosses a trust boundary (store load, training output).
    pub fn is_valid(&self) -> bool {
        self.delta_temperature_threshold.is_finite() && self.delta_humidity_threshold.is_finite()
    }
}

/// The complete trained parameter table, keyed by room.
///
/// Rooms are unique by construction; inserting a room twice replaces the
/// previous entry and reports it, which load paths treat as corruption.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParameterSet {
    thresholds: BTreeMap<RoomId, ThresholdParams>,
}

impl ParameterSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert thresholds for a room, returning the previous entry if the
    /// room was already present.
    pub fn insert(&mut self, room: RoomId, params: ThresholdParams) -> Option<ThresholdParams> {
        self.thresholds.insert(room, params)
    }

    /// Look up the thresholds for a room.
    pub fn get(&self, room: &RoomId) -> Option<&ThresholdParams> {
        self.thresholds.get(room)
    }

    /// Number of parameterized rooms.
    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    /// Check whether the set holds no rooms at all.
    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Iterate over rooms and their thresholds in room order.
    pub fn iter(&self) -> impl Iterator<Item = (&RoomId, &ThresholdParams)> {
        self.thresholds.iter()
    }
}

/// Result of loading the parameter table from storage.
///
/// Only `Loaded` makes the model predictable. The other three variants
/// all leave the caller unparameterized; they are distinguished so the
/// condition can be logged and reported accurately.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// A well-formed, non-empty table was read.
    Loaded(ParameterSet),
    /// No table exists yet (no file, or a zero-length file).
    Missing,
    /// A table exists but could not be trusted; the whole set is
    /// discarded, never a salvaged subset.
    Malformed(String),
    /// Storage could not be read at all.
    Io(String),
}

impl LoadOutcome {
    /// Extract the parameter set, if one was loaded.
    pub fn into_params(self) -> Option<ParameterSet> {
        match self {
            LoadOutcome::Loaded(params) => Some(params),
            _ => None,
        }
    }
}
