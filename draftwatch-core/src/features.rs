//! Delta Feature Construction
//!
//! ## Overview
//!
//! The predictor never looks at absolute temperatures: a bedroom at 17 °C
//! and a living room at 23 °C are both "normal". What a freshly opened
//! window produces is a fast *change*, so the model's only features are
//! the consecutive-sample deltas of temperature and humidity per room.
//!
//! ## Pipeline position
//!
//! Feature building sits between the query source and both consumers:
//!
//! ```text
//! QuerySource → [Reading] → build_features → [FeatureRow] → Predictor
//!                                                         → Trainer
//! ```
//!
//! The functions here are pure. They take a batch, return derived rows,
//! and leave the input untouched, so predictor and trainer share one
//! code path and identical inputs always produce identical features.
//!
//! ## Row discipline
//!
//! A room's first sample in a batch has no predecessor and yields no row.
//! A delta touching a missing (NaN) measurement is dropped whole. Both
//! rules exist so that no fabricated zero ever reaches the threshold
//! comparison, where it would read as "no change observed".

use crate::reading::{Reading, RoomId};
use crate::time::Timestamp;

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, vec::Vec};
#[cfg(feature = "std")]
use std::{collections::BTreeMap, vec::Vec};

/// One derived sample: how fast the room climate moved at `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureRow {
    /// Room the delta belongs to.
    pub room: RoomId,
    /// Timestamp of the later sample of the pair.
    pub timestamp: Timestamp,
    /// Signed temperature change since the previous sample (°C).
    pub delta_temperature: f32,
    /// Signed humidity change since the previous sample (percentage points).
    pub delta_humidity: f32,
}

/// Build delta features from a batch of readings.
///
/// Groups by room, sorts each group by timestamp (stable, so equal
/// timestamps keep their source order), and emits the consecutive
/// differences. Output rows are chronological within a room, with rooms
/// in name order.
pub fn build_features(readings: &[Reading]) -> Vec<FeatureRow> {
    let mut by_room: BTreeMap<RoomId, Vec<Reading>> = BTreeMap::new();
    for reading in readings {
        by_room.entry(reading.room).or_default().push(*reading);
    }

    let mut rows = Vec::new();
    for (room, mut samples) in by_room {
        samples.sort_by_key(|r| r.timestamp);

        for pair in samples.windows(2) {
            let delta_temperature = pair[1].temperature - pair[0].temperature;
            let delta_humidity = pair[1].humidity - pair[0].humidity;

            // A NaN on either side poisons the delta; drop the row whole.
            if !delta_temperature.is_finite() || !delta_humidity.is_finite() {
                continue;
            }

            rows.push(FeatureRow {
                room,
                timestamp: pair[1].timestamp,
                delta_temperature,
                delta_humidity,
            });
        }
    }

    rows
}

/// Select each room's most recent feature row.
///
/// With equal timestamps the row appearing later in the slice wins,
/// which after [`build_features`] is the later source row.
pub fn latest_per_room(rows: &[FeatureRow]) -> BTreeMap<RoomId, FeatureRow> {
    let mut latest: BTreeMap<RoomId, FeatureRow> = BTreeMap::new();
    for row in rows {
        match latest.get(&row.room) {
            Some(existing) if existing.timestamp > row.timestamp => {}
            _ => {
                latest.insert(row.room, *row);
            }
        }
    }
    latest
}

/// Group feature rows by room, preserving their order within each room.
pub fn group_by_room(rows: &[FeatureRow]) -> BTreeMap<RoomId, Vec<FeatureRow>> {
    let mut grouped: BTreeMap<RoomId, Vec<FeatureRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.room).or_default().push(*row);
    }
    grouped
}
