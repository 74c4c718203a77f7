//! Window-Open Prediction
//!
//! ## Overview
//!
//! The predictor answers one question per room: *was a window opened
//! recently?* It fetches the lookback window of readings, derives delta
//! features, and compares each room's most recent delta against that
//! room's trained thresholds. The whole decision is two float
//! comparisons; everything around it is lifecycle discipline.
//!
//! ## States
//!
//! A predictor is either **unparameterized** (no trusted threshold table)
//! or **ready**. Construction never fails: a missing, malformed, or
//! unreadable table is logged and leaves the instance unparameterized,
//! and only a later [`Predictor::predict`] call reports
//! [`PredictError::NotReady`]. This keeps service startup independent of
//! model state.
//!
//! ## Decision rule
//!
//! A room reads "open" when the magnitude of its latest temperature delta
//! *strictly* exceeds the room's temperature threshold, or likewise for
//! humidity. Equality stays closed: thresholds are trained as the upper
//! edge of normal behavior, and the edge itself is still normal. The
//! magnitude comparison makes a winter drop and a summer rise count the
//! same.
//!
//! ## Omission semantics
//!
//! Per-room problems never fail a batch. A room without trained
//! thresholds, or without a computable delta inside the window, is left
//! out of the result map and listed in the report's skip list, so a
//! caller can always tell "closed" apart from "no answer".

use crate::constants::DEFAULT_LOOKBACK_MS;
use crate::errors::{PredictError, PredictResult, SourceError};
use crate::features::{build_features, latest_per_room, FeatureRow};
use crate::params::{LoadOutcome, ParameterSet, ThresholdParams};
use crate::reading::RoomId;
use crate::source::{concat_chunks, QuerySource, SeriesQuery, TimeRange};
use crate::time::{TimeSource, Timestamp};

#[cfg(feature = "std")]
use crate::store::ParameterStore;
#[cfg(feature = "std")]
use crate::time::SystemClock;

#[cfg(not(feature = "std"))]
use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet},
    vec::Vec,
};
#[cfg(feature = "std")]
use std::{
    collections::{BTreeMap, BTreeSet},
    vec::Vec,
};

/// Verdict for one room.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Prediction {
    /// Room the verdict applies to.
    pub room: RoomId,
    /// Whether a recently opened window is assumed.
    pub open: bool,
    /// Timestamp of the delta the verdict is based on.
    ///
    /// This is data time, not wall clock, so callers can judge how stale
    /// the basis is.
    pub evaluated_at: Timestamp,
}

/// Why a requested room is absent from the result map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SkipReason {
    /// The trained parameter table has no entry for the room.
    NoThresholds,
    /// The lookback window held no computable delta for the room.
    NoFeatures,
}

/// Result of one prediction batch.
///
/// Every requested room appears exactly once: either in `predictions` or
/// in `skipped`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredictionReport {
    /// Verdicts for the rooms that could be evaluated, in room order.
    pub predictions: BTreeMap<RoomId, Prediction>,
    /// Rooms left out, with the reason, in room order.
    pub skipped: Vec<(RoomId, SkipReason)>,
}

/// Threshold-based window-open predictor.
///
/// Holds a query source, an optional parameter set, and a clock. Each
/// instance is meant to live for one request; the parameter table is
/// loaded once at construction and never refreshed.
pub struct Predictor<S: QuerySource> {
    source: S,
    params: Option<ParameterSet>,
    clock: Box<dyn TimeSource>,
    lookback_ms: u64,
}

impl<S: QuerySource> Predictor<S> {
    /// Create an unparameterized predictor with an explicit clock.
    pub fn new(source: S, clock: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            params: None,
            clock,
            lookback_ms: DEFAULT_LOOKBACK_MS,
        }
    }

    /// Create a predictor by loading the parameter table from a store.
    ///
    /// Never fails. Whatever the load finds is logged and folded into
    /// the predictor's state; a table problem surfaces later as
    /// [`PredictError::NotReady`].
    #[cfg(feature = "std")]
    pub fn from_store(source: S, store: &ParameterStore) -> Self {
        let outcome = store.load();
        Self::new(source, Box::new(SystemClock)).with_load_outcome(outcome)
    }

    /// Fold a load outcome into the predictor's state, logging it.
    pub fn with_load_outcome(mut self, outcome: LoadOutcome) -> Self {
        match outcome {
            LoadOutcome::Loaded(params) => {
                log_info!("parameter table loaded: {} rooms", params.len());
                self.params = Some(params);
            }
            LoadOutcome::Missing => {
                log_warn!("no trained parameters found; run train first");
            }
            LoadOutcome::Malformed(_reason) => {
                log_warn!("discarding malformed parameter table: {}", _reason);
            }
            LoadOutcome::Io(_detail) => {
                log_error!("parameter table unreadable: {}", _detail);
            }
        }
        self
    }

    /// Use a freshly built parameter set, bypassing storage.
    pub fn with_params(mut self, params: ParameterSet) -> Self {
        self.params = Some(params);
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Box<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the lookback window.
    pub fn with_lookback(mut self, window_ms: u64) -> Self {
        self.lookback_ms = window_ms;
        self
    }

    /// Check whether the predictor holds a trusted parameter table.
    pub fn predictable(&self) -> bool {
        self.params.is_some()
    }

    /// Access the underlying query source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Predict window state for the requested rooms.
    ///
    /// Performs exactly one source fetch over the lookback window and
    /// writes nothing. Duplicate rooms in the request collapse to one
    /// verdict. See the module docs for the omission semantics.
    pub fn predict(&self, rooms: &[RoomId]) -> PredictResult<PredictionReport> {
        let params = self.params.as_ref().ok_or(PredictError::NotReady)?;

        let now = self.clock.now();
        let query = SeriesQuery::for_rooms(rooms, TimeRange::lookback(now, self.lookback_ms));

        let chunks = match self.source.fetch(&query) {
            Ok(chunks) => chunks,
            // An empty window is a per-room condition, not a batch failure.
            Err(SourceError::NoData) => Vec::new(),
            Err(e) => return Err(PredictError::DataUnavailable(e)),
        };

        let readings = concat_chunks(chunks);
        let features = build_features(&readings);
        let latest = latest_per_room(&features);

        let requested: BTreeSet<RoomId> = rooms.iter().copied().collect();
        let mut report = PredictionReport::default();

        for room in requested {
            let thresholds = match params.get(&room) {
                Some(thresholds) => thresholds,
                None => {
                    log_warn!("skipping {}: no trained thresholds", room);
                    report.skipped.push((room, SkipReason::NoThresholds));
                    continue;
                }
            };

            let row = match latest.get(&room) {
                Some(row) => row,
                None => {
                    log_warn!("skipping {}: no usable delta in lookback window", room);
                    report.skipped.push((room, SkipReason::NoFeatures));
                    continue;
                }
            };

            report.predictions.insert(
                room,
                Prediction {
                    room,
                    open: exceeds_thresholds(row, thresholds),
                    evaluated_at: row.timestamp,
                },
            );
        }

        Ok(report)
    }
}

/// Strict magnitude comparison; equality stays closed.
fn exceeds_thresholds(row: &FeatureRow, thresholds: &ThresholdParams) -> bool {
    row.delta_temperature.abs() > thresholds.delta_temperature_threshold
        || row.delta_humidity.abs() > thresholds.delta_humidity_threshold
}
