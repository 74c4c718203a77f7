//! Threshold Training
//!
//! ## Overview
//!
//! Training turns history into the parameter table: for every room with
//! enough usable deltas in the training window, it computes one
//! temperature and one humidity threshold from the distribution of
//! absolute delta magnitudes, then persists the whole table at once.
//!
//! ## Statistic
//!
//! The default statistic is the 95th percentile of the magnitudes. The
//! intuition: almost all observed changes are routine drift, so the top
//! edge of the routine distribution separates "normal" from "somebody
//! opened a window". The statistic is a policy knob, not a contract;
//! [`ThresholdStatistic::MeanPlusStdDev`] is offered for rooms whose
//! drift is roughly Gaussian.
//!
//! ## Failure discipline
//!
//! A room with too little history is skipped and listed in the report;
//! skips never fail the run. The run fails only when the history cannot
//! be fetched, when *no* room is trainable (an empty table would be
//! useless), or when the final save does not land.

use crate::constants::{
    DEFAULT_MIN_TRAINING_ROWS, DEFAULT_THRESHOLD_PERCENTILE, DEFAULT_TRAINING_LOOKBACK_MS,
};
use crate::errors::{SourceError, TrainError, TrainResult};
use crate::features::{build_features, group_by_room};
use crate::params::{ParameterSet, ThresholdParams};
use crate::reading::RoomId;
use crate::source::{concat_chunks, QuerySource, SeriesQuery, TimeRange};
use crate::time::TimeSource;

#[cfg(feature = "std")]
use crate::store::ParameterStore;

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, collections::BTreeSet, vec::Vec};
#[cfg(feature = "std")]
use std::{collections::BTreeSet, vec::Vec};

/// How per-room delta magnitudes aggregate into a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdStatistic {
    /// The given percentile (as a fraction in `0.0..=1.0`, clamped) of
    /// the magnitudes, with linear interpolation between ranks.
    Percentile(f32),
    /// Mean plus the given multiple of the population standard deviation.
    MeanPlusStdDev(f32),
}

/// Tunable knobs of a training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingPolicy {
    /// Aggregation applied per room and quantity.
    pub statistic: ThresholdStatistic,
    /// Minimum feature rows a room needs to be trained. Values below
    /// one are raised to one; an empty room can never train.
    pub min_rows: usize,
    /// How far back the training query reaches.
    pub lookback_ms: u64,
}

impl Default for TrainingPolicy {
    fn default() -> Self {
        Self {
            statistic: ThresholdStatistic::Percentile(DEFAULT_THRESHOLD_PERCENTILE),
            min_rows: DEFAULT_MIN_TRAINING_ROWS,
            lookback_ms: DEFAULT_TRAINING_LOOKBACK_MS,
        }
    }
}

impl TrainingPolicy {
    /// Replace the aggregation statistic.
    pub fn with_statistic(mut self, statistic: ThresholdStatistic) -> Self {
        self.statistic = statistic;
        self
    }

    /// Replace the per-room row minimum.
    pub fn with_min_rows(mut self, min_rows: usize) -> Self {
        self.min_rows = min_rows;
        self
    }

    /// Replace the training lookback window.
    pub fn with_lookback(mut self, window_ms: u64) -> Self {
        self.lookback_ms = window_ms;
        self
    }
}

/// What a training run did, room by room.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainingReport {
    /// Rooms that received fresh thresholds, in room order.
    pub trained_rooms: Vec<RoomId>,
    /// Rooms skipped for thin history, with the rows they had.
    pub skipped: Vec<(RoomId, usize)>,
    /// Total feature rows the run was based on.
    pub rows_seen: usize,
}

/// Computes and persists per-room thresholds from historical readings.
pub struct Trainer<S: QuerySource> {
    source: S,
    policy: TrainingPolicy,
    clock: Box<dyn TimeSource>,
}

impl<S: QuerySource> Trainer<S> {
    /// Create a trainer with the default policy.
    pub fn new(source: S, clock: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            policy: TrainingPolicy::default(),
            clock,
        }
    }

    /// Replace the training policy.
    pub fn with_policy(mut self, policy: TrainingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Access the underlying query source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Compute a fresh parameter set without persisting it.
    ///
    /// Queries every room over the policy lookback in a single fetch,
    /// builds features, and aggregates per room. Returns the set and the
    /// per-room report; see the module docs for the failure discipline.
    pub fn train_set(&self) -> TrainResult<(ParameterSet, TrainingReport)> {
        let now = self.clock.now();
        let query = SeriesQuery::all_rooms(TimeRange::lookback(now, self.policy.lookback_ms));

        let chunks = match self.source.fetch(&query) {
            Ok(chunks) => chunks,
            // "Nothing matched" and "empty result" train identically.
            Err(SourceError::NoData) => Vec::new(),
            Err(e) => return Err(TrainError::DataUnavailable(e)),
        };

        let readings = concat_chunks(chunks);
        let features = build_features(&readings);
        let grouped = group_by_room(&features);

        let mut params = ParameterSet::new();
        let mut report = TrainingReport {
            rows_seen: features.len(),
            ..TrainingReport::default()
        };

        // Rooms come from the raw readings: a room whose samples produced
        // no delta at all still deserves a skip entry, not silence.
        let seen: BTreeSet<RoomId> = readings.iter().map(|r| r.room).collect();

        // An empty room has nothing to aggregate, whatever the policy
        // minimum says.
        let required = self.policy.min_rows.max(1);

        for room in seen {
            let rows = grouped.get(&room).map(Vec::as_slice).unwrap_or(&[]);
            if rows.len() < required {
                log_warn!(
                    "skipping {}: {} usable rows, {} required",
                    room,
                    rows.len(),
                    required
                );
                report.skipped.push((room, rows.len()));
                continue;
            }

            let temperature: Vec<f32> = rows.iter().map(|r| r.delta_temperature.abs()).collect();
            let humidity: Vec<f32> = rows.iter().map(|r| r.delta_humidity.abs()).collect();

            let thresholds = ThresholdParams::new(
                self.policy.statistic.aggregate(temperature),
                self.policy.statistic.aggregate(humidity),
            );
            debug_assert!(thresholds.is_valid());

            params.insert(room, thresholds);
            report.trained_rooms.push(room);
        }

        if params.is_empty() {
            return Err(TrainError::NoTrainableRooms);
        }

        log_info!(
            "trained {} rooms, skipped {}",
            report.trained_rooms.len(),
            report.skipped.len()
        );
        Ok((params, report))
    }

    /// Run a full training pass: compute the set and replace the stored
    /// table. Nothing is written when the run fails.
    #[cfg(feature = "std")]
    pub fn train(&self, store: &ParameterStore) -> TrainResult<TrainingReport> {
        let (params, report) = self.train_set()?;

        store.save(&params).map_err(|e| TrainError::Store {
            detail: e.to_string(),
        })?;

        log_info!(
            "parameter table with {} rooms saved to {}",
            params.len(),
            store.path().display()
        );
        Ok(report)
    }
}

impl ThresholdStatistic {
    /// Aggregate a room's magnitudes into one threshold.
    ///
    /// Caller guarantees at least one value; feature building guarantees
    /// all values are finite.
    fn aggregate(&self, mut magnitudes: Vec<f32>) -> f32 {
        debug_assert!(!magnitudes.is_empty());
        match self {
            Self::Percentile(q) => {
                magnitudes.sort_unstable_by(f32::total_cmp);
                percentile_sorted(&magnitudes, q.clamp(0.0, 1.0))
            }
            Self::MeanPlusStdDev(k) => mean_plus_stddev(&magnitudes, *k),
        }
    }
}

/// Percentile with linear interpolation between adjacent ranks.
fn percentile_sorted(sorted: &[f32], q: f32) -> f32 {
    if sorted.len() == 1 {
        return sorted[0];
    }

    let rank = q * (sorted.len() - 1) as f32;
    let lo = rank as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let fraction = rank - lo as f32;

    sorted[lo] + (sorted[hi] - sorted[lo]) * fraction
}

fn mean_plus_stddev(values: &[f32], k: f32) -> f32 {
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f32>()
        / n;

    // libm keeps this path available without std
    mean + k * libm::sqrtf(variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use crate::source::MemorySource;
    use crate::time::{FixedClock, Timestamp};

    const NOW: Timestamp = 1_000_000_000;

    fn room(name: &str) -> RoomId {
        RoomId::new(name).unwrap()
    }

    /// Readings at a fixed cadence whose consecutive temperature deltas
    /// cycle through `temp_steps` (humidity stays flat).
    fn stepped_readings(name: &str, temp_steps: &[f32], count: usize) -> Vec<Reading> {
        let mut rows = Vec::new();
        let mut temp = 20.0;
        for i in 0..count {
            rows.push(Reading::new(
                room(name),
                NOW - (count as u64 - i as u64) * 60_000,
                temp,
                50.0,
            ));
            temp += temp_steps[i % temp_steps.len()];
        }
        rows
    }

    fn trainer(source: MemorySource, policy: TrainingPolicy) -> Trainer<MemorySource> {
        Trainer::new(source, Box::new(FixedClock::new(NOW))).with_policy(policy)
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(percentile_sorted(&sorted, 0.5), 3.0);
        assert!((percentile_sorted(&sorted, 0.95) - 4.8).abs() < 1e-6);
        assert_eq!(percentile_sorted(&sorted, 1.0), 5.0);
    }

    #[test]
    fn percentile_of_single_value_is_that_value() {
        assert_eq!(percentile_sorted(&[2.5], 0.95), 2.5);
    }

    #[test]
    fn mean_plus_stddev_matches_hand_computation() {
        // mean 5, population stddev 2
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean_plus_stddev(&values, 1.0) - 7.0).abs() < 1e-6);
        assert!((mean_plus_stddev(&values, 0.0) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn trains_each_room_on_its_own_distribution() {
        let mut readings = stepped_readings("bedroom", &[0.5, -0.5], 20);
        readings.extend(stepped_readings("kitchen", &[2.0, -2.0], 20));

        let policy = TrainingPolicy::default()
            .with_min_rows(4)
            .with_statistic(ThresholdStatistic::Percentile(1.0));
        let t = trainer(MemorySource::from_readings(readings), policy);

        let (params, report) = t.train_set().unwrap();

        assert_eq!(report.trained_rooms, vec![room("bedroom"), room("kitchen")]);
        let bedroom = params.get(&room("bedroom")).unwrap();
        let kitchen = params.get(&room("kitchen")).unwrap();
        assert!((bedroom.delta_temperature_threshold - 0.5).abs() < 1e-4);
        assert!((kitchen.delta_temperature_threshold - 2.0).abs() < 1e-4);
    }

    #[test]
    fn magnitudes_ignore_delta_sign() {
        // Strictly falling temperature: all raw deltas negative.
        let readings = stepped_readings("cellar", &[-1.0], 12);
        let policy = TrainingPolicy::default()
            .with_min_rows(4)
            .with_statistic(ThresholdStatistic::Percentile(1.0));
        let t = trainer(MemorySource::from_readings(readings), policy);

        let (params, _) = t.train_set().unwrap();
        let cellar = params.get(&room("cellar")).unwrap();
        assert!((cellar.delta_temperature_threshold - 1.0).abs() < 1e-4);
    }

    #[test]
    fn thin_rooms_are_skipped_but_run_succeeds() {
        let mut readings = stepped_readings("bedroom", &[0.5], 20);
        // Three samples make two feature rows, below the minimum of 8.
        readings.extend(stepped_readings("closet", &[0.5], 3));

        let policy = TrainingPolicy::default().with_min_rows(8);
        let t = trainer(MemorySource::from_readings(readings), policy);

        let (params, report) = t.train_set().unwrap();

        assert!(params.get(&room("bedroom")).is_some());
        assert!(params.get(&room("closet")).is_none());
        assert_eq!(report.skipped, vec![(room("closet"), 2)]);
    }

    #[test]
    fn zero_minimum_still_skips_rooms_without_deltas() {
        let mut readings = stepped_readings("bedroom", &[0.5], 12);
        // A single sample forms no delta, so there is nothing to
        // aggregate at any minimum.
        readings.extend(stepped_readings("hallway", &[0.0], 1));

        let policy = TrainingPolicy::default().with_min_rows(0);
        let t = trainer(MemorySource::from_readings(readings), policy);

        let (params, report) = t.train_set().unwrap();

        assert!(params.get(&room("bedroom")).is_some());
        assert!(params.get(&room("hallway")).is_none());
        assert_eq!(report.skipped, vec![(room("hallway"), 0)]);
    }

    #[test]
    fn lone_sample_room_cannot_train_under_any_statistic() {
        let readings = stepped_readings("hallway", &[0.0], 1);
        let policy = TrainingPolicy::default()
            .with_min_rows(0)
            .with_statistic(ThresholdStatistic::MeanPlusStdDev(1.0));
        let t = trainer(MemorySource::from_readings(readings), policy);

        assert_eq!(t.train_set().unwrap_err(), TrainError::NoTrainableRooms);
    }

    #[test]
    fn all_rooms_skipped_fails_without_writing() {
        let readings = stepped_readings("bedroom", &[0.5], 3);
        let policy = TrainingPolicy::default().with_min_rows(100);
        let t = trainer(MemorySource::from_readings(readings), policy);

        assert_eq!(t.train_set().unwrap_err(), TrainError::NoTrainableRooms);
    }

    #[test]
    fn empty_history_fails_with_no_trainable_rooms() {
        let t = trainer(MemorySource::new(), TrainingPolicy::default());
        assert_eq!(t.train_set().unwrap_err(), TrainError::NoTrainableRooms);
    }

    #[test]
    fn source_failure_maps_to_data_unavailable() {
        let source = MemorySource::new().failing_with(SourceError::Timeout);
        let t = trainer(source, TrainingPolicy::default());

        assert_eq!(
            t.train_set().unwrap_err(),
            TrainError::DataUnavailable(SourceError::Timeout)
        );
    }

    #[test]
    fn training_queries_all_rooms_once() {
        let readings = stepped_readings("bedroom", &[0.5], 12);
        let policy = TrainingPolicy::default().with_min_rows(4);
        let t = trainer(MemorySource::from_readings(readings), policy);

        t.train_set().unwrap();
        assert_eq!(t.source().fetch_count(), 1);
    }

    #[cfg(feature = "std")]
    mod persistence {
        use super::*;
        use crate::params::LoadOutcome;
        use crate::store::ParameterStore;
        use tempfile::tempdir;

        #[test]
        fn train_persists_a_loadable_table() {
            let dir = tempdir().unwrap();
            let store = ParameterStore::new(dir.path());

            let readings = stepped_readings("bedroom", &[0.5], 12);
            let policy = TrainingPolicy::default().with_min_rows(4);
            let t = trainer(MemorySource::from_readings(readings), policy);

            let report = t.train(&store).unwrap();
            assert_eq!(report.trained_rooms, vec![room("bedroom")]);

            match store.load() {
                LoadOutcome::Loaded(params) => {
                    assert!(params.get(&room("bedroom")).is_some());
                }
                other => panic!("expected loaded table, got {:?}", other),
            }
        }

        #[test]
        fn failed_save_fails_the_run() {
            let dir = tempdir().unwrap();
            // A plain file where the model root should be makes every
            // directory creation below it fail.
            let blocker = dir.path().join("occupied");
            std::fs::write(&blocker, b"").unwrap();
            let store = ParameterStore::new(&blocker);

            let readings = stepped_readings("bedroom", &[0.5], 12);
            let policy = TrainingPolicy::default().with_min_rows(4);
            let t = trainer(MemorySource::from_readings(readings), policy);

            assert!(matches!(
                t.train(&store).unwrap_err(),
                TrainError::Store { .. }
            ));
        }

        #[test]
        fn failed_run_leaves_previous_table_untouched() {
            let dir = tempdir().unwrap();
            let store = ParameterStore::new(dir.path());

            let readings = stepped_readings("bedroom", &[0.5], 12);
            let policy = TrainingPolicy::default().with_min_rows(4);
            trainer(MemorySource::from_readings(readings), policy)
                .train(&store)
                .unwrap();
            let before = store.load();

            // Second run finds nothing trainable and must not write.
            let t = trainer(MemorySource::new(), TrainingPolicy::default());
            assert_eq!(t.train(&store).unwrap_err(), TrainError::NoTrainableRooms);
            assert_eq!(store.load(), before);
        }
    }
}
