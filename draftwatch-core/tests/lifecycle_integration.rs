//! End-to-end lifecycle tests: train on history, persist, reload, predict.
//!
//! These run the same path a deployed service takes, over deterministic
//! synthetic history and a pinned clock: routine drift for two rooms, a
//! window event at the very end for one of them, and a third room with
//! too little history to be trainable.

use draftwatch_core::{
    FixedClock, MemorySource, ParameterStore, PredictError, Predictor, Reading, RoomId, SkipReason,
    Timestamp, Trainer,
};
use tempfile::tempdir;

/// Pinned "now" for every clock in these tests.
const NOW: Timestamp = 1_735_000_000_000;

/// Sampling interval of the synthetic history.
const INTERVAL_MS: u64 = 4 * 60_000;

fn room(name: &str) -> RoomId {
    RoomId::new(name).unwrap()
}

/// Synthetic history: `count` samples every four minutes, ending two
/// minutes before NOW. Routine transitions alternate ±0.2 °C and
/// ∓1.0 %RH; the final transition is overridden per test.
fn history(name: &str, count: usize, final_temp_step: f32, final_hum_step: f32) -> Vec<Reading> {
    let mut rows = Vec::with_capacity(count);
    let mut temp = 20.0_f32;
    let mut hum = 45.0_f32;

    for i in 0..count {
        let age = (count - 1 - i) as u64 * INTERVAL_MS + 120_000;
        rows.push(Reading::new(room(name), NOW - age, temp, hum));

        if i + 2 == count {
            temp += final_temp_step;
            hum += final_hum_step;
        } else if i % 2 == 0 {
            temp += 0.2;
            hum -= 1.0;
        } else {
            temp -= 0.2;
            hum += 1.0;
        }
    }

    rows
}

/// Two healthy rooms plus one with a single sample. The bedroom ends
/// with a sharp drop and humidity spike, the kitchen stays routine.
fn full_dataset() -> Vec<Reading> {
    let mut rows = history("bedroom", 200, -1.5, 6.0);
    rows.extend(history("kitchen", 200, 0.1, 0.5));
    rows.push(Reading::new(room("attic"), NOW - 3 * INTERVAL_MS, 12.0, 60.0));
    rows
}

fn clock() -> Box<FixedClock> {
    Box::new(FixedClock::new(NOW))
}

#[test]
fn cold_start_reports_not_ready_until_trained() {
    let dir = tempdir().unwrap();
    let store = ParameterStore::new(dir.path());
    let source = MemorySource::from_readings(full_dataset());

    let predictor = Predictor::from_store(source.clone(), &store).with_clock(clock());
    assert!(!predictor.predictable());
    assert_eq!(
        predictor.predict(&[room("bedroom")]),
        Err(PredictError::NotReady)
    );

    Trainer::new(source.clone(), clock()).train(&store).unwrap();

    let predictor = Predictor::from_store(source, &store).with_clock(clock());
    assert!(predictor.predictable());
}

#[test]
fn trained_system_detects_window_event() {
    let dir = tempdir().unwrap();
    let store = ParameterStore::new(dir.path());
    let source = MemorySource::from_readings(full_dataset());

    let report = Trainer::new(source.clone(), clock()).train(&store).unwrap();
    assert_eq!(report.trained_rooms, vec![room("bedroom"), room("kitchen")]);
    assert_eq!(report.skipped, vec![(room("attic"), 0)]);

    // Routine drift tops out at 0.2 °C / 1.0 %RH, so the 95th
    // percentile thresholds land there.
    let params = store.load().into_params().unwrap();
    let bedroom = params.get(&room("bedroom")).unwrap();
    assert!((bedroom.delta_temperature_threshold - 0.2).abs() < 1e-3);
    assert!((bedroom.delta_humidity_threshold - 1.0).abs() < 1e-3);

    let predictor = Predictor::from_store(source, &store).with_clock(clock());
    let report = predictor
        .predict(&[room("bedroom"), room("kitchen"), room("attic")])
        .unwrap();

    let bedroom = report.predictions.get(&room("bedroom")).unwrap();
    assert!(bedroom.open);
    assert_eq!(bedroom.evaluated_at, NOW - 120_000);

    let kitchen = report.predictions.get(&room("kitchen")).unwrap();
    assert!(!kitchen.open);

    assert_eq!(report.skipped, vec![(room("attic"), SkipReason::NoThresholds)]);
}

#[test]
fn corrupted_table_degrades_and_retrain_heals() {
    let dir = tempdir().unwrap();
    let store = ParameterStore::new(dir.path());
    let source = MemorySource::from_readings(full_dataset());

    Trainer::new(source.clone(), clock()).train(&store).unwrap();

    // Sabotage one row; the whole table must fall out of trust.
    let mut contents = std::fs::read_to_string(store.path()).unwrap();
    contents.push_str("bedroom,not-a-number,3.0\n");
    std::fs::write(store.path(), contents).unwrap();

    let predictor = Predictor::from_store(source.clone(), &store).with_clock(clock());
    assert!(!predictor.predictable());

    Trainer::new(source.clone(), clock()).train(&store).unwrap();
    let predictor = Predictor::from_store(source, &store).with_clock(clock());
    assert!(predictor.predictable());
}

#[test]
fn retraining_replaces_the_previous_table() {
    let dir = tempdir().unwrap();
    let store = ParameterStore::new(dir.path());

    let calm = MemorySource::from_readings(history("bedroom", 200, 0.1, 0.5));
    Trainer::new(calm, clock()).train(&store).unwrap();
    let first = store.load().into_params().unwrap();

    // Same room, wilder routine: thresholds must move with the data.
    let wild = MemorySource::from_readings({
        let mut rows = Vec::new();
        let mut temp = 20.0_f32;
        for i in 0..200_usize {
            let age = (199 - i as u64) * INTERVAL_MS + 120_000;
            rows.push(Reading::new(room("bedroom"), NOW - age, temp, 45.0));
            temp += if i % 2 == 0 { 0.8 } else { -0.8 };
        }
        rows
    });
    Trainer::new(wild, clock()).train(&store).unwrap();
    let second = store.load().into_params().unwrap();

    let before = first.get(&room("bedroom")).unwrap();
    let after = second.get(&room("bedroom")).unwrap();
    assert!(after.delta_temperature_threshold > before.delta_temperature_threshold);
}

#[test]
fn separate_instances_agree_on_identical_inputs() {
    let dir = tempdir().unwrap();
    let store = ParameterStore::new(dir.path());
    let source = MemorySource::from_readings(full_dataset());

    Trainer::new(source.clone(), clock()).train(&store).unwrap();

    let first = Predictor::from_store(source.clone(), &store).with_clock(clock());
    let second = Predictor::from_store(source, &store).with_clock(clock());

    let rooms = [room("bedroom"), room("kitchen")];
    assert_eq!(first.predict(&rooms).unwrap(), second.predict(&rooms).unwrap());
}
