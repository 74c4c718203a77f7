//! Named Constants for the Prediction Lifecycle
//!
//! This module centralizes the tuning defaults and fixed identifiers used
//! across feature building, training, and prediction so they are documented
//! in one place rather than scattered as magic numbers.

use crate::time::Timestamp;

// ===== TIME UNIT CONVERSIONS =====

/// Milliseconds per second.
pub const MS_PER_SECOND: u64 = 1000;

/// Seconds per minute.
pub const SECONDS_PER_MINUTE: u64 = 60;

/// Milliseconds per minute.
pub const MS_PER_MINUTE: u64 = MS_PER_SECOND * SECONDS_PER_MINUTE;

/// Milliseconds per hour.
pub const MS_PER_HOUR: u64 = MS_PER_MINUTE * 60;

/// Milliseconds per day.
pub const MS_PER_DAY: u64 = MS_PER_HOUR * 24;

// ===== PREDICTION WINDOWS =====

/// Default prediction lookback window (milliseconds).
///
/// Ten minutes of history is enough to capture at least two samples per
/// room at common reporting intervals while keeping queries cheap. A window
/// with fewer than two samples for a room yields no delta and the room is
/// skipped rather than guessed.
pub const DEFAULT_LOOKBACK_MS: u64 = 10 * MS_PER_MINUTE;

/// Default training lookback window (milliseconds).
///
/// Thirty days covers enough ventilation events across weather conditions
/// for the per-room magnitude distribution to stabilize.
pub const DEFAULT_TRAINING_LOOKBACK_MS: u64 = 30 * MS_PER_DAY;

// ===== TRAINING DEFAULTS =====

/// Default percentile for threshold derivation.
///
/// The 95th percentile of historical delta magnitudes sits above routine
/// HVAC drift but below the spikes a window opening produces.
pub const DEFAULT_THRESHOLD_PERCENTILE: f32 = 0.95;

/// Minimum feature rows a room needs before it is trainable.
///
/// Below this the percentile estimate is dominated by noise and the room
/// is skipped for the run instead of receiving an unstable threshold.
pub const DEFAULT_MIN_TRAINING_ROWS: usize = 32;

// ===== PARAMETER STORAGE =====

/// File name of the persisted parameter table.
pub const PARAMETER_FILE_NAME: &str = "modelparameter.csv";

/// Subdirectory of the model root holding predictor state.
pub const PARAMETER_SUBDIR: &str = "windowpredictor";

/// Column header of the parameter table.
///
/// Any persisted file whose header does not contain all three columns is
/// rejected as malformed in its entirety.
pub const PARAMETER_CSV_HEADER: &str = "room,delta_temperature_threshold,delta_humidity_threshold";

/// Timestamp placeholder for "start of history" queries.
pub const EPOCH_START: Timestamp = 0;
