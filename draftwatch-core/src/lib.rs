//! Core model lifecycle for Draftwatch
//!
//! Predicts per room whether a window was recently opened, from the rate
//! of change of temperature and humidity. The crate owns the full model
//! lifecycle: loading and validating persisted thresholds, querying
//! historical readings through a pluggable source, deriving delta
//! features, deciding per room, and retraining the thresholds from
//! history.
//!
//! Key properties:
//! - Construction never fails; a broken parameter table degrades to the
//!   "not ready" state instead of crashing startup
//! - Per-room problems are omissions, never batch failures
//! - One source query per call, no writes during prediction
//!
//! ```no_run
//! use draftwatch_core::{MemorySource, ParameterStore, Predictor, RoomId};
//!
//! let store = ParameterStore::new("/var/lib/draftwatch");
//! let predictor = Predictor::from_store(MemorySource::new(), &store);
//!
//! let bedroom = RoomId::new("bedroom").unwrap();
//! match predictor.predict(&[bedroom]) {
//!     Ok(report) => {
//!         for (room, prediction) in &report.predictions {
//!             println!("{}: open = {}", room, prediction.open);
//!         }
//!     }
//!     Err(e) => eprintln!("prediction failed: {}", e),
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
extern crate alloc;

// Macros for optional logging; expand to nothing without the log feature.
#[cfg(feature = "log")]
macro_rules! log_info {
    ($($arg:tt)*) => { log::info!($($arg)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "log")]
macro_rules! log_warn {
    ($($arg:tt)*) => { log::warn!($($arg)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "log")]
macro_rules! log_error {
    ($($arg:tt)*) => { log::error!($($arg)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! log_error {
    ($($arg:tt)*) => {};
}

pub mod constants;
pub mod errors;
pub mod features;
pub mod params;
pub mod predictor;
pub mod reading;
pub mod source;
#[cfg(feature = "std")]
pub mod store;
pub mod time;
pub mod trainer;

// Public API
pub use errors::{PredictError, PredictResult, SourceError, TrainError, TrainResult};
pub use features::{build_features, group_by_room, latest_per_room, FeatureRow};
pub use params::{LoadOutcome, ParameterSet, ThresholdParams};
pub use predictor::{Prediction, PredictionReport, Predictor, SkipReason};
pub use reading::{Reading, RoomId, MAX_ROOM_ID};
pub use source::{concat_chunks, MemorySource, QuerySource, RowChunk, SeriesQuery, TimeRange};
#[cfg(feature = "std")]
pub use store::ParameterStore;
pub use time::{FixedClock, TimeSource, Timestamp};
#[cfg(feature = "std")]
pub use time::SystemClock;
pub use trainer::{ThresholdStatistic, Trainer, TrainingPolicy, TrainingReport};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
