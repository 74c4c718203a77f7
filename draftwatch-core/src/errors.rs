//! Error Types for the Prediction Lifecycle
//!
//! ## Taxonomy
//!
//! Failures split into three groups with different blast radii:
//!
//! 1. **Store conditions** are not errors here at all: a missing or
//!    malformed parameter file degrades the predictor to its
//!    unparameterized state (see [`crate::params::LoadOutcome`]) instead
//!    of failing construction. Only a later `predict` call surfaces the
//!    condition, as [`PredictError::NotReady`].
//!
//! 2. **Call failures** ([`PredictError`], [`TrainError`]) abort a single
//!    invocation and carry enough detail for the caller to map them onto
//!    a transport-facing response. They never poison shared state.
//!
//! 3. **Source failures** ([`SourceError`]) describe why a time-series
//!    query did not produce rows. Adapters map their protocol errors onto
//!    these variants; the core never retries, so what the adapter reports
//!    is what the caller sees.
//!
//! Per-room problems (unknown room, too little history) are deliberately
//! absent: those are omissions recorded in the prediction or training
//! report, not failures of the batch.

use thiserror_no_std::Error;

#[cfg(not(feature = "std"))]
use alloc::string::String;

/// Result type for prediction calls.
pub type PredictResult<T> = Result<T, PredictError>;

/// Result type for training runs.
pub type TrainResult<T> = Result<T, TrainError>;

/// Why a time-series query produced no usable rows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The query executed but matched no rows in the window.
    #[error("query returned no rows")]
    NoData,

    /// The source rejected the query itself.
    #[error("query rejected: {reason}")]
    Query {
        /// Diagnostic from the source, verbatim.
        reason: String,
    },

    /// The source did not answer within the adapter's deadline.
    #[error("query timed out")]
    Timeout,

    /// The source could not be reached or the reply was unreadable.
    #[error("transport failure: {detail}")]
    Transport {
        /// Diagnostic from the transport layer, verbatim.
        detail: String,
    },
}

/// Failure of a single prediction call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    /// No valid parameter set is loaded; training has to run first.
    #[error("model is not ready for predictions, run train first")]
    NotReady,

    /// The sensor history could not be fetched.
    #[error("sensor data unavailable: {0}")]
    DataUnavailable(#[from] SourceError),
}

/// Failure of a training run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainError {
    /// The training history could not be fetched.
    #[error("training data unavailable: {0}")]
    DataUnavailable(#[from] SourceError),

    /// The freshly trained parameters could not be persisted.
    #[error("parameter store failure: {detail}")]
    Store {
        /// Underlying I/O diagnostic.
        detail: String,
    },

    /// Every candidate room was skipped; nothing was written.
    #[error("no room had enough usable history to train")]
    NoTrainableRooms,
}
