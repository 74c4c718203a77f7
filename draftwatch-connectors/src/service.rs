//! Service Boundary
//!
//! ## Overview
//!
//! Request handling without a web framework: the two service operations
//! (predict, train) are plain functions from a query source and a
//! configuration to a serializable response plus a suggested HTTP
//! status. A web layer, a CLI, or a test can expose them verbatim.
//!
//! ## Responses
//!
//! | Outcome              | Status | Body                          |
//! |----------------------|--------|-------------------------------|
//! | predictions computed | 200    | map room → verdict            |
//! | model not trained    | 503    | `{"error_message": ...}`      |
//! | source unreachable   | 502    | `{"error_message": ...}`      |
//! | training completed   | 200    | run summary                   |
//! | training failed      | 503    | `{"error_message": ...}`      |
//!
//! Rooms the predictor skipped (no thresholds, no recent delta) are
//! absent from the map rather than defaulted, so callers can tell
//! "closed" apart from "no answer".
//!
//! ## Lifecycle per request
//!
//! Each call builds its own predictor or trainer over a fresh load of
//! the parameter table. Concurrent predicts share nothing; concurrent
//! trains race on the final save and the last writer wins.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use draftwatch_core::constants::DEFAULT_LOOKBACK_MS;
use draftwatch_core::{
    ParameterStore, PredictError, Predictor, QuerySource, RoomId, SystemClock, Trainer,
    TrainingPolicy,
};
use serde::Serialize;

use crate::{rfc3339_millis, ConnectorError};

/// Body sent while the model has no trained parameters.
pub const NOT_READY_MESSAGE: &str = "The model is not ready for predictions, run train first!";

/// Where the model lives and how the lifecycle operations are tuned.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory the parameter table lives under.
    pub model_root: PathBuf,
    /// Prediction lookback window in milliseconds.
    pub lookback_ms: u64,
    /// Policy applied to training runs.
    pub training: TrainingPolicy,
}

impl ServiceConfig {
    /// Create a configuration with default lookback and training policy.
    pub fn new(model_root: impl Into<PathBuf>) -> Self {
        Self {
            model_root: model_root.into(),
            lookback_ms: DEFAULT_LOOKBACK_MS,
            training: TrainingPolicy::default(),
        }
    }

    /// Read the model root from the `MODEL_PATH` environment variable.
    pub fn from_env() -> Result<Self, ConnectorError> {
        let root = env::var("MODEL_PATH")
            .map_err(|_| ConnectorError::Config("MODEL_PATH is not set".into()))?;
        Ok(Self::new(root))
    }

    /// Override the prediction lookback window.
    pub fn with_lookback(mut self, window_ms: u64) -> Self {
        self.lookback_ms = window_ms;
        self
    }

    /// Override the training policy.
    pub fn with_training(mut self, policy: TrainingPolicy) -> Self {
        self.training = policy;
        self
    }
}

/// Parse the comma-separated `rooms` request parameter.
///
/// Entries are trimmed and empty ones dropped. Names no [`RoomId`] can
/// hold are dropped with a warning; they end up absent from the
/// response, like any other unknown room. Duplicates are left in, the
/// predictor collapses them.
pub fn split_rooms(raw: &str) -> Vec<RoomId> {
    let mut rooms = Vec::new();
    for name in raw.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match RoomId::new(name) {
            Some(room) => rooms.push(room),
            None => log::warn!("ignoring unusable room name {:?}", name),
        }
    }
    rooms
}

/// JSON error envelope shared by all failure responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    /// Human-readable description of what went wrong.
    pub error_message: String,
}

impl ErrorBody {
    fn new(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
        }
    }
}

/// One room's verdict as served to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomVerdict {
    /// Room the verdict applies to.
    pub room: String,
    /// Whether a recently opened window is assumed.
    pub open: bool,
    /// RFC 3339 instant of the delta the verdict is based on.
    pub evaluated_at: String,
}

/// Outcome of a predict request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictResponse {
    /// Verdicts for every evaluable requested room.
    Predictions(BTreeMap<String, RoomVerdict>),
    /// The model has no trained parameters yet.
    NotReady(ErrorBody),
    /// Sensor history could not be fetched.
    Failed(ErrorBody),
}

impl PredictResponse {
    /// HTTP status a web layer should pair with this response.
    pub fn suggested_status(&self) -> u16 {
        match self {
            Self::Predictions(_) => 200,
            Self::NotReady(_) => 503,
            Self::Failed(_) => 502,
        }
    }
}

/// What a completed training run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainSummary {
    /// Rooms that received fresh thresholds.
    pub trained_rooms: Vec<String>,
    /// Rooms skipped for thin history.
    pub skipped_rooms: Vec<String>,
    /// Feature rows the run was based on.
    pub rows_seen: usize,
}

/// Outcome of a train request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrainResponse {
    /// Training ran and the stored table was replaced.
    Completed(TrainSummary),
    /// Training did not produce a usable table.
    Failed(ErrorBody),
}

impl TrainResponse {
    /// HTTP status a web layer should pair with this response.
    pub fn suggested_status(&self) -> u16 {
        match self {
            Self::Completed(_) => 200,
            Self::Failed(_) => 503,
        }
    }
}

/// Serve one predict request.
///
/// Loads the parameter table, builds a request-scoped predictor, and
/// evaluates the requested rooms. The not-ready condition is checked
/// before any source traffic happens, and a request that names no usable
/// room answers with an empty map without querying at all.
pub fn handle_predict<S: QuerySource>(
    source: S,
    config: &ServiceConfig,
    rooms_param: &str,
) -> PredictResponse {
    let store = ParameterStore::new(&config.model_root);
    let predictor = Predictor::from_store(source, &store).with_lookback(config.lookback_ms);

    if !predictor.predictable() {
        return PredictResponse::NotReady(ErrorBody::new(NOT_READY_MESSAGE));
    }

    let rooms = split_rooms(rooms_param);
    if rooms.is_empty() {
        return PredictResponse::Predictions(BTreeMap::new());
    }

    match predictor.predict(&rooms) {
        Ok(report) => {
            let verdicts = report
                .predictions
                .values()
                .map(|prediction| {
                    let room = prediction.room.to_string();
                    let verdict = RoomVerdict {
                        room: room.clone(),
                        open: prediction.open,
                        evaluated_at: rfc3339_millis(prediction.evaluated_at),
                    };
                    (room, verdict)
                })
                .collect();
            PredictResponse::Predictions(verdicts)
        }
        Err(PredictError::NotReady) => PredictResponse::NotReady(ErrorBody::new(NOT_READY_MESSAGE)),
        Err(PredictError::DataUnavailable(err)) => {
            log::error!("predict failed: {}", err);
            PredictResponse::Failed(ErrorBody::new(format!(
                "Sensor data is unavailable: {}",
                err
            )))
        }
    }
}

/// Serve one train request.
///
/// Runs a full training pass over the policy lookback and replaces the
/// stored table. Per-room skips land in the summary; only a fetch
/// failure, an entirely untrainable window, or a failed save produce the
/// error body.
pub fn handle_train<S: QuerySource>(source: S, config: &ServiceConfig) -> TrainResponse {
    let store = ParameterStore::new(&config.model_root);
    let trainer = Trainer::new(source, Box::new(SystemClock)).with_policy(config.training);

    match trainer.train(&store) {
        Ok(report) => TrainResponse::Completed(TrainSummary {
            trained_rooms: report.trained_rooms.iter().map(|r| r.to_string()).collect(),
            skipped_rooms: report.skipped.iter().map(|(r, _)| r.to_string()).collect(),
            rows_seen: report.rows_seen,
        }),
        Err(err) => {
            log::error!("training failed: {}", err);
            TrainResponse::Failed(ErrorBody::new(format!("Training failed: {}", err)))
        }
    }
}
