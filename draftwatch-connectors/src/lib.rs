//! Adapters Around the Draftwatch Core
//!
//! ## Overview
//!
//! The core crate decides *whether a window was opened*; this crate wires
//! that decision into a deployment. Two adapters live here:
//!
//! - [`influx`] (feature `influx`, on by default): a query source backed
//!   by InfluxDB's HTTP API. It renders Flux from structured queries and
//!   decodes annotated-CSV responses into row chunks.
//! - [`service`]: framework-free request handling. It maps predict and
//!   train calls onto core lifecycle operations and yields serializable
//!   responses paired with a suggested HTTP status, so any web layer can
//!   expose them verbatim.
//!
//! ## Timestamps on the wire
//!
//! The core counts milliseconds since the Unix epoch; the external
//! surfaces speak RFC 3339. [`rfc3339_millis`] and
//! [`parse_rfc3339_millis`] convert at the crate boundary.
//!
//! ## Example
//!
//! ```rust,no_run
//! use draftwatch_connectors::influx::InfluxSource;
//! use draftwatch_connectors::service::{handle_predict, ServiceConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::from_env()?;
//! let source = InfluxSource::from_env()?;
//!
//! let response = handle_predict(source, &config, "bedroom,kitchen");
//! println!(
//!     "{} {}",
//!     response.suggested_status(),
//!     serde_json::to_string(&response)?
//! );
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "influx")]
pub mod influx;
pub mod service;

use chrono::{DateTime, SecondsFormat};
use draftwatch_core::Timestamp;
use thiserror::Error;

#[cfg(feature = "influx")]
pub use influx::{AuthMethod, InfluxConfig, InfluxError, InfluxSource, SourceStats};
pub use service::{
    handle_predict, handle_train, ErrorBody, PredictResponse, RoomVerdict, ServiceConfig,
    TrainResponse, TrainSummary, NOT_READY_MESSAGE,
};

/// Errors shared by the adapter modules.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A required setting or environment variable is missing or unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Render a millisecond timestamp as RFC 3339 in UTC with millisecond
/// precision.
///
/// Values outside chrono's representable range fall back to the raw
/// millisecond count.
pub fn rfc3339_millis(timestamp: Timestamp) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|ms| DateTime::from_timestamp_millis(ms))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| timestamp.to_string())
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
///
/// Returns `None` for unparseable input and for instants before the
/// epoch.
pub fn parse_rfc3339_millis(raw: &str) -> Option<Timestamp> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    Timestamp::try_from(parsed.timestamp_millis()).ok()
}
