//! InfluxDB Query Source
//!
//! ## Overview
//!
//! This module implements the core's query-source trait against the
//! InfluxDB 2.x HTTP API. A structured series query is rendered into a
//! Flux script, POSTed to `/api/v2/query`, and the annotated-CSV response
//! is decoded into row chunks the core concatenates.
//!
//! ## Query shape
//!
//! The series layout is configurable; with the defaults, a two-room
//! prediction query renders as:
//!
//! ```text
//! from(bucket: "home")
//!   |> range(start: 2024-01-01T09:50:00.000Z, stop: 2024-01-01T10:00:00.001Z)
//!   |> filter(fn: (r) => r._measurement == "room_climate")
//!   |> filter(fn: (r) => r._field == "temperature" or r._field == "humidity")
//!   |> filter(fn: (r) => r["room"] == "bedroom" or r["room"] == "kitchen")
//!   |> pivot(rowKey: ["_time"], columnKey: ["_field"], valueColumn: "_value")
//!   |> keep(columns: ["_time", "room", "temperature", "humidity"])
//! ```
//!
//! The pivot folds both fields into one row per instant, which is the
//! tabular shape the core expects. Flux's `stop` bound is exclusive while
//! the core's range is closed, hence the extra millisecond.
//!
//! ## Response decoding
//!
//! Annotation lines (`#datatype`, `#group`, `#default`) are skipped; each
//! table block contributes one [`RowChunk`]. Columns are located by name,
//! so the column order the server picks does not matter. A pivot gap (an
//! empty value cell) reads as a missing value, which the core's feature
//! builder later drops; an undecodable row is counted and skipped. Only a
//! structurally unusable response (a header without the required columns)
//! fails the fetch.
//!
//! ## Retries
//!
//! Server errors (5xx), rate limiting (429) and transport failures are
//! retried with exponential backoff. Client errors are not. The core
//! never retries, so this is the only retry loop a request passes
//! through.

use std::env;
use std::fmt::Write as _;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use draftwatch_core::{QuerySource, Reading, RoomId, RowChunk, SeriesQuery, SourceError};
use thiserror::Error;

use crate::{parse_rfc3339_millis, rfc3339_millis};

/// Default query timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default retry budget after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// InfluxDB adapter errors.
#[derive(Debug, Error)]
pub enum InfluxError {
    /// Network or request error.
    #[error("request failed: {0}")]
    Request(String),

    /// The server did not answer within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with an error status.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<InfluxError> for SourceError {
    fn from(err: InfluxError) -> Self {
        match err {
            InfluxError::Timeout => SourceError::Timeout,
            InfluxError::Server { status, message } if status < 500 => SourceError::Query {
                reason: format!("HTTP {}: {}", status, message),
            },
            InfluxError::Server { status, message } => SourceError::Transport {
                detail: format!("HTTP {}: {}", status, message),
            },
            InfluxError::Request(detail) | InfluxError::Decode(detail) => {
                SourceError::Transport { detail }
            }
            InfluxError::Config(reason) => SourceError::Query { reason },
        }
    }
}

/// Authentication methods accepted by the query endpoint.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// No authentication header.
    None,
    /// InfluxDB API token (`Authorization: Token ...`).
    Token(String),
    /// Basic authentication, for 1.8 compatibility setups.
    Basic {
        /// User name sent in the credentials pair.
        username: String,
        /// Password sent in the credentials pair.
        password: String,
    },
}

/// Connection and series-layout configuration.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB instance, without a trailing slash.
    pub base_url: String,
    /// Organization the query runs under.
    pub org: String,
    /// Bucket holding the room climate series.
    pub bucket: String,
    /// Measurement name of the climate series.
    pub measurement: String,
    /// Tag carrying the room name.
    pub room_tag: String,
    /// Field holding temperature values.
    pub temperature_field: String,
    /// Field holding relative humidity values.
    pub humidity_field: String,
    /// Authentication method.
    pub auth: AuthMethod,
    /// Request timeout.
    pub timeout: Duration,
    /// Retry attempts after the first failure.
    pub max_retries: u32,
}

impl InfluxConfig {
    /// Create a configuration with the default series layout.
    pub fn new(
        base_url: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            org: org.into(),
            bucket: bucket.into(),
            measurement: "room_climate".into(),
            room_tag: "room".into(),
            temperature_field: "temperature".into(),
            humidity_field: "humidity".into(),
            auth: AuthMethod::None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Read connection settings from the environment.
    ///
    /// Expects `INFLUX_SERVER`, `INFLUX_TOKEN`, `INFLUX_ORG` and
    /// `INFLUX_BUCKET`.
    pub fn from_env() -> Result<Self, InfluxError> {
        let server = required_env("INFLUX_SERVER")?;
        let token = required_env("INFLUX_TOKEN")?;
        let org = required_env("INFLUX_ORG")?;
        let bucket = required_env("INFLUX_BUCKET")?;
        Ok(Self::new(server, org, bucket).token(token))
    }

    /// Use token authentication.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMethod::Token(token.into());
        self
    }

    /// Use basic authentication.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Set the request timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Set the retry budget.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Override the measurement name.
    pub fn measurement(mut self, name: impl Into<String>) -> Self {
        self.measurement = name.into();
        self
    }

    /// Override the tag carrying the room name.
    pub fn room_tag(mut self, name: impl Into<String>) -> Self {
        self.room_tag = name.into();
        self
    }

    /// Override the temperature and humidity field names.
    pub fn value_fields(
        mut self,
        temperature: impl Into<String>,
        humidity: impl Into<String>,
    ) -> Self {
        self.temperature_field = temperature.into();
        self.humidity_field = humidity.into();
        self
    }
}

fn required_env(name: &str) -> Result<String, InfluxError> {
    env::var(name).map_err(|_| InfluxError::Config(format!("{} is not set", name)))
}

/// Counters accumulated across fetches.
#[derive(Debug, Default, Clone)]
pub struct SourceStats {
    /// Queries answered successfully.
    pub queries_sent: usize,
    /// Queries that failed after exhausting retries.
    pub queries_failed: usize,
    /// Retry attempts performed.
    pub retries: usize,
    /// Readings decoded from responses.
    pub rows_read: usize,
    /// Annotated-CSV tables decoded into chunks.
    pub chunks_read: usize,
    /// Rows or value cells dropped as undecodable.
    pub parse_errors: usize,
}

/// Query source backed by InfluxDB's HTTP API.
pub struct InfluxSource {
    config: InfluxConfig,
    agent: ureq::Agent,
    stats: Arc<Mutex<SourceStats>>,
}

impl InfluxSource {
    /// Create a source, validating the configured base URL.
    pub fn new(config: InfluxConfig) -> Result<Self, InfluxError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(InfluxError::Config(
                "base URL must start with http:// or https://".into(),
            ));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&format!("draftwatch/{}", env!("CARGO_PKG_VERSION")))
            .build();

        Ok(Self {
            config,
            agent,
            stats: Arc::new(Mutex::new(SourceStats::default())),
        })
    }

    /// Create a source from the environment variables.
    pub fn from_env() -> Result<Self, InfluxError> {
        Self::new(InfluxConfig::from_env()?)
    }

    /// Snapshot of the accumulated counters.
    pub fn stats(&self) -> SourceStats {
        self.stats.lock().unwrap().clone()
    }

    /// Render the Flux script for one series query.
    fn render_flux(&self, query: &SeriesQuery) -> String {
        let c = &self.config;
        let mut flux = format!("from(bucket: \"{}\")\n", escape_flux(&c.bucket));

        // Flux's stop bound is exclusive; the query range is closed.
        let _ = writeln!(
            flux,
            "  |> range(start: {}, stop: {})",
            rfc3339_millis(query.range.start),
            rfc3339_millis(query.range.end.saturating_add(1)),
        );
        let _ = writeln!(
            flux,
            "  |> filter(fn: (r) => r._measurement == \"{}\")",
            escape_flux(&c.measurement)
        );
        let _ = writeln!(
            flux,
            "  |> filter(fn: (r) => r._field == \"{}\" or r._field == \"{}\")",
            escape_flux(&c.temperature_field),
            escape_flux(&c.humidity_field)
        );

        if !query.rooms.is_empty() {
            let clauses: Vec<String> = query
                .rooms
                .iter()
                .map(|room| {
                    format!(
                        "r[\"{}\"] == \"{}\"",
                        escape_flux(&c.room_tag),
                        escape_flux(room.as_str())
                    )
                })
                .collect();
            let _ = writeln!(flux, "  |> filter(fn: (r) => {})", clauses.join(" or "));
        }

        let _ = writeln!(
            flux,
            "  |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")"
        );
        let _ = write!(
            flux,
            "  |> keep(columns: [\"_time\", \"{}\", \"{}\", \"{}\"])",
            escape_flux(&c.room_tag),
            escape_flux(&c.temperature_field),
            escape_flux(&c.humidity_field)
        );
        flux
    }

    /// POST the script, retrying transient failures.
    fn execute_with_retry(&self, flux: &str) -> Result<String, InfluxError> {
        let url = format!("{}/api/v2/query", self.config.base_url);
        let body = serde_json::json!({ "query": flux, "type": "flux" }).to_string();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff, capped near two minutes.
                let delay = Duration::from_millis(100 * (1 << attempt.min(10)));
                thread::sleep(delay);
                self.stats.lock().unwrap().retries += 1;
            }

            let request = self.authorize(
                self.agent
                    .post(&url)
                    .query("org", &self.config.org)
                    .set("Content-Type", "application/json")
                    .set("Accept", "application/csv"),
            );

            match request.send_string(&body) {
                Ok(response) => {
                    // into_string() caps bodies at 10 MB; training windows
                    // can be larger.
                    let mut text = String::new();
                    match response.into_reader().read_to_string(&mut text) {
                        Ok(_) => {
                            self.stats.lock().unwrap().queries_sent += 1;
                            return Ok(text);
                        }
                        Err(e) => {
                            last_error = Some(if is_io_timeout(&e) {
                                InfluxError::Timeout
                            } else {
                                InfluxError::Request(e.to_string())
                            });
                            continue;
                        }
                    }
                }
                Err(ureq::Error::Status(code, response)) => {
                    let message = response.into_string().unwrap_or_default();
                    if code >= 500 || code == 429 {
                        last_error = Some(InfluxError::Server {
                            status: code,
                            message,
                        });
                        continue;
                    }
                    self.stats.lock().unwrap().queries_failed += 1;
                    return Err(InfluxError::Server {
                        status: code,
                        message,
                    });
                }
                Err(ureq::Error::Transport(transport)) => {
                    last_error = Some(if is_timeout(&transport) {
                        InfluxError::Timeout
                    } else {
                        InfluxError::Request(transport.to_string())
                    });
                    continue;
                }
            }
        }

        self.stats.lock().unwrap().queries_failed += 1;
        Err(last_error.unwrap_or_else(|| InfluxError::Request("no attempts made".into())))
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.config.auth {
            AuthMethod::None => request,
            AuthMethod::Token(token) => {
                request.set("Authorization", &format!("Token {}", token))
            }
            AuthMethod::Basic { username, password } => {
                let credentials = BASE64.encode(format!("{}:{}", username, password));
                request.set("Authorization", &format!("Basic {}", credentials))
            }
        }
    }

    /// Decode an annotated-CSV body into per-table chunks.
    fn decode_tables(&self, body: &str) -> Result<DecodedTables, InfluxError> {
        let mut decoded = DecodedTables::default();
        let mut layout: Option<TableLayout> = None;
        let mut current: Vec<Reading> = Vec::new();
        let mut current_table: Option<String> = None;

        for (index, raw_line) in body.lines().enumerate() {
            let line = raw_line.trim_end_matches('\r');
            if line.is_empty() {
                // A blank line ends the current table block.
                flush_chunk(&mut current, &mut decoded.chunks);
                layout = None;
                current_table = None;
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let fields = split_csv_line(line);
            match &layout {
                None => layout = Some(TableLayout::from_header(&fields, &self.config)?),
                Some(table) => {
                    if let Some(table_idx) = table.table {
                        let id = fields.get(table_idx).cloned().unwrap_or_default();
                        if current_table.as_ref().is_some_and(|prev| prev != &id) {
                            flush_chunk(&mut current, &mut decoded.chunks);
                        }
                        current_table = Some(id);
                    }

                    match table.decode_row(&fields, &mut decoded.parse_errors) {
                        Some(reading) => current.push(reading),
                        None => {
                            decoded.parse_errors += 1;
                            log::debug!("skipping undecodable response row {}", index + 1);
                        }
                    }
                }
            }
        }

        flush_chunk(&mut current, &mut decoded.chunks);
        Ok(decoded)
    }
}

impl QuerySource for InfluxSource {
    fn fetch(&self, query: &SeriesQuery) -> Result<Vec<RowChunk>, SourceError> {
        let flux = self.render_flux(query);
        log::debug!("flux query:\n{}", flux);

        let body = self.execute_with_retry(&flux).map_err(SourceError::from)?;
        let decoded = self.decode_tables(&body).map_err(SourceError::from)?;

        let rows: usize = decoded.chunks.iter().map(Vec::len).sum();
        {
            let mut stats = self.stats.lock().unwrap();
            stats.chunks_read += decoded.chunks.len();
            stats.rows_read += rows;
            stats.parse_errors += decoded.parse_errors;
        }

        if decoded.parse_errors > 0 {
            log::warn!(
                "{} undecodable entries in query response",
                decoded.parse_errors
            );
        }
        Ok(decoded.chunks)
    }
}

#[derive(Debug, Default)]
struct DecodedTables {
    chunks: Vec<RowChunk>,
    parse_errors: usize,
}

/// Column indices of one annotated-CSV table block.
struct TableLayout {
    time: usize,
    room: usize,
    temperature: usize,
    humidity: usize,
    table: Option<usize>,
}

impl TableLayout {
    fn from_header(fields: &[String], config: &InfluxConfig) -> Result<Self, InfluxError> {
        let find = |name: &str| fields.iter().position(|field| field == name);
        let require = |name: &str| {
            find(name)
                .ok_or_else(|| InfluxError::Decode(format!("response lacks a {:?} column", name)))
        };

        Ok(Self {
            time: require("_time")?,
            room: require(&config.room_tag)?,
            temperature: require(&config.temperature_field)?,
            humidity: require(&config.humidity_field)?,
            table: find("table"),
        })
    }

    fn decode_row(&self, fields: &[String], parse_errors: &mut usize) -> Option<Reading> {
        let timestamp = parse_rfc3339_millis(fields.get(self.time)?)?;
        let room = RoomId::new(fields.get(self.room)?)?;
        let temperature = value_cell(fields.get(self.temperature), parse_errors);
        let humidity = value_cell(fields.get(self.humidity), parse_errors);
        Some(Reading::new(room, timestamp, temperature, humidity))
    }
}

/// Decode a pivoted value cell. A pivot gap reads as missing; garbage is
/// counted and also reads as missing.
fn value_cell(raw: Option<&String>, parse_errors: &mut usize) -> f32 {
    match raw {
        None => f32::NAN,
        Some(cell) if cell.is_empty() => f32::NAN,
        Some(cell) => match cell.parse::<f32>() {
            Ok(value) => value,
            Err(_) => {
                *parse_errors += 1;
                f32::NAN
            }
        },
    }
}

fn flush_chunk(current: &mut Vec<Reading>, chunks: &mut Vec<RowChunk>) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

/// Split one CSV line, honoring quoted fields with doubled-quote escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    fields.push(field);
    fields
}

/// Escape a string for interpolation into a Flux string literal.
fn escape_flux(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Whether a transport error bottoms out in a socket timeout.
fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(transport);
    while let Some(err) = cause {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if is_io_timeout(io) {
                return true;
            }
        }
        cause = err.source();
    }
    false
}

/// Whether an I/O error is a socket timeout.
fn is_io_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
