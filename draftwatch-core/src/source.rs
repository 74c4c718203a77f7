//! Time-Series Query Abstraction
//!
//! ## Overview
//!
//! The predictor and trainer never talk to a database. They describe what
//! they need as a [`SeriesQuery`] (which rooms, which closed time range)
//! and hand it to a [`QuerySource`], which returns readings in one or
//! more [`RowChunk`]s. Chunking mirrors how time-series stores deliver
//! results table by table; the core concatenates chunks in order and
//! processes the batch as a whole.
//!
//! ## Failure contract
//!
//! A source reports *why* it could not answer through [`SourceError`].
//! One variant is special: [`SourceError::NoData`] means the query itself
//! succeeded but matched nothing. Consumers treat it exactly like an
//! empty result, so adapters backed by stores that signal "no series
//! matched" as an error do not turn a quiet night into an outage.
//!
//! Retries belong inside adapters. By the time a `fetch` returns here,
//! the answer is final.
//!
//! ## Testing
//!
//! [`MemorySource`] is the canonical in-memory implementation: it filters
//! stored readings by room and range, optionally splits results into
//! fixed-size chunks, can be armed to fail with any [`SourceError`], and
//! counts the fetches made against it.

use core::cell::Cell;

use crate::errors::SourceError;
use crate::reading::{Reading, RoomId};
use crate::time::Timestamp;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

/// Closed time range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest timestamp included.
    pub start: Timestamp,
    /// Latest timestamp included.
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a range from explicit bounds.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Create a range reaching `window_ms` back from `now`.
    pub fn lookback(now: Timestamp, window_ms: u64) -> Self {
        Self {
            start: now.saturating_sub(window_ms),
            end: now,
        }
    }

    /// Check whether a timestamp falls inside the range.
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

/// What to fetch: a set of rooms over a time range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    /// Rooms to fetch; empty means every room the source knows.
    pub rooms: Vec<RoomId>,
    /// Time range of interest.
    pub range: TimeRange,
}

impl SeriesQuery {
    /// Query every room over the range.
    pub fn all_rooms(range: TimeRange) -> Self {
        Self {
            rooms: Vec::new(),
            range,
        }
    }

    /// Query a specific set of rooms over the range.
    pub fn for_rooms(rooms: &[RoomId], range: TimeRange) -> Self {
        Self {
            rooms: rooms.to_vec(),
            range,
        }
    }

    /// Check whether a room is covered by this query.
    pub fn covers_room(&self, room: &RoomId) -> bool {
        self.rooms.is_empty() || self.rooms.contains(room)
    }
}

/// One table of rows as delivered by a source.
pub type RowChunk = Vec<Reading>;

/// Provider of historical room climate readings.
pub trait QuerySource {
    /// Execute the query and return matching readings, chunked however
    /// the source delivered them. Within a chunk rows keep source order;
    /// chunk order is preserved by consumers.
    fn fetch(&self, query: &SeriesQuery) -> Result<Vec<RowChunk>, SourceError>;
}

/// Flatten chunks into one batch, preserving chunk and row order.
pub fn concat_chunks(chunks: Vec<RowChunk>) -> Vec<Reading> {
    let mut rows = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
    for chunk in chunks {
        rows.extend(chunk);
    }
    rows
}

/// In-memory query source for tests and replay.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    readings: Vec<Reading>,
    chunk_size: Option<usize>,
    fail_with: Option<SourceError>,
    fetches: Cell<usize>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source preloaded with readings.
    pub fn from_readings(readings: Vec<Reading>) -> Self {
        Self {
            readings,
            ..Self::default()
        }
    }

    /// Append a reading.
    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// Deliver results split into chunks of at most `size` rows.
    ///
    /// Exercises the same path a chunking store would take; by default
    /// everything arrives as a single chunk.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Arm the source to fail every fetch with the given error.
    pub fn failing_with(mut self, error: SourceError) -> Self {
        self.fail_with = Some(error);
        self
    }

    /// Number of fetches executed against this source.
    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }
}

impl QuerySource for MemorySource {
    fn fetch(&self, query: &SeriesQuery) -> Result<Vec<RowChunk>, SourceError> {
        self.fetches.set(self.fetches.get() + 1);

        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        let matched: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| query.covers_room(&r.room) && query.range.contains(r.timestamp))
            .copied()
            .collect();

        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = match self.chunk_size {
            Some(size) => matched.chunks(size).map(|c| c.to_vec()).collect(),
            None => {
                let mut chunks = Vec::with_capacity(1);
                chunks.push(matched);
                chunks
            }
        };

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RoomId {
        RoomId::new(name).unwrap()
    }

    fn reading(name: &str, ts: Timestamp) -> Reading {
        Reading::new(room(name), ts, 20.0, 40.0)
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = TimeRange::new(1_000, 2_000);
        assert!(range.contains(1_000));
        assert!(range.contains(2_000));
        assert!(!range.contains(999));
        assert!(!range.contains(2_001));
    }

    #[test]
    fn lookback_saturates_at_epoch() {
        let range = TimeRange::lookback(500, 1_000);
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 500);
    }

    #[test]
    fn empty_room_list_matches_everything() {
        let source = MemorySource::from_readings(vec![
            reading("bedroom", 1_000),
            reading("kitchen", 1_500),
        ]);

        let query = SeriesQuery::all_rooms(TimeRange::new(0, 2_000));
        let rows = concat_chunks(source.fetch(&query).unwrap());
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn room_and_range_filters_apply() {
        let source = MemorySource::from_readings(vec![
            reading("bedroom", 1_000),
            reading("bedroom", 5_000),
            reading("kitchen", 1_500),
        ]);

        let query = SeriesQuery::for_rooms(&[room("bedroom")], TimeRange::new(0, 2_000));
        let rows = concat_chunks(source.fetch(&query).unwrap());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 1_000);
    }

    #[test]
    fn no_match_yields_empty_not_error() {
        let source = MemorySource::from_readings(vec![reading("bedroom", 1_000)]);
        let query = SeriesQuery::for_rooms(&[room("attic")], TimeRange::new(0, 2_000));

        assert_eq!(source.fetch(&query).unwrap(), Vec::<RowChunk>::new());
    }

    #[test]
    fn chunking_preserves_order_end_to_end() {
        let readings: Vec<Reading> = (0..7).map(|i| reading("bedroom", i * 1_000)).collect();
        let source = MemorySource::from_readings(readings.clone()).with_chunk_size(3);

        let chunks = source
            .fetch(&SeriesQuery::all_rooms(TimeRange::new(0, 10_000)))
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(concat_chunks(chunks), readings);
    }

    #[test]
    fn armed_failure_fires_on_every_fetch() {
        let source = MemorySource::new().failing_with(SourceError::Timeout);
        let query = SeriesQuery::all_rooms(TimeRange::new(0, 1_000));

        assert_eq!(source.fetch(&query), Err(SourceError::Timeout));
        assert_eq!(source.fetch(&query), Err(SourceError::Timeout));
        assert_eq!(source.fetch_count(), 2);
    }
}
