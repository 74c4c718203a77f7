//! Room Identifiers and Sensor Readings
//!
//! ## Overview
//!
//! A [`Reading`] is one row of the time-series the predictor consumes: a
//! room, a timestamp, and the two climate values. Readings are immutable
//! once fetched; every later stage derives new data instead of mutating
//! the batch.
//!
//! ## Room identifiers
//!
//! Rooms are identified by short human-chosen names ("bedroom",
//! "kitchen"). [`RoomId`] stores them inline to stay `Copy` and usable as
//! an ordered map key without allocation. Names longer than
//! [`MAX_ROOM_ID`] bytes are rejected at the boundary rather than
//! truncated, so two distinct long names can never collapse into one key.
//!
//! ## Missing values
//!
//! A reading with only one of the two quantities is still a valid row;
//! the absent value is carried as NaN and dropped when deltas are built.
//! No stage ever substitutes a default for a missing measurement.

use crate::time::Timestamp;
use core::fmt;

/// Maximum length in bytes for an inline room identifier.
///
/// Keeps `RoomId` at 32 bytes. Room names from building schemas fit
/// comfortably; anything longer is rejected on construction.
pub const MAX_ROOM_ID: usize = 31;

/// Inline room identifier.
///
/// Avoids heap allocation so readings stay `Copy` end to end.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId {
    len: u8,
    data: [u8; MAX_ROOM_ID],
}

impl RoomId {
    /// Create from a string slice.
    ///
    /// Returns `None` if the name is empty or longer than
    /// [`MAX_ROOM_ID`] bytes.
    pub fn new(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_ROOM_ID {
            return None;
        }

        let mut data = [0u8; MAX_ROOM_ID];
        data[..bytes.len()].copy_from_slice(bytes);

        Some(Self {
            len: bytes.len() as u8,
            data,
        })
    }

    /// Get as string slice.
    pub fn as_str(&self) -> &str {
        // new() only copies whole &str contents, so the bytes are UTF-8
        core::str::from_utf8(&self.data[..self.len as usize])
            .expect("room id contains invalid UTF-8")
    }
}

impl fmt::Debug for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Derived Ord would sort by length before content. Rooms must order the
// way their names read, both for stable report output and for map keys.
impl PartialOrd for RoomId {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RoomId {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for RoomId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for RoomId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = RoomId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a room name of 1..={} bytes", MAX_ROOM_ID)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<RoomId, E> {
                RoomId::new(v).ok_or_else(|| E::invalid_length(v.len(), &self))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

/// One sample of the room climate time-series.
///
/// Temperature is in degrees Celsius, humidity in percent relative
/// humidity. A missing measurement is NaN, never a substituted default.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    /// Room the sample belongs to.
    pub room: RoomId,
    /// Sample time in milliseconds since the Unix epoch.
    pub timestamp: Timestamp,
    /// Air temperature (°C); NaN when the source had no value.
    pub temperature: f32,
    /// Relative humidity (%); NaN when the source had no value.
    pub humidity: f32,
}

impl Reading {
    /// Create a reading with both measurements present.
    pub fn new(room: RoomId, timestamp: Timestamp, temperature: f32, humidity: f32) -> Self {
        Self {
            room,
            timestamp,
            temperature,
            humidity,
        }
    }

    /// Check whether both measurements are finite numbers.
    pub fn is_complete(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite()
    }
}
