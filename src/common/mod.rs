//! Common types shared across the decoder and payload modules
//!
//! This module defines the identifiers and span types every other module
//! speaks in, plus byte access, errors, counters and generic values.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod bytes;
pub use bytes::{ByteReader, Endian, Primitive};

pub mod error;
pub use error::{PayloadError, PayloadResult};

pub mod metrics;
pub use metrics::{CounterSnapshot, PayloadCounters};

pub mod value;
pub use value::{DecodedValue, ValueMap};

/// 64-bit mainboard ID naming the module that produced a record
///
/// Displayed and serialized as 12 upper-case hex digits, the way mainboard
/// IDs are printed on the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BoardId(pub u64);

impl BoardId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for BoardId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012X}", self.0)
    }
}

impl FromStr for BoardId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        u64::from_str_radix(digits, 16).map(BoardId)
    }
}

impl Serialize for BoardId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BoardId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid mainboard ID {:?}: {}", s, e)))
    }
}

/// Half-open byte range `[start, end)` of one record inside a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordSpan {
    pub start: usize,
    pub end: usize,
}

impl RecordSpan {
    /// Create a span, checking `start < end <= buffer_len`
    pub fn new(start: usize, end: usize, buffer_len: usize) -> PayloadResult<Self> {
        if start >= end || end > buffer_len {
            return Err(PayloadError::format(format!(
                "invalid record span [{}, {}) in buffer of {} bytes",
                start, end, buffer_len
            )));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The bytes covered by this span
    pub fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.range()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_id_display_and_parse() {
        let id = BoardId(0x60FBC4B4E69E);
        assert_eq!(id.to_string(), "60FBC4B4E69E");
        assert_eq!("60fbc4b4e69e".parse::<BoardId>().unwrap(), id);
        assert_eq!("0x60FBC4B4E69E".parse::<BoardId>().unwrap(), id);
        assert_eq!(BoardId(1).to_string(), "000000000001");
        assert!("not-hex".parse::<BoardId>().is_err());
    }

    #[test]
    fn board_id_serde() {
        let id = BoardId(0xABC);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"000000000ABC\"");
        let back: BoardId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn record_span_bounds() {
        let span = RecordSpan::new(4, 10, 10).unwrap();
        assert_eq!(span.len(), 6);
        assert_eq!(span.range(), 4..10);
        assert!(RecordSpan::new(4, 4, 10).is_err());
        assert!(RecordSpan::new(4, 11, 10).is_err());

        let buf: Vec<u8> = (0..10).collect();
        assert_eq!(span.slice(&buf), &[4, 5, 6, 7, 8, 9]);
    }
}
