//! Record envelope header
//!
//! The envelope wraps a flat stream of self-describing records (each
//! starting with its own u32 length and u32 type) behind a 38-byte event
//! header. The header fields share their offsets with the V5 event payload
//! (type 21, see [`super::v5`]); the envelope differs only in its type tag
//! and in what follows the header.
//!
//! ```text
//! +0   u32  payload length (whole event)
//! +4   u32  payload type ("EVNT")
//! +8   u64  first time (DAQ clock, 0.1 ns since Jan 1 of `year`)
//! +16  u32  duration
//! +20  u16  year
//! +22  u32  event ID
//! +26  u32  run number
//! +30  i32  sub-run number (negative while configuration is changing)
//! +34  u32  record count
//! +38  ...  records
//! ```

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;
use tracing::warn;

use crate::common::{bytes, ByteReader, Endian, PayloadError, PayloadResult};

use super::common::DecodeConfiguration;

/// Envelope layout constants
pub mod constants {
    /// "EVNT"
    pub const TAG: u32 = 0x4556_4E54;
    pub const LENGTH: usize = 0;
    pub const TYPE: usize = 4;
    pub const FIRST_TIME: usize = 8;
    pub const DURATION: usize = 16;
    pub const YEAR: usize = 20;
    pub const EVENT_ID: usize = 22;
    pub const RUN_ID: usize = 26;
    pub const SUB_RUN_ID: usize = 30;
    pub const RECORD_COUNT: usize = 34;
    pub const HEADER_SIZE: usize = 38;
}

/// Decoded envelope header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    /// Declared length of the whole payload
    pub length: u32,
    /// Global trigger time (0.1 ns units)
    pub start_time: u64,
    pub duration: u32,
    pub year: u16,
    pub event_id: u32,
    pub run_id: u32,
    pub sub_run_id: u32,
    /// Sub-run field was negative
    pub config_in_transition: bool,
    pub record_count: u32,
}

impl EventHeader {
    /// Whether `buffer` starts with an event envelope
    pub fn is_envelope(buffer: &[u8]) -> bool {
        bytes::read::<u32>(Endian::Big, constants::TYPE, buffer)
            .map(|tag| tag == constants::TAG)
            .unwrap_or(false)
    }

    /// Parse the envelope header and check its declared length
    pub fn parse(buffer: &[u8]) -> PayloadResult<Self> {
        let reader = ByteReader::big_endian(buffer);

        let tag = reader.read::<u32>(constants::TYPE)?;
        if tag != constants::TAG {
            return Err(PayloadError::UnsupportedRecordType(tag));
        }
        Self::parse_fields(buffer)
    }

    /// Read the header fields without looking at the type tag
    pub(crate) fn parse_fields(buffer: &[u8]) -> PayloadResult<Self> {
        let reader = ByteReader::big_endian(buffer);
        let length = reader.read::<u32>(constants::LENGTH)?;
        if length as usize != buffer.len() {
            return Err(PayloadError::format(format!(
                "event declares {} bytes but buffer holds {}",
                length,
                buffer.len()
            )));
        }
        if buffer.len() < constants::HEADER_SIZE {
            return Err(PayloadError::format(format!(
                "event of {} bytes is shorter than its {}-byte header",
                buffer.len(),
                constants::HEADER_SIZE
            )));
        }

        let sub_run = reader.read::<i32>(constants::SUB_RUN_ID)?;
        Ok(Self {
            length,
            start_time: reader.read::<u64>(constants::FIRST_TIME)?,
            duration: reader.read::<u32>(constants::DURATION)?,
            year: reader.read::<u16>(constants::YEAR)?,
            event_id: reader.read::<u32>(constants::EVENT_ID)?,
            run_id: reader.read::<u32>(constants::RUN_ID)?,
            sub_run_id: sub_run.unsigned_abs(),
            config_in_transition: sub_run < 0,
            record_count: reader.read::<u32>(constants::RECORD_COUNT)?,
        })
    }

    pub fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.duration as u64)
    }

    /// Decode context for the records inside this event
    ///
    /// The envelope's time becomes the global time and its year overrides
    /// the configured one.
    pub fn decode_configuration(
        &self,
        base: &DecodeConfiguration,
    ) -> PayloadResult<DecodeConfiguration> {
        let global_time = i64::try_from(self.start_time).map_err(|_| {
            PayloadError::format(format!("event time {} out of range", self.start_time))
        })?;
        if base.year != 0 && base.year != self.year {
            warn!(
                configured = base.year,
                event = self.year,
                "configured year differs from event header; using the event year"
            );
        }
        Ok(DecodeConfiguration {
            global_time,
            year: self.year,
            ..*base
        })
    }

    /// Calendar time of the global trigger
    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        let new_year = NaiveDate::from_ymd_opt(self.year as i32, 1, 1)?
            .and_hms_opt(0, 0, 0)?
            .and_utc();
        let nanos = i64::try_from(self.start_time / 10).ok()?;
        new_year.checked_add_signed(TimeDelta::nanoseconds(nanos))
    }

    /// Append the encoded header to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        bytes::push(Endian::Big, out, self.length);
        bytes::push(Endian::Big, out, constants::TAG);
        bytes::push(Endian::Big, out, self.start_time);
        bytes::push(Endian::Big, out, self.duration);
        bytes::push(Endian::Big, out, self.year);
        bytes::push(Endian::Big, out, self.event_id);
        bytes::push(Endian::Big, out, self.run_id);
        let sub_run = if self.config_in_transition {
            -(self.sub_run_id as i32)
        } else {
            self.sub_run_id as i32
        };
        bytes::push(Endian::Big, out, sub_run);
        bytes::push(Endian::Big, out, self.record_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn make_header() -> EventHeader {
        EventHeader {
            length: constants::HEADER_SIZE as u32,
            start_time: 36_000_000_000_000,
            duration: 1_000,
            year: 2012,
            event_id: 77,
            run_id: 120_000,
            sub_run_id: 3,
            config_in_transition: false,
            record_count: 0,
        }
    }

    #[test]
    fn test_encode_parse() {
        let header = make_header();
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), constants::HEADER_SIZE);
        assert!(EventHeader::is_envelope(&buf));
        assert_eq!(EventHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn test_negative_sub_run() {
        let mut header = make_header();
        header.config_in_transition = true;
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(&buf[constants::SUB_RUN_ID..constants::SUB_RUN_ID + 4], &(-3i32).to_be_bytes());
        let parsed = EventHeader::parse(&buf).unwrap();
        assert_eq!(parsed.sub_run_id, 3);
        assert!(parsed.config_in_transition);
    }

    #[test]
    fn test_length_mismatch() {
        let mut buf = Vec::new();
        make_header().encode(&mut buf);
        buf.push(0);
        assert!(matches!(EventHeader::parse(&buf), Err(PayloadError::Format(_))));
        assert!(matches!(
            EventHeader::parse(&buf[..10]),
            Err(PayloadError::Format(_))
        ));
        assert!(matches!(
            EventHeader::parse(&buf[..3]),
            Err(PayloadError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_not_an_envelope() {
        let mut buf = Vec::new();
        make_header().encode(&mut buf);
        buf[4..8].copy_from_slice(&18u32.to_be_bytes());
        assert!(!EventHeader::is_envelope(&buf));
        assert!(matches!(
            EventHeader::parse(&buf),
            Err(PayloadError::UnsupportedRecordType(18))
        ));
    }

    #[test]
    fn test_decode_configuration() {
        let header = make_header();
        let base = DecodeConfiguration::new(0).with_year(2011).headers_only();
        let config = header.decode_configuration(&base).unwrap();
        assert_eq!(config.global_time, 36_000_000_000_000);
        assert_eq!(config.year, 2012);
        assert!(!config.waveforms);
        assert_eq!(header.end_time(), 36_000_000_001_000);
    }

    #[test]
    fn test_start_datetime() {
        // One hour into the year
        let dt = make_header().start_datetime().unwrap();
        assert_eq!(dt.year(), 2012);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.hour(), 1);
        assert_eq!(dt.minute(), 0);
    }
}
