//! Decoder for trigger request records (type 9)
//!
//! ```text
//! +0   u32  record length
//! +4   u32  record type (9)
//! +8   u64  UTC time
//! +22  i32  trigger type
//! +26  i32  trigger config ID
//! +30  u32  source ID
//! +34  u64  first time
//! +42  u64  last time
//! ```
//!
//! Global and merged triggers additionally carry a readout request block
//! and a list of composite sub-records:
//!
//! ```text
//! +60         u32  readout request count N
//! +70+32N     u16  composite count
//! +72+32N     ...  composites, each starting with u32 length, u32 type
//! ```

use serde::Serialize;

use crate::common::{ByteReader, PayloadError, PayloadResult};

use super::common::DecodeConfiguration;
use super::hit::record_span;

/// Record layout constants
pub mod constants {
    pub const TAG: u32 = 9;
    pub const TRIGGER_TYPE: usize = 22;
    pub const CONFIG_ID: usize = 26;
    pub const SOURCE_ID: usize = 30;
    pub const FIRST_TIME: usize = 34;
    pub const LAST_TIME: usize = 42;
    /// Bytes every trigger record carries
    pub const FIXED_SIZE: usize = 50;

    pub const READOUT_REQUEST_COUNT: usize = 60;
    pub const READOUT_REQUEST_SIZE: usize = 32;
    pub const COMPOSITE_COUNT: usize = 70;
    pub const COMPOSITES: usize = 72;

    /// Source ID of the global trigger
    pub const GLOBAL_TRIGGER_SOURCE: u32 = 6000;
    /// Trigger type of merged triggers
    pub const MERGED_TRIGGER_TYPE: i32 = -1;
    /// Composite type that is skipped
    pub const READOUT_REQUEST_TAG: u32 = 1;
    /// Year from which trigger times are relative to the global time
    pub const RELATIVE_TIME_YEAR: u16 = 2007;
    /// Deepest composite nesting accepted below the outermost record
    pub const MAX_TRIGGER_DEPTH: usize = 16;
}

/// A trigger request, possibly made of sub-triggers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedTrigger {
    pub trigger_type: i32,
    pub config_id: i32,
    pub source_id: u32,
    /// Start time in ns (relative to the global trigger from 2007 on)
    pub time: f64,
    /// Duration in ns
    pub length: f64,
    pub sub_triggers: Vec<DecodedTrigger>,
}

impl DecodedTrigger {
    pub fn is_global(&self) -> bool {
        self.source_id == constants::GLOBAL_TRIGGER_SOURCE
    }

    /// Number of triggers in this tree, including this one
    pub fn count(&self) -> usize {
        1 + self.sub_triggers.iter().map(DecodedTrigger::count).sum::<usize>()
    }
}

/// Decode the trigger request record at `start`
pub fn decode_trigger(
    buffer: &[u8],
    start: usize,
    config: &DecodeConfiguration,
) -> PayloadResult<DecodedTrigger> {
    let span = record_span(buffer, start, constants::FIXED_SIZE)?;
    decode_span(span, config, 0)
}

fn decode_span(
    span: &[u8],
    config: &DecodeConfiguration,
    depth: usize,
) -> PayloadResult<DecodedTrigger> {
    let reader = ByteReader::big_endian(span);

    let trigger_type = reader.read::<i32>(constants::TRIGGER_TYPE)?;
    let config_id = reader.read::<i32>(constants::CONFIG_ID)?;
    let source_id = reader.read::<u32>(constants::SOURCE_ID)?;
    let first_time = reader.read::<u64>(constants::FIRST_TIME)?;
    let last_time = reader.read::<u64>(constants::LAST_TIME)?;

    let time = if config.year < constants::RELATIVE_TIME_YEAR {
        first_time as f64 / 10.0
    } else {
        config.relative_ns(first_time)
    };
    let length = (last_time as i128 - first_time as i128) as f64 / 10.0;

    let mut trigger = DecodedTrigger {
        trigger_type,
        config_id,
        source_id,
        time,
        length,
        sub_triggers: Vec::new(),
    };

    if source_id == constants::GLOBAL_TRIGGER_SOURCE
        || trigger_type == constants::MERGED_TRIGGER_TYPE
    {
        trigger.sub_triggers = decode_composites(&reader, config, depth)?;
    }

    Ok(trigger)
}

fn decode_composites(
    reader: &ByteReader<'_>,
    config: &DecodeConfiguration,
    depth: usize,
) -> PayloadResult<Vec<DecodedTrigger>> {
    if depth >= constants::MAX_TRIGGER_DEPTH {
        return Err(PayloadError::format(format!(
            "trigger composites nested deeper than {} levels",
            constants::MAX_TRIGGER_DEPTH
        )));
    }

    let requests = reader.read::<u32>(constants::READOUT_REQUEST_COUNT)? as usize;
    let request_bytes = requests
        .checked_mul(constants::READOUT_REQUEST_SIZE)
        .ok_or_else(|| PayloadError::format(format!("readout request count {} overflows", requests)))?;
    let count = reader.read::<u16>(constants::COMPOSITE_COUNT + request_bytes)? as usize;

    let mut cursor = constants::COMPOSITES + request_bytes;
    let mut subs = Vec::new();
    for _ in 0..count {
        let length = reader.read::<u32>(cursor)? as usize;
        let tag = reader.read::<u32>(cursor + 4)?;
        if length < 8 {
            return Err(PayloadError::format(format!(
                "composite at offset {} declares {} bytes",
                cursor, length
            )));
        }
        let composite = reader.slice(cursor, length).map_err(|_| {
            PayloadError::format(format!(
                "composite of {} bytes at offset {} overruns its trigger record",
                length, cursor
            ))
        })?;

        match tag {
            constants::TAG => subs.push(decode_span(composite, config, depth + 1)?),
            constants::READOUT_REQUEST_TAG => {}
            other => {
                return Err(PayloadError::format(format!(
                    "unexpected composite type {} in trigger record",
                    other
                )))
            }
        }
        cursor += length;
    }

    Ok(subs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Trigger record; composites are appended after an empty readout block
    fn make_trigger(trigger_type: i32, source_id: u32, first: u64, last: u64, composites: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_u32(&mut buf, 0);
        push_u32(&mut buf, constants::TAG);
        buf.resize(constants::TRIGGER_TYPE, 0);
        buf.extend_from_slice(&trigger_type.to_be_bytes());
        buf.extend_from_slice(&7i32.to_be_bytes());
        push_u32(&mut buf, source_id);
        push_u64(&mut buf, first);
        push_u64(&mut buf, last);
        buf.resize(constants::COMPOSITE_COUNT, 0);
        buf.extend_from_slice(&(composites.len() as u16).to_be_bytes());
        for c in composites {
            buf.extend_from_slice(c);
        }
        let len = buf.len() as u32;
        buf[..4].copy_from_slice(&len.to_be_bytes());
        buf
    }

    #[test]
    fn test_simple_trigger() {
        let buf = make_trigger(0, 4000, 1_500, 2_500, &[]);
        let config = DecodeConfiguration::new(1_000).with_year(2012);
        let trigger = decode_trigger(&buf, 0, &config).unwrap();
        assert_eq!(trigger.trigger_type, 0);
        assert_eq!(trigger.config_id, 7);
        assert_eq!(trigger.source_id, 4000);
        assert_eq!(trigger.time, 50.0);
        assert_eq!(trigger.length, 100.0);
        assert!(trigger.sub_triggers.is_empty());
        assert!(!trigger.is_global());
    }

    #[test]
    fn test_pre_2007_absolute_time() {
        let buf = make_trigger(0, 4000, 1_500, 2_500, &[]);
        let config = DecodeConfiguration::new(1_000).with_year(2006);
        let trigger = decode_trigger(&buf, 0, &config).unwrap();
        assert_eq!(trigger.time, 150.0);
    }

    #[test]
    fn test_global_trigger_with_composites() {
        let sub_a = make_trigger(2, 4000, 1_100, 1_200, &[]);
        let sub_b = make_trigger(3, 5000, 1_300, 1_400, &[]);
        let mut readout = Vec::new();
        push_u32(&mut readout, 12);
        push_u32(&mut readout, constants::READOUT_REQUEST_TAG);
        push_u32(&mut readout, 0);

        let buf = make_trigger(
            5,
            constants::GLOBAL_TRIGGER_SOURCE,
            1_000,
            2_000,
            &[sub_a, readout, sub_b],
        );
        let config = DecodeConfiguration::new(1_000).with_year(2012);
        let trigger = decode_trigger(&buf, 0, &config).unwrap();
        assert!(trigger.is_global());
        assert_eq!(trigger.sub_triggers.len(), 2);
        assert_eq!(trigger.sub_triggers[0].trigger_type, 2);
        assert_eq!(trigger.sub_triggers[1].time, 30.0);
        assert_eq!(trigger.count(), 3);
    }

    #[test]
    fn test_merged_trigger_nested() {
        let leaf = make_trigger(1, 4000, 10, 20, &[]);
        let merged = make_trigger(constants::MERGED_TRIGGER_TYPE, 4000, 10, 20, &[leaf]);
        let global = make_trigger(0, constants::GLOBAL_TRIGGER_SOURCE, 10, 20, &[merged]);
        let trigger = decode_trigger(&global, 0, &DecodeConfiguration::new(0)).unwrap();
        assert_eq!(trigger.count(), 3);
        assert_eq!(trigger.sub_triggers[0].sub_triggers[0].trigger_type, 1);
    }

    fn nested_globals(levels: usize) -> Vec<u8> {
        let mut buf = make_trigger(4, 4000, 0, 0, &[]);
        for _ in 0..levels {
            buf = make_trigger(0, constants::GLOBAL_TRIGGER_SOURCE, 0, 0, &[buf]);
        }
        buf
    }

    #[test]
    fn test_nesting_limit() {
        let config = DecodeConfiguration::new(0);

        let buf = nested_globals(constants::MAX_TRIGGER_DEPTH);
        let trigger = decode_trigger(&buf, 0, &config).unwrap();
        assert_eq!(trigger.count(), constants::MAX_TRIGGER_DEPTH + 1);

        let buf = nested_globals(constants::MAX_TRIGGER_DEPTH + 1);
        assert!(matches!(
            decode_trigger(&buf, 0, &config),
            Err(PayloadError::Format(_))
        ));
    }

    #[test]
    fn test_deep_chain_is_rejected() {
        // Far deeper than any stack could follow; built front to back
        let levels = 40_000;
        let leaf = make_trigger(4, 4000, 0, 0, &[]);
        let header = make_trigger(0, constants::GLOBAL_TRIGGER_SOURCE, 0, 0, &[]);
        let mut buf = Vec::with_capacity(levels * header.len() + leaf.len());
        for level in 0..levels {
            let mut outer = header.clone();
            let len = ((levels - level) * header.len() + leaf.len()) as u32;
            outer[..4].copy_from_slice(&len.to_be_bytes());
            outer[constants::COMPOSITE_COUNT..].copy_from_slice(&1u16.to_be_bytes());
            buf.extend_from_slice(&outer);
        }
        buf.extend_from_slice(&leaf);
        assert!(matches!(
            decode_trigger(&buf, 0, &DecodeConfiguration::new(0)),
            Err(PayloadError::Format(_))
        ));
    }

    #[test]
    fn test_bad_composites() {
        let mut bogus = Vec::new();
        push_u32(&mut bogus, 8);
        push_u32(&mut bogus, 42);
        let buf = make_trigger(0, constants::GLOBAL_TRIGGER_SOURCE, 0, 0, &[bogus]);
        assert!(matches!(
            decode_trigger(&buf, 0, &DecodeConfiguration::new(0)),
            Err(PayloadError::Format(_))
        ));

        let mut empty = Vec::new();
        push_u32(&mut empty, 0);
        push_u32(&mut empty, constants::TAG);
        let buf = make_trigger(0, constants::GLOBAL_TRIGGER_SOURCE, 0, 0, &[empty]);
        assert!(matches!(
            decode_trigger(&buf, 0, &DecodeConfiguration::new(0)),
            Err(PayloadError::Format(_))
        ));

        let mut overlong = Vec::new();
        push_u32(&mut overlong, 500);
        push_u32(&mut overlong, constants::TAG);
        let buf = make_trigger(0, constants::GLOBAL_TRIGGER_SOURCE, 0, 0, &[overlong]);
        assert!(matches!(
            decode_trigger(&buf, 0, &DecodeConfiguration::new(0)),
            Err(PayloadError::Format(_))
        ));
    }
}
