//! Framing of V5 event payloads (type 21)
//!
//! ```text
//! +0   u32  payload length (whole event)
//! +4   u32  payload type (21)
//! +8   ...  header fields as in the record envelope
//! +34  u32  hit record count H
//! +38  ...  H hit records
//!      u32  trigger record count T
//!      ...  T trigger records
//! ```
//!
//! Hit record: u16 length (including itself), u8 kind (1 delta-compressed,
//! 0 engineering), then the body. Trigger record: 24 fixed bytes with the
//! number of hit indices N as u32 at +20, followed by N u32 hit indices.
//!
//! Only the framing is walked here. Hit record bodies stay opaque.

use serde::Serialize;

use crate::common::{bytes, ByteReader, Endian, PayloadError, PayloadResult, RecordSpan};

use super::event::{constants as envelope, EventHeader};

pub mod constants {
    pub const TAG: u32 = 21;
    pub const HIT_RECORD_COUNT: usize = 34;

    pub const HIT_LENGTH: usize = 0;
    pub const HIT_KIND: usize = 2;
    pub const HIT_HEADER_SIZE: usize = 3;

    pub const TRIGGER_RECORD_COUNT_SIZE: usize = 4;
    pub const TRIGGER_HIT_INDEX_COUNT: usize = 20;
    pub const TRIGGER_FIXED_SIZE: usize = 24;
    pub const HIT_INDEX_SIZE: usize = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HitRecordKind {
    Engineering,
    DeltaCompressed,
}

impl HitRecordKind {
    pub fn from_code(code: u8) -> PayloadResult<Self> {
        match code {
            0 => Ok(Self::Engineering),
            1 => Ok(Self::DeltaCompressed),
            other => Err(PayloadError::format(format!(
                "hit record kind must be 0 or 1, found {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct V5HitRecord {
    pub kind: HitRecordKind,
    pub span: RecordSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct V5TriggerRecord {
    pub hit_indices: u32,
    pub span: RecordSpan,
}

/// Record layout of one V5 event
///
/// `header.record_count` is the hit record count. The spans together with
/// the header and the trigger count field cover the buffer exactly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct V5Event {
    pub header: EventHeader,
    pub hits: Vec<V5HitRecord>,
    /// Offset of the u32 trigger record count
    pub trigger_count_offset: usize,
    pub triggers: Vec<V5TriggerRecord>,
}

impl V5Event {
    /// Whether `buffer` carries the V5 type tag
    pub fn is_v5(buffer: &[u8]) -> bool {
        bytes::read::<u32>(Endian::Big, envelope::TYPE, buffer)
            .map(|tag| tag == constants::TAG)
            .unwrap_or(false)
    }

    pub fn parse(buffer: &[u8]) -> PayloadResult<Self> {
        let reader = ByteReader::big_endian(buffer);
        let tag = reader.read::<u32>(envelope::TYPE)?;
        if tag != constants::TAG {
            return Err(PayloadError::UnsupportedRecordType(tag));
        }
        let header = EventHeader::parse_fields(buffer)?;

        let mut cursor = envelope::HEADER_SIZE;
        let mut hits = Vec::new();
        for n in 0..header.record_count {
            let length = reader.read::<u16>(cursor + constants::HIT_LENGTH).map_err(|_| {
                PayloadError::format(format!(
                    "event {} ends before hit record {} of {}",
                    header.event_id, n, header.record_count
                ))
            })? as usize;
            if length < constants::HIT_HEADER_SIZE {
                return Err(PayloadError::format(format!(
                    "hit record at offset {} declares {} bytes",
                    cursor, length
                )));
            }
            let span = RecordSpan::new(cursor, cursor + length, buffer.len())?;
            let code = reader.read::<u8>(cursor + constants::HIT_KIND)?;
            let kind = HitRecordKind::from_code(code)?;
            hits.push(V5HitRecord { kind, span });
            cursor = span.end;
        }

        let trigger_count_offset = cursor;
        let trigger_count = reader.read::<u32>(cursor).map_err(|_| {
            PayloadError::format(format!(
                "event {} has no trigger record count after its hit records",
                header.event_id
            ))
        })?;
        cursor += constants::TRIGGER_RECORD_COUNT_SIZE;

        let mut triggers = Vec::new();
        for _ in 0..trigger_count {
            let hit_indices = reader.read::<u32>(cursor + constants::TRIGGER_HIT_INDEX_COUNT)?;
            let length = (hit_indices as usize)
                .checked_mul(constants::HIT_INDEX_SIZE)
                .and_then(|n| n.checked_add(constants::TRIGGER_FIXED_SIZE))
                .ok_or_else(|| {
                    PayloadError::format(format!("{} hit indices overflow", hit_indices))
                })?;
            let end = cursor.checked_add(length).ok_or_else(|| {
                PayloadError::format(format!("trigger record length {} overflows", length))
            })?;
            let span = RecordSpan::new(cursor, end, buffer.len())?;
            triggers.push(V5TriggerRecord { hit_indices, span });
            cursor = end;
        }

        if cursor != buffer.len() {
            return Err(PayloadError::format(format!(
                "event {} has {} bytes after its last trigger record",
                header.event_id,
                buffer.len() - cursor
            )));
        }

        Ok(Self {
            header,
            hits,
            trigger_count_offset,
            triggers,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// V5 event around the given hit record bodies and trigger hit index lists
    pub(crate) fn make_v5(hits: &[(u8, Vec<u8>)], triggers: &[Vec<u32>]) -> Vec<u8> {
        let mut buf = Vec::new();
        bytes::push(Endian::Big, &mut buf, 0u32);
        bytes::push(Endian::Big, &mut buf, constants::TAG);
        bytes::push(Endian::Big, &mut buf, 36_000_000_000_000u64);
        bytes::push(Endian::Big, &mut buf, 2_000u32);
        bytes::push(Endian::Big, &mut buf, 2011u16);
        bytes::push(Endian::Big, &mut buf, 9u32);
        bytes::push(Endian::Big, &mut buf, 147_349u32);
        bytes::push(Endian::Big, &mut buf, 0i32);
        bytes::push(Endian::Big, &mut buf, hits.len() as u32);
        for (kind, body) in hits {
            bytes::push(Endian::Big, &mut buf, (body.len() + 3) as u16);
            buf.push(*kind);
            buf.extend_from_slice(body);
        }
        bytes::push(Endian::Big, &mut buf, triggers.len() as u32);
        for indices in triggers {
            buf.extend_from_slice(&[0xAB; 20]);
            bytes::push(Endian::Big, &mut buf, indices.len() as u32);
            for index in indices {
                bytes::push(Endian::Big, &mut buf, *index);
            }
        }
        let len = buf.len() as u32;
        buf[..4].copy_from_slice(&len.to_be_bytes());
        buf
    }

    #[test]
    fn test_parse_framing() {
        let buf = make_v5(
            &[(1, vec![7; 10]), (0, vec![]), (1, vec![9; 4])],
            &[vec![0, 2], vec![]],
        );
        assert!(V5Event::is_v5(&buf));
        assert!(!EventHeader::is_envelope(&buf));

        let event = V5Event::parse(&buf).unwrap();
        assert_eq!(event.header.event_id, 9);
        assert_eq!(event.header.run_id, 147_349);
        assert_eq!(event.header.year, 2011);
        assert_eq!(event.header.record_count, 3);

        let kinds: Vec<_> = event.hits.iter().map(|h| h.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HitRecordKind::DeltaCompressed,
                HitRecordKind::Engineering,
                HitRecordKind::DeltaCompressed
            ]
        );
        assert_eq!(event.hits[0].span, RecordSpan { start: 38, end: 51 });
        assert_eq!(event.hits[1].span.len(), 3);
        assert_eq!(event.trigger_count_offset, 61);

        assert_eq!(event.triggers.len(), 2);
        assert_eq!(event.triggers[0].hit_indices, 2);
        assert_eq!(event.triggers[0].span.len(), 32);
        assert_eq!(event.triggers[1].span.len(), 24);
        assert_eq!(event.triggers[1].span.end, buf.len());
    }

    #[test]
    fn test_parse_empty_event() {
        let buf = make_v5(&[], &[]);
        let event = V5Event::parse(&buf).unwrap();
        assert!(event.hits.is_empty());
        assert!(event.triggers.is_empty());
        assert_eq!(buf.len(), envelope::HEADER_SIZE + 4);
    }

    #[test]
    fn test_bad_hit_record_kind() {
        let buf = make_v5(&[(2, vec![0; 4])], &[]);
        assert!(matches!(V5Event::parse(&buf), Err(PayloadError::Format(_))));
    }

    #[test]
    fn test_framing_errors() {
        // Hit record too short to hold its own header
        let mut buf = make_v5(&[(1, vec![0; 4])], &[]);
        buf[38..40].copy_from_slice(&2u16.to_be_bytes());
        assert!(matches!(V5Event::parse(&buf), Err(PayloadError::Format(_))));

        // Hit count larger than the records present
        let mut buf = make_v5(&[(1, vec![0; 4])], &[]);
        buf[constants::HIT_RECORD_COUNT..constants::HIT_RECORD_COUNT + 4]
            .copy_from_slice(&5u32.to_be_bytes());
        assert!(V5Event::parse(&buf).is_err());

        // Trigger record overruns the event
        let mut buf = make_v5(&[], &[vec![1, 2]]);
        let at = envelope::HEADER_SIZE + 4 + constants::TRIGGER_HIT_INDEX_COUNT;
        buf[at..at + 4].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(V5Event::parse(&buf), Err(PayloadError::Format(_))));

        // Trailing bytes after the last trigger record
        let mut buf = make_v5(&[], &[]);
        buf.extend_from_slice(&[0; 5]);
        let len = buf.len() as u32;
        buf[..4].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(V5Event::parse(&buf), Err(PayloadError::Format(_))));
    }

    #[test]
    fn test_not_v5() {
        let mut buf = make_v5(&[], &[]);
        buf[4..8].copy_from_slice(&envelope::TAG.to_be_bytes());
        assert!(!V5Event::is_v5(&buf));
        assert!(matches!(
            V5Event::parse(&buf),
            Err(PayloadError::UnsupportedRecordType(envelope::TAG))
        ));
    }
}
