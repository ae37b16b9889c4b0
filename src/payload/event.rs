//! Full event decode
//!
//! Scans a payload, then decodes every launch completely (waveforms
//! included when requested) and groups launches by board.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::common::{BoardId, PayloadError, PayloadResult};
use crate::decoder::{DecodeConfiguration, DecodedLaunch, DecodedTrigger, EventHeader};

use super::scanner::{PayloadScanner, RecordContent};

/// Everything decoded from one payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent {
    /// Envelope header, absent for bare record streams
    pub header: Option<EventHeader>,
    /// Calendar time of the global trigger
    pub datetime: Option<DateTime<Utc>>,
    /// Launches per board, ordered by start time
    pub launches: BTreeMap<BoardId, Vec<DecodedLaunch>>,
    /// Top-level trigger requests in buffer order
    pub triggers: Vec<DecodedTrigger>,
}

impl DecodedEvent {
    pub fn launch_count(&self) -> usize {
        self.launches.values().map(Vec::len).sum()
    }

    pub fn boards(&self) -> impl Iterator<Item = BoardId> + '_ {
        self.launches.keys().copied()
    }
}

/// Decodes payloads into [`DecodedEvent`]s
#[derive(Clone, Copy)]
pub struct EventDecoder<'r> {
    scanner: PayloadScanner<'r>,
}

impl EventDecoder<'static> {
    pub fn new(config: DecodeConfiguration) -> Self {
        Self::with_scanner(PayloadScanner::new(config))
    }
}

impl<'r> EventDecoder<'r> {
    pub fn with_scanner(scanner: PayloadScanner<'r>) -> Self {
        Self { scanner }
    }

    pub fn decode(&self, buffer: &[u8]) -> PayloadResult<DecodedEvent> {
        let index = self.scanner.scan(buffer)?;
        let config = index.config;
        let registry = self.scanner.registry();

        let mut launches: BTreeMap<BoardId, Vec<DecodedLaunch>> = BTreeMap::new();
        let mut triggers = Vec::new();
        for record in &index.records {
            match &record.content {
                RecordContent::Launch(header) => {
                    let launch = if config.waveforms {
                        registry
                            .decode_launch(record.tag, record.span.start, buffer, &config)?
                            .1
                    } else {
                        header.clone()
                    };
                    launches.entry(launch.board).or_default().push(launch);
                }
                RecordContent::Trigger(trigger) => {
                    if config.triggers {
                        triggers.push(trigger.clone());
                    }
                }
                RecordContent::Unsupported => {
                    return Err(PayloadError::UnsupportedRecordType(record.tag));
                }
            }
        }

        for list in launches.values_mut() {
            list.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        }

        let event = DecodedEvent {
            header: index.header,
            datetime: index.header.and_then(|h| h.start_datetime()),
            launches,
            triggers,
        };
        debug!(
            boards = event.launches.len(),
            launches = event.launch_count(),
            triggers = event.triggers.len(),
            "decoded event"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::common::FADC_SAMPLES;
    use crate::decoder::Waveform;
    use crate::payload::builder::{EventBuilder, LaunchRecord, TriggerRecord};

    fn event() -> Vec<u8> {
        let wf = Waveform {
            fadc: (0..FADC_SAMPLES as i32).map(|i| 100 + (i % 7)).collect(),
            ..Default::default()
        };
        EventBuilder::new(10_000, 2012, 42, 120_000)
            .launch(&LaunchRecord::new(BoardId(2), 10_500).with_waveform(wf))
            .unwrap()
            .launch(&LaunchRecord::new(BoardId(1), 10_300))
            .unwrap()
            .trigger(&TriggerRecord::new(0, 4000, 10_000, 10_400))
            .unwrap()
            .launch(&LaunchRecord::new(BoardId(2), 10_100))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_decode_event() {
        let decoded = EventDecoder::new(DecodeConfiguration::default())
            .decode(&event())
            .unwrap();
        assert_eq!(decoded.header.map(|h| h.event_id), Some(42));
        assert_eq!(decoded.launch_count(), 3);
        assert_eq!(decoded.boards().collect::<Vec<_>>(), vec![BoardId(1), BoardId(2)]);

        let board2 = &decoded.launches[&BoardId(2)];
        assert_eq!(board2[0].start_time, 10.0);
        assert_eq!(board2[1].start_time, 50.0);
        assert!(board2[0].waveform.as_ref().unwrap().fadc.is_empty());
        assert_eq!(board2[1].waveform.as_ref().unwrap().fadc.len(), FADC_SAMPLES);
        assert_eq!(decoded.triggers.len(), 1);

        let datetime = decoded.datetime.unwrap();
        assert_eq!(datetime.to_rfc3339(), "2012-01-01T00:00:00.000001+00:00");
    }

    #[test]
    fn test_headers_only() {
        let mut config = DecodeConfiguration::default().headers_only();
        config.triggers = false;
        let decoded = EventDecoder::new(config).decode(&event()).unwrap();
        assert!(decoded.launches.values().flatten().all(|l| l.waveform.is_none()));
        assert!(decoded.triggers.is_empty());
    }

    #[test]
    fn test_unsupported_record_fails_decode() {
        let mut opaque = vec![0u8; 12];
        opaque[0..4].copy_from_slice(&12u32.to_be_bytes());
        opaque[4..8].copy_from_slice(&77u32.to_be_bytes());
        let buf = EventBuilder::new(0, 2012, 1, 1).raw_record(opaque).build().unwrap();

        let scanner = PayloadScanner::new(DecodeConfiguration::default()).skip_unsupported(true);
        assert!(scanner.scan(&buf).is_ok());
        assert!(matches!(
            EventDecoder::with_scanner(scanner).decode(&buf),
            Err(PayloadError::UnsupportedRecordType(77))
        ));
    }
}
