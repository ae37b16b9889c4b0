//! Payload scanner
//!
//! Walks a payload record by record using each record's length field and
//! produces an index of record spans with their header fields decoded.
//! Waveforms are never decoded here.
//!
//! The spans of a successful scan partition the buffer exactly: the
//! envelope header (if any) followed by every record in buffer order.
//! Anything that would leave a gap, overlap or run past the end fails the
//! whole scan.

use tracing::debug;

use crate::common::{BoardId, ByteReader, PayloadError, PayloadResult, RecordSpan};
use crate::decoder::event::constants as envelope;
use crate::decoder::hit::constants::RECORD_TYPE;
use crate::decoder::{
    DecodeConfiguration, DecodedLaunch, DecodedTrigger, EventHeader, RecordHandler,
    RecordRegistry, RecordTypeTag,
};

/// Smallest record that still carries its length and type
pub const MIN_RECORD_SIZE: usize = 8;

/// Header-level content of one record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordContent {
    /// Launch with header fields only (no waveform)
    Launch(DecodedLaunch),
    Trigger(DecodedTrigger),
    /// Unregistered tag kept as an opaque span
    Unsupported,
}

/// One record found by the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRecord {
    pub tag: RecordTypeTag,
    pub span: RecordSpan,
    pub content: RecordContent,
    /// Length implied by the record's contents, where the type defines one
    pub encoded_len: Option<usize>,
}

impl ScannedRecord {
    pub fn board(&self) -> Option<BoardId> {
        self.launch().map(|l| l.board)
    }

    pub fn launch(&self) -> Option<&DecodedLaunch> {
        match &self.content {
            RecordContent::Launch(launch) => Some(launch),
            _ => None,
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self.content, RecordContent::Trigger(_))
    }
}

/// Result of scanning one payload
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadIndex {
    /// Envelope header, absent for bare record streams
    pub header: Option<EventHeader>,
    pub header_span: Option<RecordSpan>,
    /// Records in buffer order
    pub records: Vec<ScannedRecord>,
    /// Context the records were decoded with
    pub config: DecodeConfiguration,
    pub buffer_len: usize,
}

impl PayloadIndex {
    /// Every span in buffer order, header first
    pub fn spans(&self) -> impl Iterator<Item = RecordSpan> + '_ {
        self.header_span
            .into_iter()
            .chain(self.records.iter().map(|r| r.span))
    }

    /// Launch records in buffer order
    pub fn launches(&self) -> impl Iterator<Item = (&DecodedLaunch, RecordSpan)> + '_ {
        self.records
            .iter()
            .filter_map(|r| r.launch().map(|launch| (launch, r.span)))
    }

    /// Launch records ordered by start time (ties keep buffer order)
    pub fn launches_by_time(&self) -> Vec<(&DecodedLaunch, RecordSpan)> {
        let mut launches: Vec<_> = self.launches().collect();
        launches.sort_by(|a, b| a.0.start_time.total_cmp(&b.0.start_time));
        launches
    }

    pub fn triggers(&self) -> impl Iterator<Item = &DecodedTrigger> + '_ {
        self.records.iter().filter_map(|r| match &r.content {
            RecordContent::Trigger(trigger) => Some(trigger),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Builds a [`PayloadIndex`] for a payload buffer
#[derive(Clone, Copy)]
pub struct PayloadScanner<'r> {
    registry: &'r RecordRegistry,
    config: DecodeConfiguration,
    skip_unsupported: bool,
}

impl PayloadScanner<'static> {
    /// Scanner using the shared registry
    ///
    /// For enveloped payloads `config` only supplies the year and flags;
    /// the global time comes from the envelope.
    pub fn new(config: DecodeConfiguration) -> Self {
        Self::with_registry(RecordRegistry::global(), config)
    }
}

impl<'r> PayloadScanner<'r> {
    pub fn with_registry(registry: &'r RecordRegistry, config: DecodeConfiguration) -> Self {
        Self {
            registry,
            config,
            skip_unsupported: false,
        }
    }

    /// Keep records with unregistered tags as opaque spans instead of failing
    pub fn skip_unsupported(mut self, skip: bool) -> Self {
        self.skip_unsupported = skip;
        self
    }

    pub fn registry(&self) -> &'r RecordRegistry {
        self.registry
    }

    pub fn config(&self) -> &DecodeConfiguration {
        &self.config
    }

    /// Scan an enveloped event or a bare record stream
    pub fn scan(&self, buffer: &[u8]) -> PayloadResult<PayloadIndex> {
        if EventHeader::is_envelope(buffer) {
            self.scan_event(buffer)
        } else {
            self.scan_records(buffer)
        }
    }

    /// Scan a payload that must start with an event envelope
    pub fn scan_event(&self, buffer: &[u8]) -> PayloadResult<PayloadIndex> {
        let header = EventHeader::parse(buffer)?;
        let config = header.decode_configuration(&self.config)?;
        let records = self.walk(buffer, envelope::HEADER_SIZE, &config)?;

        if records.len() != header.record_count as usize {
            return Err(PayloadError::format(format!(
                "event {} declares {} records but contains {}",
                header.event_id,
                header.record_count,
                records.len()
            )));
        }

        debug!(
            event_id = header.event_id,
            records = records.len(),
            bytes = buffer.len(),
            "scanned event"
        );

        Ok(PayloadIndex {
            header: Some(header),
            header_span: Some(RecordSpan::new(0, envelope::HEADER_SIZE, buffer.len())?),
            records,
            config,
            buffer_len: buffer.len(),
        })
    }

    /// Scan a bare sequence of records using the scanner's own context
    pub fn scan_records(&self, buffer: &[u8]) -> PayloadResult<PayloadIndex> {
        let records = self.walk(buffer, 0, &self.config)?;
        debug!(records = records.len(), bytes = buffer.len(), "scanned record stream");
        Ok(PayloadIndex {
            header: None,
            header_span: None,
            records,
            config: self.config,
            buffer_len: buffer.len(),
        })
    }

    fn walk(
        &self,
        buffer: &[u8],
        start: usize,
        config: &DecodeConfiguration,
    ) -> PayloadResult<Vec<ScannedRecord>> {
        let reader = ByteReader::big_endian(buffer);
        let headers_only = config.headers_only();
        let mut records = Vec::new();
        let mut cursor = start;

        while cursor < buffer.len() {
            let length = reader.read::<u32>(cursor).map_err(|_| {
                PayloadError::format(format!(
                    "truncated record header at offset {} ({} bytes left)",
                    cursor,
                    buffer.len() - cursor
                ))
            })? as usize;
            if length < MIN_RECORD_SIZE {
                return Err(PayloadError::format(format!(
                    "record at offset {} declares {} bytes",
                    cursor, length
                )));
            }
            let end = cursor.checked_add(length).ok_or_else(|| {
                PayloadError::format(format!("record length {} overflows", length))
            })?;
            let span = RecordSpan::new(cursor, end, buffer.len())?;
            let tag = reader.read::<u32>(cursor + RECORD_TYPE)?;

            let (content, encoded_len) = match self.registry.handler(tag) {
                Some(RecordHandler::Launch { .. }) => {
                    let (_, launch) =
                        self.registry
                            .decode_launch(tag, cursor, buffer, &headers_only)?;
                    let encoded_len = self.registry.encoded_len(tag, cursor, buffer)?;
                    (RecordContent::Launch(launch), encoded_len)
                }
                Some(RecordHandler::Trigger { .. }) => {
                    let trigger = self
                        .registry
                        .decode_trigger(tag, cursor, buffer, &headers_only)?;
                    (RecordContent::Trigger(trigger), None)
                }
                None if self.skip_unsupported => {
                    debug!(tag, offset = cursor, length, "keeping unsupported record as opaque span");
                    (RecordContent::Unsupported, None)
                }
                None => return Err(PayloadError::UnsupportedRecordType(tag)),
            };

            records.push(ScannedRecord {
                tag,
                span,
                content,
                encoded_len,
            });
            cursor = end;
        }

        Ok(records)
    }
}
