//! Record type registry
//!
//! Maps record type tags to decode routines. The set of tags is fixed when
//! the registry is first used and never changes afterwards, so the shared
//! instance can be read from any thread without locking.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::trace;

use crate::common::{BoardId, ByteReader, PayloadError, PayloadResult};

use super::common::{DecodeConfiguration, DecodedLaunch};
use super::hit::{self, constants::RECORD_TYPE};
use super::trigger::{self, DecodedTrigger};

/// Record type tag read from offset 4 of every record
pub type RecordTypeTag = u32;

/// Length and type fields
const MIN_RECORD_SIZE: usize = 8;

/// Decodes one launch record
pub type LaunchDecodeFn =
    fn(&[u8], usize, &DecodeConfiguration) -> PayloadResult<(BoardId, DecodedLaunch)>;

/// Computes a record's encoded length from its contents
pub type EncodedLenFn = fn(&[u8], usize) -> PayloadResult<usize>;

/// Decodes one trigger request record
pub type TriggerDecodeFn =
    fn(&[u8], usize, &DecodeConfiguration) -> PayloadResult<DecodedTrigger>;

/// What a registered tag decodes to
#[derive(Clone, Copy)]
pub enum RecordHandler {
    Launch {
        decode: LaunchDecodeFn,
        encoded_len: EncodedLenFn,
    },
    Trigger { decode: TriggerDecodeFn },
}

#[derive(Clone, Copy)]
struct RegistryEntry {
    name: &'static str,
    handler: RecordHandler,
}

/// Result of decoding any registered record
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord {
    Launch(BoardId, DecodedLaunch),
    Trigger(DecodedTrigger),
}

/// Closed mapping of record tags to decoders
pub struct RecordRegistry {
    entries: HashMap<RecordTypeTag, RegistryEntry>,
}

static REGISTRY: OnceLock<RecordRegistry> = OnceLock::new();

impl RecordRegistry {
    /// Registry with every record type this crate understands
    fn standard() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            hit::constants::type3::TAG,
            RegistryEntry {
                name: "delta-compressed hit (legacy)",
                handler: RecordHandler::Launch {
                    decode: hit::decode_type3,
                    encoded_len: hit::type3_encoded_len,
                },
            },
        );
        entries.insert(
            hit::constants::type18::TAG,
            RegistryEntry {
                name: "delta-compressed hit",
                handler: RecordHandler::Launch {
                    decode: hit::decode_type18,
                    encoded_len: hit::type18_encoded_len,
                },
            },
        );
        entries.insert(
            trigger::constants::TAG,
            RegistryEntry {
                name: "trigger request",
                handler: RecordHandler::Trigger {
                    decode: trigger::decode_trigger,
                },
            },
        );
        Self { entries }
    }

    /// The shared registry, built on first use
    pub fn global() -> &'static RecordRegistry {
        REGISTRY.get_or_init(Self::standard)
    }

    pub fn handler(&self, tag: RecordTypeTag) -> Option<RecordHandler> {
        self.entries.get(&tag).map(|e| e.handler)
    }

    pub fn contains(&self, tag: RecordTypeTag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Human-readable name of a registered tag
    pub fn name(&self, tag: RecordTypeTag) -> Option<&'static str> {
        self.entries.get(&tag).map(|e| e.name)
    }

    /// Registered tags in ascending order
    pub fn tags(&self) -> Vec<RecordTypeTag> {
        let mut tags: Vec<_> = self.entries.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Decode the launch record at `start` with the decoder for `tag`
    pub fn decode_launch(
        &self,
        tag: RecordTypeTag,
        start: usize,
        buffer: &[u8],
        config: &DecodeConfiguration,
    ) -> PayloadResult<(BoardId, DecodedLaunch)> {
        match self.handler(tag) {
            Some(RecordHandler::Launch { decode, .. }) => {
                let (board, launch) = decode(buffer, start, config)?;
                let span = hit::record_span(buffer, start, MIN_RECORD_SIZE)?;
                trace!(tag, board = %board, length = span.len(), "decoded launch record");
                Ok((board, launch))
            }
            _ => Err(PayloadError::UnsupportedRecordType(tag)),
        }
    }

    /// Decode the trigger request record at `start`
    pub fn decode_trigger(
        &self,
        tag: RecordTypeTag,
        start: usize,
        buffer: &[u8],
        config: &DecodeConfiguration,
    ) -> PayloadResult<DecodedTrigger> {
        match self.handler(tag) {
            Some(RecordHandler::Trigger { decode }) => decode(buffer, start, config),
            _ => Err(PayloadError::UnsupportedRecordType(tag)),
        }
    }

    /// Decode whatever record sits at `start`, dispatching on its own tag
    pub fn decode_record(
        &self,
        start: usize,
        buffer: &[u8],
        config: &DecodeConfiguration,
    ) -> PayloadResult<DecodedRecord> {
        let tag = ByteReader::big_endian(buffer)
            .read::<u32>(hit::field_offset(buffer, start, RECORD_TYPE)?)?;
        match self.handler(tag) {
            Some(RecordHandler::Launch { .. }) => {
                let (board, launch) = self.decode_launch(tag, start, buffer, config)?;
                Ok(DecodedRecord::Launch(board, launch))
            }
            Some(RecordHandler::Trigger { .. }) => {
                Ok(DecodedRecord::Trigger(self.decode_trigger(tag, start, buffer, config)?))
            }
            None => Err(PayloadError::UnsupportedRecordType(tag)),
        }
    }

    /// Encoded length of a launch record computed from its contents
    ///
    /// `None` for record types whose length is only known from the
    /// length field.
    pub fn encoded_len(
        &self,
        tag: RecordTypeTag,
        start: usize,
        buffer: &[u8],
    ) -> PayloadResult<Option<usize>> {
        match self.handler(tag) {
            Some(RecordHandler::Launch { encoded_len, .. }) => encoded_len(buffer, start).map(Some),
            Some(RecordHandler::Trigger { .. }) => Ok(None),
            None => Err(PayloadError::UnsupportedRecordType(tag)),
        }
    }
}

/// Decode a launch record using the shared registry
pub fn decode_launch(
    tag: RecordTypeTag,
    start: usize,
    buffer: &[u8],
    config: &DecodeConfiguration,
) -> PayloadResult<(BoardId, DecodedLaunch)> {
    RecordRegistry::global().decode_launch(tag, start, buffer, config)
}
