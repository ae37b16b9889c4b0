//! Payload-level operations
//!
//! - `scanner`: index the records of a payload without decoding waveforms
//! - `trimmer`: rebuild a payload without selected records
//! - `event`: full decode of a payload into launches and triggers
//! - `builder`: encode records and events
//! - `file`: read and write payload files

pub mod builder;
pub mod event;
pub mod file;
pub mod scanner;
pub mod trimmer;

pub use builder::{EventBuilder, LaunchFormat, LaunchRecord, TriggerRecord};
pub use event::{DecodedEvent, EventDecoder};
pub use file::{PayloadFileReader, PayloadFileWriter};
pub use scanner::{PayloadIndex, PayloadScanner, RecordContent, ScannedRecord};
pub use trimmer::{PayloadTrimmer, TrimSelection, TrimmedPayload};
