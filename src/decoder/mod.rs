//! Decoder module for DAQ payload records
//!
//! Converts individual records of a raw payload into structured launches
//! and trigger requests.

pub mod common;
pub mod delta;
pub mod event;
pub mod hit;
pub mod registry;
pub mod trigger;
pub mod v5;

pub use common::{
    AtwdSelect, ChargeStamp, ChargeStampKind, DecodeConfiguration, DecodedLaunch, TriggerMode,
    TriggerType, Waveform,
};
pub use event::EventHeader;
pub use registry::{decode_launch, DecodedRecord, RecordHandler, RecordRegistry, RecordTypeTag};
pub use trigger::DecodedTrigger;
pub use v5::{HitRecordKind, V5Event};
