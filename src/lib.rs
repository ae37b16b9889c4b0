//! payload-parsing: decoder and trimmer for DAQ event payloads
//!
//! Scans binary event payloads into record indexes, decodes delta-compressed
//! DOM launches and trigger requests, and rebuilds payloads with selected
//! records removed.

pub mod common;
pub mod config;
pub mod decoder;
pub mod emulator;
pub mod payload;
