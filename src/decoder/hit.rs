//! Decoders for delta-compressed DOM launch records
//!
//! Two record layouts carry the same compressed hit:
//!
//! ## Type 18 (current)
//! ```text
//! +0   u32  record length
//! +4   u32  record type (18)
//! +8   u64  launch time (DOM clock, 0.1 ns)
//! +28  u64  mainboard ID
//! +40  u16  hit flags (bit 0 pedestal subtracted, bit 1 IceTop charge stamp)
//! +50  ...  compressed hit
//! ```
//!
//! ## Type 3 (legacy)
//! ```text
//! +0   u32  record length
//! +4   u32  record type (3)
//! +8   u64  mainboard ID
//! +24  u64  launch time
//! +32  u16  byte-order mark (1)
//! +34  u16  version (2)
//! +36  u16  hit flags
//! +46  ...  compressed hit
//! ```

use crate::common::{BoardId, ByteReader, PayloadError, PayloadResult};

use super::common::{ChargeStampKind, DecodeConfiguration, DecodedLaunch};
use super::delta;

/// Record layout constants
pub mod constants {
    pub const RECORD_LENGTH: usize = 0;
    pub const RECORD_TYPE: usize = 4;

    pub mod hit_flags {
        pub const PEDESTAL_SUBTRACTED: u16 = 0x1;
        pub const ICETOP_CHARGE_STAMP: u16 = 0x2;
    }

    pub mod type18 {
        pub const TAG: u32 = 18;
        pub const LAUNCH_TIME: usize = 8;
        pub const MAINBOARD_ID: usize = 28;
        pub const HIT_FLAGS: usize = 40;
        pub const HIT: usize = 50;
    }

    pub mod type3 {
        pub const TAG: u32 = 3;
        pub const MAINBOARD_ID: usize = 8;
        pub const LAUNCH_TIME: usize = 24;
        pub const BYTE_ORDER: usize = 32;
        pub const VERSION: usize = 34;
        pub const HIT_FLAGS: usize = 36;
        pub const HIT: usize = 46;
        pub const EXPECTED_BYTE_ORDER: u16 = 1;
        pub const EXPECTED_VERSION: u16 = 2;
        /// word1 bits that carry the LC condition
        pub const LC_BITS: u32 = 0x30000;
    }
}

use constants::{hit_flags, type18, type3};

/// Borrow the span of the record starting at `start`
///
/// The declared length must cover at least `min_len` bytes and lie inside
/// the buffer.
pub(crate) fn record_span(buffer: &[u8], start: usize, min_len: usize) -> PayloadResult<&[u8]> {
    let reader = ByteReader::big_endian(buffer);
    let offset = field_offset(buffer, start, constants::RECORD_LENGTH)?;
    let length = reader.read::<u32>(offset)? as usize;
    if length < min_len {
        return Err(PayloadError::format(format!(
            "record at offset {} declares {} bytes, shorter than its {}-byte header",
            start, length, min_len
        )));
    }
    reader.slice(start, length).map_err(|_| {
        PayloadError::format(format!(
            "record at offset {} declares {} bytes but only {} remain",
            start,
            length,
            buffer.len().saturating_sub(start)
        ))
    })
}

/// Offset of a record field, or OutOfRange if `start` is past any buffer
pub(crate) fn field_offset(buffer: &[u8], start: usize, field: usize) -> PayloadResult<usize> {
    start
        .checked_add(field)
        .ok_or_else(|| PayloadError::out_of_range(start, 4, buffer.len()))
}

fn charge_stamp_kind(flags: u16) -> ChargeStampKind {
    if flags & hit_flags::ICETOP_CHARGE_STAMP != 0 {
        ChargeStampKind::IceTop
    } else {
        ChargeStampKind::InIce
    }
}

/// Encoded length of the type-18 record at `start`, from its hit size
pub fn type18_encoded_len(buffer: &[u8], start: usize) -> PayloadResult<usize> {
    let span = record_span(buffer, start, type18::HIT + delta::constants::HEADER_SIZE)?;
    let header = delta::CompressionHeader::read(&ByteReader::big_endian(span), type18::HIT)?;
    Ok(type18::HIT + header.hit_size())
}

/// Decode the type-18 record at `start`
pub fn decode_type18(
    buffer: &[u8],
    start: usize,
    config: &DecodeConfiguration,
) -> PayloadResult<(BoardId, DecodedLaunch)> {
    let span = record_span(buffer, start, type18::HIT + delta::constants::HEADER_SIZE)?;
    let reader = ByteReader::big_endian(span);

    let board = BoardId(reader.read::<u64>(type18::MAINBOARD_ID)?);
    let launch_time = reader.read::<u64>(type18::LAUNCH_TIME)?;
    let flags = reader.read::<u16>(type18::HIT_FLAGS)?;

    let mut launch = DecodedLaunch::new(
        board,
        launch_time,
        config.relative_ns(launch_time),
        flags & hit_flags::PEDESTAL_SUBTRACTED != 0,
    );
    delta::decode_into(
        span,
        type18::HIT,
        charge_stamp_kind(flags),
        &mut launch,
        config.waveforms,
    )?;

    Ok((board, launch))
}

/// Encoded length of the type-3 record at `start`, from its hit size
pub fn type3_encoded_len(buffer: &[u8], start: usize) -> PayloadResult<usize> {
    let span = record_span(buffer, start, type3::HIT + delta::constants::HEADER_SIZE)?;
    let header = delta::CompressionHeader::read(&ByteReader::big_endian(span), type3::HIT)?;
    Ok(type3::HIT + header.hit_size())
}

/// Decode the legacy type-3 record at `start`
pub fn decode_type3(
    buffer: &[u8],
    start: usize,
    config: &DecodeConfiguration,
) -> PayloadResult<(BoardId, DecodedLaunch)> {
    let span = record_span(buffer, start, type3::HIT + delta::constants::HEADER_SIZE)?;
    let reader = ByteReader::big_endian(span);

    let byte_order = reader.read::<u16>(type3::BYTE_ORDER)?;
    if byte_order != type3::EXPECTED_BYTE_ORDER {
        return Err(PayloadError::format(format!(
            "type 3 record at offset {} has byte-order mark {}",
            start, byte_order
        )));
    }
    let version = reader.read::<u16>(type3::VERSION)?;
    if version != type3::EXPECTED_VERSION {
        return Err(PayloadError::format(format!(
            "type 3 record at offset {} has unsupported version {}",
            start, version
        )));
    }

    let board = BoardId(reader.read::<u64>(type3::MAINBOARD_ID)?);
    let launch_time = reader.read::<u64>(type3::LAUNCH_TIME)?;
    let flags = reader.read::<u16>(type3::HIT_FLAGS)?;

    let mut launch = DecodedLaunch::new(
        board,
        launch_time,
        config.relative_ns(launch_time),
        flags & hit_flags::PEDESTAL_SUBTRACTED != 0,
    );
    delta::decode_into(
        span,
        type3::HIT,
        charge_stamp_kind(flags),
        &mut launch,
        config.waveforms,
    )?;

    // Legacy records carry LC in word 1 even without a full readout
    let word1 = reader.read::<u32>(type3::HIT)?;
    launch.lc_bit = word1 & type3::LC_BITS != 0;

    Ok((board, launch))
}
