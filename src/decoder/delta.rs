//! Delta-compressed hit decoder
//!
//! A compressed hit starts with two big-endian header words followed by a
//! bit-packed stream of sample differences.
//!
//! ## Compression word 1
//! ```text
//! bit 31      compression flag (always 1)
//! bit 30      min-bias launch
//! bits 18-27  trigger word
//! bits 16-17  local coincidence (1 = lower, 2 = upper, 3 = both)
//! bit 15      FADC available
//! bit 14      ATWD available
//! bits 12-13  ATWD channel count - 1
//! bit 11      ATWD chip B
//! bits 0-10   hit size in bytes (both header words + stream)
//! ```
//!
//! ## Compression word 3 (charge stamp)
//! ```text
//! in-ice:  bit 31 peak range, bits 27-30 peak index,
//!          bits 18-26 pre-peak, bits 9-17 peak, bits 0-8 post-peak
//! IceTop:  bits 0-15 stamp, bits 17-18 channel
//! ```
//!
//! ## Sample stream
//! Bits are consumed LSB-first from little-endian bytes. Words start 3 bits
//! wide. A word equal to `1 << (bits - 1)` at widths 1, 2, 3 and 6 widens the
//! next word (1 → 2 → 3 → 6 → 11). Any other word is a two's complement
//! difference added to the running sample; a difference small enough to fit
//! a narrower word steps the width down by one. The running sample and width
//! reset at every FADC/ATWD block boundary.

use crate::common::{ByteReader, PayloadError, PayloadResult};

use super::common::{
    AtwdSelect, ChargeStamp, ChargeStampKind, DecodedLaunch, TriggerMode, TriggerType, Waveform,
    ATWD_CHANNELS, ATWD_SAMPLES, FADC_SAMPLES,
};

/// Bit layout of the compression header words
pub mod constants {
    /// Both header words precede the sample stream
    pub const HEADER_SIZE: usize = 8;

    pub mod word1 {
        pub const COMPRESSION_FLAG: u32 = 1 << 31;
        pub const MIN_BIAS: u32 = 1 << 30;
        pub const TRIGGER_WORD_SHIFT: u32 = 18;
        pub const TRIGGER_WORD_MASK: u32 = 0x3FF;
        pub const LC_SHIFT: u32 = 16;
        pub const LC_MASK: u32 = 0x3;
        pub const FADC_AVAILABLE: u32 = 1 << 15;
        pub const ATWD_AVAILABLE: u32 = 1 << 14;
        pub const ATWD_CHANNELS_SHIFT: u32 = 12;
        pub const ATWD_CHANNELS_MASK: u32 = 0x3;
        pub const ATWD_B: u32 = 1 << 11;
        pub const HIT_SIZE_MASK: u32 = 0x7FF;
    }

    pub mod trigger_word {
        pub const SPE: u32 = 0x1;
        pub const MPE: u32 = 0x2;
        pub const CPU: u32 = 0x4;
        pub const ONBOARD_LED: u32 = 0x10;
        pub const FLASHER: u32 = 0x20;
    }

    pub mod lc {
        pub const LOWER: u32 = 0x1;
        pub const UPPER: u32 = 0x2;
    }

    pub mod word3 {
        pub const PEAK_RANGE: u32 = 1 << 31;
        pub const PEAK_SAMPLE_SHIFT: u32 = 27;
        pub const PEAK_SAMPLE_MASK: u32 = 0xF;
        pub const PRE_PEAK_SHIFT: u32 = 18;
        pub const PEAK_SHIFT: u32 = 9;
        pub const CHARGE_MASK: u32 = 0x1FF;
        pub const ICETOP_STAMP_MASK: u32 = 0xFFFF;
        pub const ICETOP_CHANNEL_SHIFT: u32 = 17;
        pub const ICETOP_CHANNEL_MASK: u32 = 0x3;
    }

    pub mod stream {
        pub const INITIAL_BITS: u32 = 3;
        /// Sample counts after which the stream state resets
        pub const BLOCK_BOUNDARIES: [usize; 4] = [256, 384, 512, 640];
    }
}

use constants::{stream, trigger_word, word1, word3};

/// Parsed compression header (words 1 and 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionHeader {
    pub word1: u32,
    pub word3: u32,
}

impl CompressionHeader {
    /// Read both header words at `offset`
    pub fn read(reader: &ByteReader<'_>, offset: usize) -> PayloadResult<Self> {
        let header = Self {
            word1: reader.read::<u32>(offset)?,
            word3: reader.read::<u32>(offset + 4)?,
        };
        if header.word1 & word1::COMPRESSION_FLAG == 0 {
            return Err(PayloadError::format(format!(
                "compression flag not set in hit header at offset {} (word1 {:#010x})",
                offset, header.word1
            )));
        }
        Ok(header)
    }

    /// Bytes covered by the header words and the sample stream
    pub fn hit_size(&self) -> usize {
        (self.word1 & word1::HIT_SIZE_MASK) as usize
    }

    pub fn is_min_bias(&self) -> bool {
        self.word1 & word1::MIN_BIAS != 0
    }

    pub fn trigger_word(&self) -> u32 {
        (self.word1 >> word1::TRIGGER_WORD_SHIFT) & word1::TRIGGER_WORD_MASK
    }

    pub fn lc(&self) -> u32 {
        (self.word1 >> word1::LC_SHIFT) & word1::LC_MASK
    }

    pub fn fadc_available(&self) -> bool {
        self.word1 & word1::FADC_AVAILABLE != 0
    }

    pub fn atwd_available(&self) -> bool {
        self.word1 & word1::ATWD_AVAILABLE != 0
    }

    /// Number of ATWD channels read out (1..=4)
    pub fn atwd_channels(&self) -> usize {
        ((self.word1 >> word1::ATWD_CHANNELS_SHIFT) & word1::ATWD_CHANNELS_MASK) as usize + 1
    }

    pub fn which_atwd(&self) -> AtwdSelect {
        if self.word1 & word1::ATWD_B != 0 {
            AtwdSelect::B
        } else {
            AtwdSelect::A
        }
    }

    /// Number of samples in the stream
    pub fn sample_count(&self) -> usize {
        match (self.fadc_available(), self.atwd_available()) {
            (true, true) => FADC_SAMPLES + ATWD_SAMPLES * self.atwd_channels(),
            (true, false) => FADC_SAMPLES,
            (false, _) => 0,
        }
    }

    pub fn trigger_type(&self) -> PayloadResult<TriggerType> {
        let word = self.trigger_word();
        if word & trigger_word::CPU != 0 {
            Ok(TriggerType::CpuRequested)
        } else if word & trigger_word::MPE != 0 {
            Ok(TriggerType::MpeDiscriminator)
        } else if word & trigger_word::SPE != 0 {
            Ok(TriggerType::SpeDiscriminator)
        } else if word & trigger_word::FLASHER != 0 {
            Ok(TriggerType::FlasherBoard)
        } else if word & trigger_word::ONBOARD_LED != 0 {
            Ok(TriggerType::OnboardLed)
        } else {
            Err(PayloadError::format(format!(
                "unknown trigger word {:#05x}",
                word
            )))
        }
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        let mut mode = TriggerMode::UNDEFINED;
        if self.is_min_bias() {
            mode.insert(TriggerMode::MIN_BIAS);
        }
        if self.trigger_word() & trigger_word::FLASHER != 0 {
            mode.insert(TriggerMode::FR_RUN);
        }
        let lc = self.lc();
        if lc & constants::lc::UPPER != 0 {
            mode.insert(TriggerMode::LC_UPPER);
        }
        if lc & constants::lc::LOWER != 0 {
            mode.insert(TriggerMode::LC_LOWER);
        }
        if !self.fadc_available() && !self.atwd_available() {
            mode.insert(TriggerMode::SLC_READOUT);
        }
        mode
    }

    pub fn charge_stamp(&self, kind: ChargeStampKind) -> ChargeStamp {
        let w = self.word3;
        match kind {
            ChargeStampKind::InIce => {
                let shift = if w & word3::PEAK_RANGE != 0 { 1 } else { 0 };
                let value = |s: u32| (((w >> s) & word3::CHARGE_MASK) << shift) as u16;
                ChargeStamp::InIce {
                    highest_sample: ((w >> word3::PEAK_SAMPLE_SHIFT) & word3::PEAK_SAMPLE_MASK)
                        as u8,
                    samples: [
                        value(word3::PRE_PEAK_SHIFT),
                        value(word3::PEAK_SHIFT),
                        value(0),
                    ],
                }
            }
            ChargeStampKind::IceTop => ChargeStamp::IceTop {
                stamp: (w & word3::ICETOP_STAMP_MASK) as u16,
                channel: ((w >> word3::ICETOP_CHANNEL_SHIFT) & word3::ICETOP_CHANNEL_MASK) as u8,
            },
        }
    }
}

/// Decode the compressed hit at `offset` within one record span into `launch`
///
/// Header-derived fields are always filled; the waveform only when
/// `with_waveform` is set. Returns the hit size from word 1.
pub fn decode_into(
    span: &[u8],
    offset: usize,
    kind: ChargeStampKind,
    launch: &mut DecodedLaunch,
    with_waveform: bool,
) -> PayloadResult<usize> {
    let reader = ByteReader::big_endian(span);
    let header = CompressionHeader::read(&reader, offset)?;

    let hit_size = header.hit_size();
    if hit_size < constants::HEADER_SIZE {
        return Err(PayloadError::format(format!(
            "hit size {} smaller than compression header",
            hit_size
        )));
    }
    if offset + hit_size > span.len() {
        return Err(PayloadError::format(format!(
            "hit of {} bytes at offset {} overruns record of {} bytes",
            hit_size,
            offset,
            span.len()
        )));
    }

    launch.trigger_type = header.trigger_type()?;
    launch.trigger_mode = header.trigger_mode();
    launch.lc_bit = header.fadc_available();
    launch.which_atwd = header.which_atwd();
    launch.charge_stamp = header.charge_stamp(kind);

    if with_waveform {
        let packed = reader.slice(
            offset + constants::HEADER_SIZE,
            hit_size - constants::HEADER_SIZE,
        )?;
        let samples = decode_samples(packed, header.sample_count())?;
        launch.waveform = Some(split_channels(samples, &header));
    }

    Ok(hit_size)
}

/// Split a flat sample sequence into FADC and (reversed) ATWD channels
fn split_channels(samples: Vec<i32>, header: &CompressionHeader) -> Waveform {
    let mut waveform = Waveform::default();
    if samples.is_empty() {
        return waveform;
    }

    let fadc_len = samples.len().min(FADC_SAMPLES);
    waveform.fadc = samples[..fadc_len].to_vec();

    if header.atwd_available() {
        for (ch, chunk) in samples[fadc_len..]
            .chunks(ATWD_SAMPLES)
            .take(ATWD_CHANNELS)
            .enumerate()
        {
            waveform.atwd[ch] = chunk.iter().rev().copied().collect();
        }
    }
    waveform
}

/// One word popped from the stream
#[derive(Debug, Clone, Copy)]
struct Delta {
    value: u32,
    bits: u32,
}

impl Delta {
    fn is_flag(&self) -> bool {
        matches!(self.bits, 1 | 2 | 3 | 6) && self.value == 1 << (self.bits - 1)
    }

    fn signed(&self) -> i32 {
        if self.value & (1 << (self.bits - 1)) != 0 {
            self.value as i32 - (1 << self.bits)
        } else {
            self.value as i32
        }
    }

    fn is_wasted(&self) -> bool {
        !self.is_flag() && is_wasted(self.signed(), self.bits)
    }
}

fn is_wasted(value: i32, bits: u32) -> bool {
    let magnitude = value.abs();
    match bits {
        2 => magnitude < 1,
        3 => magnitude < 2,
        6 => magnitude < 4,
        11 => magnitude < 32,
        _ => false,
    }
}

fn widen(bits: u32) -> Option<u32> {
    match bits {
        1 => Some(2),
        2 => Some(3),
        3 => Some(6),
        6 => Some(11),
        _ => None,
    }
}

fn narrow(bits: u32) -> Option<u32> {
    match bits {
        2 => Some(1),
        3 => Some(2),
        6 => Some(3),
        11 => Some(6),
        _ => None,
    }
}

/// LSB-first bit reader over little-endian bytes
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() * 8 - self.position
    }

    fn pop(&mut self, bits: u32) -> PayloadResult<Delta> {
        if bits as usize > self.remaining() {
            return Err(PayloadError::format(format!(
                "delta stream needs {} bits but only {} remain",
                bits,
                self.remaining()
            )));
        }
        let mut value = 0u32;
        for i in 0..bits as usize {
            let pos = self.position + i;
            let bit = (self.data[pos / 8] >> (pos % 8)) & 1;
            value |= (bit as u32) << i;
        }
        self.position += bits as usize;
        Ok(Delta { value, bits })
    }
}

/// Decode `count` samples from a delta stream
pub fn decode_samples(packed: &[u8], count: usize) -> PayloadResult<Vec<i32>> {
    let mut reader = BitReader::new(packed);
    let mut samples = Vec::with_capacity(count);
    let mut bits = stream::INITIAL_BITS;
    let mut acc: i32 = 0;

    while samples.len() < count {
        let delta = reader.pop(bits).map_err(|_| {
            PayloadError::format(format!(
                "delta stream exhausted after {} of {} samples",
                samples.len(),
                count
            ))
        })?;

        if delta.is_flag() {
            bits = widen(bits).ok_or_else(|| {
                PayloadError::format(format!("invalid delta word width {}", bits))
            })?;
            continue;
        }

        acc += delta.signed();
        samples.push(acc);

        if delta.is_wasted() {
            bits = narrow(bits).ok_or_else(|| {
                PayloadError::format(format!("invalid delta word width {}", bits))
            })?;
        }
        if stream::BLOCK_BOUNDARIES.contains(&samples.len()) {
            acc = 0;
            bits = stream::INITIAL_BITS;
        }
    }

    Ok(samples)
}

/// LSB-first bit writer, inverse of `BitReader`
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    position: usize,
}

impl BitWriter {
    fn push(&mut self, value: u32, bits: u32) {
        for i in 0..bits {
            if self.position % 8 == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            if let Some(last) = self.bytes.last_mut() {
                *last |= bit << (self.position % 8);
            }
            self.position += 1;
        }
    }
}

/// Whether `delta` can be stored as a non-flag word of `bits` bits
fn fits(delta: i32, bits: u32) -> bool {
    if bits == 11 {
        return (-1024..=1023).contains(&delta);
    }
    let half = 1i32 << (bits - 1);
    delta > -half && delta < half
}

/// Encode samples into a delta stream that [`decode_samples`] reproduces
///
/// Fails when a difference needs more than 11 bits.
pub fn encode_samples(samples: &[i32]) -> PayloadResult<Vec<u8>> {
    let mut writer = BitWriter::default();
    let mut bits = stream::INITIAL_BITS;
    let mut acc: i32 = 0;

    for (i, &sample) in samples.iter().enumerate() {
        let delta = sample - acc;
        while !fits(delta, bits) {
            writer.push(1 << (bits - 1), bits);
            bits = widen(bits).ok_or_else(|| {
                PayloadError::format(format!(
                    "sample difference {} at bin {} exceeds 11 bits",
                    delta, i
                ))
            })?;
        }
        writer.push(delta as u32 & ((1u32 << bits) - 1), bits);
        acc = sample;

        if is_wasted(delta, bits) {
            if let Some(narrower) = narrow(bits) {
                bits = narrower;
            }
        }
        if stream::BLOCK_BOUNDARIES.contains(&(i + 1)) {
            acc = 0;
            bits = stream::INITIAL_BITS;
        }
    }

    Ok(writer.bytes)
}
