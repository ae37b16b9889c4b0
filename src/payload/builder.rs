//! Payload encoders
//!
//! Inverse of the record decoders: build type 3/18 launch records, type 9
//! trigger requests and event envelopes from structured values. Used by the
//! synthetic event generator and by tests.

use crate::common::{bytes, BoardId, Endian, PayloadError, PayloadResult};
use crate::decoder::common::{ATWD_SAMPLES, FADC_SAMPLES};
use crate::decoder::delta::{self, constants as compression};
use crate::decoder::event::constants as envelope;
use crate::decoder::hit::constants::{hit_flags, type18, type3};
use crate::decoder::trigger::constants as trigger;
use crate::decoder::{AtwdSelect, ChargeStamp, EventHeader, Waveform};

fn push_u16(out: &mut Vec<u8>, v: u16) {
    bytes::push(Endian::Big, out, v);
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    bytes::push(Endian::Big, out, v);
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    bytes::push(Endian::Big, out, v);
}

/// Launch record layout to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchFormat {
    /// Current layout (type 18)
    #[default]
    Delta,
    /// Legacy layout (type 3)
    LegacyDelta,
}

/// Everything needed to encode one launch record
///
/// The readout is derived from the waveform: no FADC samples means an SLC
/// hit, FADC only means 256 samples, and each non-empty ATWD channel adds
/// 128 samples (channels must be filled from channel 0 up).
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub format: LaunchFormat,
    pub board: BoardId,
    pub launch_time: u64,
    pub pedestal_subtracted: bool,
    /// 10-bit trigger word (see the compression header layout)
    pub trigger_word: u32,
    /// LC bits (1 = lower, 2 = upper)
    pub lc: u32,
    pub min_bias: bool,
    pub which_atwd: AtwdSelect,
    pub charge_stamp: ChargeStamp,
    pub waveform: Waveform,
}

impl LaunchRecord {
    /// SPE-triggered SLC launch with no samples
    pub fn new(board: BoardId, launch_time: u64) -> Self {
        Self {
            format: LaunchFormat::default(),
            board,
            launch_time,
            pedestal_subtracted: false,
            trigger_word: compression::trigger_word::SPE,
            lc: 0,
            min_bias: false,
            which_atwd: AtwdSelect::A,
            charge_stamp: ChargeStamp::default(),
            waveform: Waveform::default(),
        }
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn with_format(mut self, format: LaunchFormat) -> Self {
        self.format = format;
        self
    }

    /// Flat sample sequence as stored in the stream (ATWD reversed)
    fn stream_samples(&self) -> PayloadResult<(Vec<i32>, usize)> {
        let wf = &self.waveform;
        let channels = wf.atwd.iter().take_while(|ch| !ch.is_empty()).count();
        if wf.atwd[channels..].iter().any(|ch| !ch.is_empty()) {
            return Err(PayloadError::format("ATWD channels must be filled from channel 0"));
        }
        if wf.fadc.is_empty() {
            if channels > 0 {
                return Err(PayloadError::format("ATWD samples require FADC samples"));
            }
            return Ok((Vec::new(), 0));
        }
        if wf.fadc.len() != FADC_SAMPLES {
            return Err(PayloadError::format(format!(
                "FADC readout needs {} samples, got {}",
                FADC_SAMPLES,
                wf.fadc.len()
            )));
        }

        let mut samples = wf.fadc.clone();
        for ch in &wf.atwd[..channels] {
            if ch.len() != ATWD_SAMPLES {
                return Err(PayloadError::format(format!(
                    "ATWD channel needs {} samples, got {}",
                    ATWD_SAMPLES,
                    ch.len()
                )));
            }
            samples.extend(ch.iter().rev());
        }
        Ok((samples, channels))
    }

    fn word3(&self) -> PayloadResult<u32> {
        use compression::word3;
        match self.charge_stamp {
            ChargeStamp::InIce {
                highest_sample,
                samples,
            } => {
                let max = samples.iter().copied().max().unwrap_or(0) as u32;
                let (range, shift) = if max <= word3::CHARGE_MASK {
                    (0, 0)
                } else if max <= word3::CHARGE_MASK << 1 && samples.iter().all(|s| s % 2 == 0) {
                    (word3::PEAK_RANGE, 1)
                } else {
                    return Err(PayloadError::format(format!(
                        "charge stamp {:?} not representable",
                        samples
                    )));
                };
                let value = |v: u16| ((v as u32) >> shift) & word3::CHARGE_MASK;
                Ok(range
                    | ((highest_sample as u32 & word3::PEAK_SAMPLE_MASK) << word3::PEAK_SAMPLE_SHIFT)
                    | (value(samples[0]) << word3::PRE_PEAK_SHIFT)
                    | (value(samples[1]) << word3::PEAK_SHIFT)
                    | value(samples[2]))
            }
            ChargeStamp::IceTop { stamp, channel } => Ok(stamp as u32
                | ((channel as u32 & word3::ICETOP_CHANNEL_MASK) << word3::ICETOP_CHANNEL_SHIFT)),
        }
    }

    /// Compression header words and packed stream
    fn compressed_hit(&self) -> PayloadResult<Vec<u8>> {
        use compression::word1;
        let (samples, channels) = self.stream_samples()?;
        let packed = delta::encode_samples(&samples)?;
        let hit_size = compression::HEADER_SIZE + packed.len();
        if hit_size > word1::HIT_SIZE_MASK as usize {
            return Err(PayloadError::format(format!(
                "compressed hit of {} bytes exceeds the 11-bit size field",
                hit_size
            )));
        }

        let mut w1 = word1::COMPRESSION_FLAG
            | ((self.trigger_word & word1::TRIGGER_WORD_MASK) << word1::TRIGGER_WORD_SHIFT)
            | ((self.lc & word1::LC_MASK) << word1::LC_SHIFT)
            | hit_size as u32;
        if self.min_bias {
            w1 |= word1::MIN_BIAS;
        }
        if !samples.is_empty() {
            w1 |= word1::FADC_AVAILABLE;
        }
        if channels > 0 {
            w1 |= word1::ATWD_AVAILABLE
                | (((channels - 1) as u32 & word1::ATWD_CHANNELS_MASK) << word1::ATWD_CHANNELS_SHIFT);
        }
        if self.which_atwd == AtwdSelect::B {
            w1 |= word1::ATWD_B;
        }

        let mut hit = Vec::with_capacity(hit_size);
        push_u32(&mut hit, w1);
        push_u32(&mut hit, self.word3()?);
        hit.extend_from_slice(&packed);
        Ok(hit)
    }

    fn hit_flags(&self) -> u16 {
        let mut flags = 0;
        if self.pedestal_subtracted {
            flags |= hit_flags::PEDESTAL_SUBTRACTED;
        }
        if matches!(self.charge_stamp, ChargeStamp::IceTop { .. }) {
            flags |= hit_flags::ICETOP_CHARGE_STAMP;
        }
        flags
    }

    /// Encode the complete record
    pub fn encode(&self) -> PayloadResult<Vec<u8>> {
        let hit = self.compressed_hit()?;
        let mut out = Vec::new();
        match self.format {
            LaunchFormat::Delta => {
                push_u32(&mut out, (type18::HIT + hit.len()) as u32);
                push_u32(&mut out, type18::TAG);
                push_u64(&mut out, self.launch_time);
                out.resize(type18::MAINBOARD_ID, 0);
                push_u64(&mut out, self.board.raw());
                out.resize(type18::HIT_FLAGS, 0);
                push_u16(&mut out, self.hit_flags());
                out.resize(type18::HIT, 0);
            }
            LaunchFormat::LegacyDelta => {
                push_u32(&mut out, (type3::HIT + hit.len()) as u32);
                push_u32(&mut out, type3::TAG);
                push_u64(&mut out, self.board.raw());
                out.resize(type3::LAUNCH_TIME, 0);
                push_u64(&mut out, self.launch_time);
                push_u16(&mut out, type3::EXPECTED_BYTE_ORDER);
                push_u16(&mut out, type3::EXPECTED_VERSION);
                push_u16(&mut out, self.hit_flags());
                out.resize(type3::HIT, 0);
            }
        }
        out.extend_from_slice(&hit);
        Ok(out)
    }
}

/// Everything needed to encode one trigger request record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRecord {
    pub trigger_type: i32,
    pub config_id: i32,
    pub source_id: u32,
    pub first_time: u64,
    pub last_time: u64,
    /// Only encoded for global or merged triggers
    pub sub_triggers: Vec<TriggerRecord>,
}

impl TriggerRecord {
    pub fn new(trigger_type: i32, source_id: u32, first_time: u64, last_time: u64) -> Self {
        Self {
            trigger_type,
            config_id: 0,
            source_id,
            first_time,
            last_time,
            sub_triggers: Vec::new(),
        }
    }

    /// Global trigger wrapping `sub_triggers`
    pub fn global(first_time: u64, last_time: u64, sub_triggers: Vec<TriggerRecord>) -> Self {
        Self {
            sub_triggers,
            ..Self::new(0, trigger::GLOBAL_TRIGGER_SOURCE, first_time, last_time)
        }
    }

    fn carries_composites(&self) -> bool {
        self.source_id == trigger::GLOBAL_TRIGGER_SOURCE
            || self.trigger_type == trigger::MERGED_TRIGGER_TYPE
    }

    pub fn encode(&self) -> PayloadResult<Vec<u8>> {
        if !self.sub_triggers.is_empty() && !self.carries_composites() {
            return Err(PayloadError::format(
                "only global or merged triggers carry sub-triggers",
            ));
        }

        let mut out = Vec::new();
        push_u32(&mut out, 0);
        push_u32(&mut out, trigger::TAG);
        out.resize(trigger::TRIGGER_TYPE, 0);
        bytes::push(Endian::Big, &mut out, self.trigger_type);
        bytes::push(Endian::Big, &mut out, self.config_id);
        push_u32(&mut out, self.source_id);
        push_u64(&mut out, self.first_time);
        push_u64(&mut out, self.last_time);
        // No readout requests
        out.resize(trigger::COMPOSITE_COUNT, 0);
        let count = u16::try_from(self.sub_triggers.len())
            .map_err(|_| PayloadError::format("too many sub-triggers"))?;
        push_u16(&mut out, count);
        for sub in &self.sub_triggers {
            out.extend_from_slice(&sub.encode()?);
        }

        let length = out.len() as u32;
        bytes::write(Endian::Big, 0, &mut out, length)?;
        Ok(out)
    }
}

/// Assembles records into an enveloped event
#[derive(Debug, Clone)]
pub struct EventBuilder {
    header: EventHeader,
    records: Vec<Vec<u8>>,
}

impl EventBuilder {
    pub fn new(start_time: u64, year: u16, event_id: u32, run_id: u32) -> Self {
        Self {
            header: EventHeader {
                length: 0,
                start_time,
                duration: 0,
                year,
                event_id,
                run_id,
                sub_run_id: 0,
                config_in_transition: false,
                record_count: 0,
            },
            records: Vec::new(),
        }
    }

    pub fn duration(mut self, duration: u32) -> Self {
        self.header.duration = duration;
        self
    }

    pub fn sub_run(mut self, sub_run_id: u32, config_in_transition: bool) -> Self {
        self.header.sub_run_id = sub_run_id;
        self.header.config_in_transition = config_in_transition;
        self
    }

    /// Append an already-encoded record
    pub fn raw_record(mut self, record: Vec<u8>) -> Self {
        self.records.push(record);
        self
    }

    pub fn launch(self, launch: &LaunchRecord) -> PayloadResult<Self> {
        Ok(self.raw_record(launch.encode()?))
    }

    pub fn trigger(self, trigger: &TriggerRecord) -> PayloadResult<Self> {
        Ok(self.raw_record(trigger.encode()?))
    }

    pub fn build(mut self) -> PayloadResult<Vec<u8>> {
        let body: usize = self.records.iter().map(Vec::len).sum();
        self.header.length = u32::try_from(envelope::HEADER_SIZE + body)
            .map_err(|_| PayloadError::format("event too large"))?;
        self.header.record_count = self.records.len() as u32;

        let mut out = Vec::with_capacity(self.header.length as usize);
        self.header.encode(&mut out);
        for record in &self.records {
            out.extend_from_slice(record);
        }
        Ok(out)
    }
}
