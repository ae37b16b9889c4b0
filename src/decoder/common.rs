//! Common types for decoder module

use std::fmt;

use serde::Serialize;

use crate::common::{BoardId, DecodedValue, ValueMap};

/// Number of FADC samples in a full readout
pub const FADC_SAMPLES: usize = 256;
/// Number of samples per ATWD channel
pub const ATWD_SAMPLES: usize = 128;
/// Number of ATWD channels on one chip
pub const ATWD_CHANNELS: usize = 4;

/// Read-only context passed into every decode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeConfiguration {
    /// Global trigger time in DAQ clock units (0.1 ns)
    pub global_time: i64,
    /// Calendar year of the run (0 = unknown)
    pub year: u16,
    /// Decode delta-compressed waveforms (off for header-only scans)
    pub waveforms: bool,
    /// Decode trigger request records
    pub triggers: bool,
}

impl DecodeConfiguration {
    /// Full decode relative to `global_time`
    pub fn new(global_time: i64) -> Self {
        Self {
            global_time,
            year: 0,
            waveforms: true,
            triggers: true,
        }
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = year;
        self
    }

    /// Same context with waveform decoding switched off
    pub fn headers_only(mut self) -> Self {
        self.waveforms = false;
        self
    }

    /// Time of a raw DAQ timestamp relative to the global trigger, in ns
    pub fn relative_ns(&self, raw_time: u64) -> f64 {
        (raw_time as i128 - self.global_time as i128) as f64 / 10.0
    }
}

impl Default for DecodeConfiguration {
    fn default() -> Self {
        Self::new(0)
    }
}

/// What fired the launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Unknown,
    CpuRequested,
    SpeDiscriminator,
    MpeDiscriminator,
    FlasherBoard,
    OnboardLed,
}

impl TriggerType {
    /// Numeric code used in value maps
    pub fn code(&self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::CpuRequested => 1,
            Self::SpeDiscriminator => 2,
            Self::MpeDiscriminator => 3,
            Self::FlasherBoard => 4,
            Self::OnboardLed => 5,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::CpuRequested => "cpu-requested",
            Self::SpeDiscriminator => "spe",
            Self::MpeDiscriminator => "mpe",
            Self::FlasherBoard => "flasher",
            Self::OnboardLed => "onboard-led",
        };
        f.write_str(name)
    }
}

/// Bit set of launch conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct TriggerMode(u8);

impl TriggerMode {
    pub const UNDEFINED: Self = Self(0);
    pub const REQUIRE_BOTH: Self = Self(1);
    pub const FR_RUN: Self = Self(2);
    pub const LC_UPPER: Self = Self(4);
    pub const LC_LOWER: Self = Self(8);
    pub const SLC_READOUT: Self = Self(16);
    pub const MIN_BIAS: Self = Self(32);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for TriggerMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// ATWD chip that captured the waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AtwdSelect {
    #[default]
    A,
    B,
}

/// Charge-stamp encoding variant, selected by hit flag bit 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStampKind {
    InIce,
    IceTop,
}

/// Coarse charge summary carried in compression word 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStamp {
    /// Three FADC samples around the peak
    InIce {
        /// Index of the peak sample
        highest_sample: u8,
        /// Pre-peak, peak and post-peak values
        samples: [u16; 3],
    },
    /// Integrated charge of one ATWD channel
    IceTop { stamp: u16, channel: u8 },
}

impl Default for ChargeStamp {
    fn default() -> Self {
        Self::InIce {
            highest_sample: 0,
            samples: [0; 3],
        }
    }
}

impl ChargeStamp {
    pub fn kind(&self) -> ChargeStampKind {
        match self {
            Self::InIce { .. } => ChargeStampKind::InIce,
            Self::IceTop { .. } => ChargeStampKind::IceTop,
        }
    }
}

/// Decoded digitizer samples of one launch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Waveform {
    /// FADC samples (empty when the FADC was not read out)
    pub fadc: Vec<i32>,
    /// ATWD channels in bin order (unused channels are empty)
    pub atwd: [Vec<i32>; ATWD_CHANNELS],
}

impl Waveform {
    /// Number of ATWD channels with samples
    pub fn atwd_channels(&self) -> usize {
        self.atwd.iter().filter(|ch| !ch.is_empty()).count()
    }

    pub fn total_samples(&self) -> usize {
        self.fadc.len() + self.atwd.iter().map(Vec::len).sum::<usize>()
    }
}

/// One decoded DOM launch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedLaunch {
    pub board: BoardId,
    /// Raw DOM launch time (0.1 ns units)
    pub launch_time: u64,
    /// Start time relative to the global trigger, in ns
    pub start_time: f64,
    pub is_pedestal_subtracted: bool,
    pub trigger_type: TriggerType,
    pub trigger_mode: TriggerMode,
    pub lc_bit: bool,
    pub which_atwd: AtwdSelect,
    pub charge_stamp: ChargeStamp,
    /// Present only when waveform decoding was requested
    pub waveform: Option<Waveform>,
}

impl DecodedLaunch {
    /// Launch with header fields set and everything else at defaults
    pub fn new(board: BoardId, launch_time: u64, start_time: f64, is_pedestal_subtracted: bool) -> Self {
        Self {
            board,
            launch_time,
            start_time,
            is_pedestal_subtracted,
            trigger_type: TriggerType::default(),
            trigger_mode: TriggerMode::default(),
            lc_bit: false,
            which_atwd: AtwdSelect::default(),
            charge_stamp: ChargeStamp::default(),
            waveform: None,
        }
    }

    /// Flatten into a name → value map
    pub fn summary(&self) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("start_time".into(), self.start_time.into());
        map.insert("launch_time".into(), DecodedValue::Int(self.launch_time as i64));
        map.insert("pedestal_subtracted".into(), self.is_pedestal_subtracted.into());
        map.insert("trigger_type".into(), self.trigger_type.code().into());
        map.insert("trigger_mode".into(), (self.trigger_mode.bits() as i64).into());
        map.insert("lc_bit".into(), self.lc_bit.into());
        map.insert(
            "which_atwd".into(),
            DecodedValue::Int(match self.which_atwd {
                AtwdSelect::A => 0,
                AtwdSelect::B => 1,
            }),
        );
        match self.charge_stamp {
            ChargeStamp::InIce {
                highest_sample,
                samples,
            } => {
                map.insert("charge_stamp_peak_index".into(), (highest_sample as i64).into());
                map.insert(
                    "charge_stamp".into(),
                    samples.iter().map(|&s| s as i64).collect::<Vec<_>>().into(),
                );
            }
            ChargeStamp::IceTop { stamp, channel } => {
                map.insert("charge_stamp_channel".into(), (channel as i64).into());
                map.insert("charge_stamp".into(), vec![stamp as i64].into());
            }
        }
        if let Some(wf) = &self.waveform {
            map.insert("fadc".into(), wf.fadc.as_slice().into());
            for (i, channel) in wf.atwd.iter().enumerate().filter(|(_, ch)| !ch.is_empty()) {
                map.insert(format!("atwd_{}", i), channel.as_slice().into());
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_time() {
        let config = DecodeConfiguration::new(1_000);
        assert_eq!(config.relative_ns(1_080), 8.0);
        assert_eq!(config.relative_ns(920), -8.0);
        // No wrap-around for launches far from the global time
        assert_eq!(
            DecodeConfiguration::new(-10).relative_ns(u64::MAX),
            (u64::MAX as f64 + 10.0) / 10.0
        );
    }

    #[test]
    fn test_trigger_mode_bits() {
        let mut mode = TriggerMode::LC_UPPER | TriggerMode::LC_LOWER;
        assert!(mode.contains(TriggerMode::LC_UPPER));
        assert!(!mode.contains(TriggerMode::MIN_BIAS));
        mode.insert(TriggerMode::MIN_BIAS);
        assert_eq!(mode.bits(), 4 | 8 | 32);
        assert!(mode.contains(TriggerMode::UNDEFINED));
    }

    #[test]
    fn test_summary_without_waveform() {
        let launch = DecodedLaunch::new(BoardId(7), 1080, 8.0, true);
        let map = launch.summary();
        assert_eq!(map["start_time"].as_double(), Some(8.0));
        assert_eq!(map["pedestal_subtracted"].as_bool(), Some(true));
        assert_eq!(map["charge_stamp"].len(), 3);
        assert!(!map.contains_key("fadc"));
    }

    #[test]
    fn test_summary_with_waveform() {
        let mut launch = DecodedLaunch::new(BoardId(7), 0, 0.0, false);
        let mut wf = Waveform {
            fadc: vec![1; FADC_SAMPLES],
            ..Default::default()
        };
        wf.atwd[0] = vec![2; ATWD_SAMPLES];
        launch.waveform = Some(wf);
        let map = launch.summary();
        assert_eq!(map["fadc"].len(), FADC_SAMPLES);
        assert_eq!(map["atwd_0"].len(), ATWD_SAMPLES);
        assert!(!map.contains_key("atwd_1"));
    }

    #[test]
    fn test_waveform_counts() {
        let mut wf = Waveform::default();
        wf.atwd[1] = vec![0; 3];
        assert_eq!(wf.atwd_channels(), 1);
        assert_eq!(wf.total_samples(), 3);
    }
}
