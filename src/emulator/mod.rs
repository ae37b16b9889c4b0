//! Synthetic event generator
//!
//! Produces enveloped payloads with randomly placed launches from a fixed
//! set of boards. Full-readout launches carry pulse-shaped waveforms
//! (baseline, fast rise, exponential decay) with Gaussian noise; the rest
//! are SLC launches with only a charge stamp.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::common::{BoardId, PayloadError};
use crate::decoder::common::{ATWD_CHANNELS, ATWD_SAMPLES, FADC_SAMPLES};
use crate::decoder::delta::constants::{lc, trigger_word, word3};
use crate::decoder::{AtwdSelect, ChargeStamp, Waveform};
use crate::payload::builder::{EventBuilder, LaunchFormat, LaunchRecord, TriggerRecord};

/// Largest value a 10-bit digitizer reports
const ADC_MAX: i32 = 1023;
/// Charge stamp peak is searched in the first samples of the FADC
const STAMP_WINDOW: usize = 16;
/// In-ice trigger source used for generated sub-triggers
const IN_ICE_TRIGGER_SOURCE: u32 = 4000;

/// Emulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// RNG seed (random when unset)
    pub seed: Option<u64>,
    /// Number of distinct boards launching
    pub boards: usize,
    /// Launch records per event
    pub hits_per_event: usize,
    /// Fraction of launches with a full waveform readout
    pub hlc_fraction: f64,
    /// ATWD channels read out on full launches (0-4)
    pub atwd_channels: usize,
    /// Gaussian noise sigma in ADC counts
    pub noise_sigma: f64,
    /// Fraction of launches written in the legacy record layout
    pub legacy_fraction: f64,
    /// Add a global trigger record to every event
    pub trigger_records: bool,
    /// Event readout window in DAQ clock units (0.1 ns)
    pub event_window: u32,
    pub year: u16,
    pub run: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            boards: 16,
            hits_per_event: 20,
            hlc_fraction: 0.5,
            atwd_channels: 2,
            noise_sigma: 2.0,
            legacy_fraction: 0.0,
            trigger_records: true,
            event_window: 100_000, // 10 us
            year: 2012,
            run: 120_000,
        }
    }
}

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("invalid emulator configuration: {0}")]
    InvalidConfig(String),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
}

/// Seeded generator of synthetic events
pub struct PayloadEmulator {
    config: EmulatorConfig,
    rng: StdRng,
    noise: Normal<f64>,
    boards: Vec<BoardId>,
    event_id: u32,
    clock: u64,
}

impl PayloadEmulator {
    pub fn new(config: EmulatorConfig) -> Result<Self, EmulatorError> {
        if config.boards == 0 {
            return Err(EmulatorError::InvalidConfig("boards must be at least 1".into()));
        }
        if config.atwd_channels > ATWD_CHANNELS {
            return Err(EmulatorError::InvalidConfig(format!(
                "atwd_channels must be at most {}",
                ATWD_CHANNELS
            )));
        }
        for (name, value) in [
            ("hlc_fraction", config.hlc_fraction),
            ("legacy_fraction", config.legacy_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EmulatorError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        let noise = Normal::new(0.0, config.noise_sigma)
            .map_err(|e| EmulatorError::InvalidConfig(format!("noise_sigma: {}", e)))?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // 48-bit mainboard IDs
        let boards = (0..config.boards)
            .map(|_| BoardId(rng.gen::<u64>() & 0xFFFF_FFFF_FFFF))
            .collect();

        Ok(Self {
            config,
            rng,
            noise,
            boards,
            event_id: 0,
            clock: 0,
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Boards launches are drawn from
    pub fn boards(&self) -> &[BoardId] {
        &self.boards
    }

    /// Generate the next event as an enveloped payload
    pub fn generate_event(&mut self) -> Result<Vec<u8>, EmulatorError> {
        self.event_id += 1;
        // 1-10 ms between events
        self.clock += self.rng.gen_range(10_000_000..100_000_000);
        let start = self.clock;
        let window = self.config.event_window.max(1);

        let mut builder = EventBuilder::new(start, self.config.year, self.event_id, self.config.run)
            .duration(window);

        if self.config.trigger_records {
            let sub = TriggerRecord::new(0, IN_ICE_TRIGGER_SOURCE, start, start + window as u64 / 2);
            builder = builder.trigger(&TriggerRecord::global(start, start + window as u64, vec![sub]))?;
        }

        for _ in 0..self.config.hits_per_event {
            let launch = self.generate_launch(start, window);
            builder = builder.launch(&launch)?;
        }

        let payload = builder.build()?;
        debug!(
            event_id = self.event_id,
            bytes = payload.len(),
            launches = self.config.hits_per_event,
            "generated event"
        );
        Ok(payload)
    }

    fn generate_launch(&mut self, start: u64, window: u32) -> LaunchRecord {
        let board = self.boards[self.rng.gen_range(0..self.boards.len())];
        let launch_time = start + self.rng.gen_range(0..window) as u64;
        let full_readout = self.rng.gen_bool(self.config.hlc_fraction);

        let amplitude = self.rng.gen_range(50.0..800.0);
        let fadc_start = self.rng.gen_range(2..10);
        let fadc = self.pulse(FADC_SAMPLES, amplitude, fadc_start, 4, 30.0);

        let mut record = LaunchRecord::new(board, launch_time);
        record.charge_stamp = charge_stamp(&fadc);
        if self.rng.gen_bool(self.config.legacy_fraction) {
            record.format = LaunchFormat::LegacyDelta;
        }
        if self.rng.gen_bool(0.05) {
            record.trigger_word = trigger_word::MPE;
        }

        if full_readout {
            record.lc = lc::LOWER | lc::UPPER;
            record.which_atwd = if self.rng.gen_bool(0.5) {
                AtwdSelect::A
            } else {
                AtwdSelect::B
            };

            let mut waveform = Waveform {
                fadc,
                ..Default::default()
            };
            let peak = self.rng.gen_range(20..40);
            for (ch, gain) in [1.0, 0.125, 0.015625, 0.002]
                .iter()
                .take(self.config.atwd_channels)
                .enumerate()
            {
                waveform.atwd[ch] = self.pulse(ATWD_SAMPLES, amplitude * gain, peak, 2, 15.0);
            }
            record.waveform = waveform;
        }
        record
    }

    /// Baseline, linear rise over `rise` samples, then exponential decay
    fn pulse(&mut self, len: usize, amplitude: f64, start: usize, rise: usize, tau: f64) -> Vec<i32> {
        let baseline = 20.0;
        (0..len)
            .map(|i| {
                let signal = if i < start {
                    0.0
                } else if i < start + rise {
                    amplitude * (i - start + 1) as f64 / rise as f64
                } else {
                    amplitude * (-((i - start - rise) as f64) / tau).exp()
                };
                let value = baseline + signal + self.noise.sample(&mut self.rng);
                (value.round() as i32).clamp(0, ADC_MAX)
            })
            .collect()
    }
}

/// In-ice charge stamp from the first FADC samples
fn charge_stamp(fadc: &[i32]) -> ChargeStamp {
    let window = &fadc[..STAMP_WINDOW.min(fadc.len())];
    let (peak, _) = window
        .iter()
        .enumerate()
        .fold((0, i32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
    let at = |i: Option<usize>| {
        i.and_then(|i| window.get(i))
            .map(|&v| (v as u32).min(word3::CHARGE_MASK) as u16)
            .unwrap_or(0)
    };
    ChargeStamp::InIce {
        highest_sample: peak as u8,
        samples: [at(peak.checked_sub(1)), at(Some(peak)), at(Some(peak + 1))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodeConfiguration;
    use crate::payload::{EventDecoder, PayloadScanner};

    fn seeded(seed: u64) -> EmulatorConfig {
        EmulatorConfig {
            seed: Some(seed),
            boards: 4,
            hits_per_event: 12,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_default() {
        let config = EmulatorConfig::default();
        assert_eq!(config.boards, 16);
        assert!(config.trigger_records);
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_invalid_config() {
        let bad = [
            EmulatorConfig {
                boards: 0,
                ..Default::default()
            },
            EmulatorConfig {
                atwd_channels: 5,
                ..Default::default()
            },
            EmulatorConfig {
                noise_sigma: -1.0,
                ..Default::default()
            },
            EmulatorConfig {
                hlc_fraction: 1.5,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                PayloadEmulator::new(config),
                Err(EmulatorError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = PayloadEmulator::new(seeded(7)).unwrap().generate_event().unwrap();
        let b = PayloadEmulator::new(seeded(7)).unwrap().generate_event().unwrap();
        let c = PayloadEmulator::new(seeded(8)).unwrap().generate_event().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_events_decode() {
        let mut config = seeded(11);
        config.legacy_fraction = 0.3;
        config.atwd_channels = 4;
        let mut emulator = PayloadEmulator::new(config).unwrap();
        let decoder = EventDecoder::new(DecodeConfiguration::default());

        for expected_id in 1..=5 {
            let payload = emulator.generate_event().unwrap();
            let event = decoder.decode(&payload).unwrap();
            let header = event.header.unwrap();
            assert_eq!(header.event_id, expected_id);
            assert_eq!(header.record_count, 13);
            assert_eq!(event.launch_count(), 12);
            assert_eq!(event.triggers.len(), 1);
            assert!(event.boards().all(|b| emulator.boards().contains(&b)));

            for launch in event.launches.values().flatten() {
                assert!(launch.start_time >= 0.0 && launch.start_time < 10_000.0);
                let wf = launch.waveform.as_ref().unwrap();
                if !wf.fadc.is_empty() {
                    assert_eq!(wf.atwd_channels(), 4);
                    assert!(wf.fadc.iter().all(|&s| (0..=ADC_MAX).contains(&s)));
                }
            }
        }
    }

    #[test]
    fn test_without_triggers() {
        let mut config = seeded(3);
        config.trigger_records = false;
        config.hlc_fraction = 0.0;
        let payload = PayloadEmulator::new(config).unwrap().generate_event().unwrap();
        let index = PayloadScanner::new(DecodeConfiguration::default())
            .scan(&payload)
            .unwrap();
        assert_eq!(index.len(), 12);
        assert_eq!(index.triggers().count(), 0);
    }

    #[test]
    fn test_charge_stamp_peak() {
        let mut fadc = vec![10; FADC_SAMPLES];
        fadc[4] = 300;
        fadc[3] = 100;
        fadc[5] = 200;
        fadc[40] = 1000;
        assert_eq!(
            charge_stamp(&fadc),
            ChargeStamp::InIce {
                highest_sample: 4,
                samples: [100, 300, 200],
            }
        );
    }
}
