//! Tunable thresholds for every normalization stage.
//!
//! Loaded from YAML; any missing section or field falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use stemscore_domain::InstrumentClass;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub tempo: TempoConfig,
    pub beats: BeatConfig,
    pub velocity: VelocityConfig,
    pub cleanup: CleanupConfig,
    pub key: KeyConfig,
    pub programs: ProgramConfig,
}

impl PipelineConfig {
    /// Read `path`, or return defaults when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(?path, "config file missing, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = if text.trim().is_empty() {
            PipelineConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tempo = &self.tempo;
        if tempo.ratios.is_empty() || tempo.ratios.iter().any(|r| !(*r > 0.0)) {
            return Err(ConfigError::Invalid(
                "tempo.ratios must be a non-empty list of positive numbers".into(),
            ));
        }
        if !(tempo.fallback_bpm > 0.0) {
            return Err(ConfigError::Invalid("tempo.fallback_bpm must be positive".into()));
        }
        if tempo.min_bpm > tempo.max_bpm || tempo.preferred_min_bpm > tempo.preferred_max_bpm {
            return Err(ConfigError::Invalid("tempo windows must have min <= max".into()));
        }
        if self.velocity.floor_db >= self.velocity.ceil_db {
            return Err(ConfigError::Invalid(
                "velocity.floor_db must be below velocity.ceil_db".into(),
            ));
        }
        if !(1..=127).contains(&self.velocity.neutral) {
            return Err(ConfigError::Invalid("velocity.neutral must be in 1..=127".into()));
        }
        for (name, value) in [
            ("cleanup.rms_window_seconds", self.cleanup.rms_window_seconds),
            ("cleanup.rms_hop_seconds", self.cleanup.rms_hop_seconds),
            ("beats.window_seconds", self.beats.window_seconds),
            ("beats.hop_seconds", self.beats.hop_seconds),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if !(0.0..=1.0).contains(&self.cleanup.bass_min_active_ratio) {
            return Err(ConfigError::Invalid(
                "cleanup.bass_min_active_ratio must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TempoConfig {
    pub fallback_bpm: f64,
    /// Multipliers applied to the raw estimate, in tie-break order.
    pub ratios: Vec<f64>,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Band preferred whenever any candidate lands in it.
    pub preferred_min_bpm: f64,
    pub preferred_max_bpm: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            fallback_bpm: 120.0,
            ratios: vec![1.0, 0.5, 2.0, 0.75, 4.0 / 3.0],
            min_bpm: 70.0,
            max_bpm: 180.0,
            preferred_min_bpm: 90.0,
            preferred_max_bpm: 110.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BeatConfig {
    pub window_seconds: f64,
    pub hop_seconds: f64,
    /// Peaks must exceed mean + this many standard deviations of onset strength.
    pub threshold_std: f64,
    /// Minimum spacing between detected onsets.
    pub min_interval_seconds: f64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            window_seconds: 0.03,
            hop_seconds: 0.01,
            threshold_std: 1.0,
            min_interval_seconds: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VelocityConfig {
    pub window_before_seconds: f64,
    pub window_after_seconds: f64,
    pub floor_db: f64,
    pub ceil_db: f64,
    pub neutral: u8,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_before_seconds: 0.005,
            window_after_seconds: 0.020,
            floor_db: -50.0,
            ceil_db: -5.0,
            neutral: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub vocal_merge_gap_seconds: f64,
    pub vibrato_semitone_tolerance: u8,
    pub vibrato_max_span_seconds: f64,
    pub bass_rms_threshold_db: f64,
    pub bass_min_active_ratio: f64,
    pub rms_window_seconds: f64,
    pub rms_hop_seconds: f64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            vocal_merge_gap_seconds: 0.07,
            vibrato_semitone_tolerance: 1,
            vibrato_max_span_seconds: 0.30,
            bass_rms_threshold_db: -45.0,
            bass_min_active_ratio: 0.2,
            rms_window_seconds: 0.03,
            rms_hop_seconds: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyConfig {
    /// Fewer collected pitches than this leaves the key unknown.
    pub min_notes: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self { min_notes: 4 }
    }
}

/// General MIDI programs used when building pitched instruments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProgramConfig {
    pub voxlead: u8,
    pub voxbg: u8,
    pub bass: u8,
    pub guitar: u8,
    pub keys: u8,
    pub other: u8,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            voxlead: 0,
            voxbg: 0,
            bass: 34,
            guitar: 28,
            keys: 0,
            other: 88,
        }
    }
}

impl ProgramConfig {
    pub fn program_for(&self, class: InstrumentClass) -> u8 {
        match class {
            InstrumentClass::Drums => 0,
            InstrumentClass::VoxLead => self.voxlead,
            InstrumentClass::VoxBg => self.voxbg,
            InstrumentClass::Bass => self.bass,
            InstrumentClass::Guitar => self.guitar,
            InstrumentClass::Keys => self.keys,
            InstrumentClass::Other => self.other,
        }
    }
}
