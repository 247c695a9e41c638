//! Global key detection and transposition to C major / A minor.

use anyhow::Result;
use ndarray::ArrayView1;
use tracing::{debug, info, warn};

use stemscore_domain::{Instrument, KeyInfo, KeyTarget};

use crate::assign::ClassBank;
use crate::config::KeyConfig;

const MAJOR_LIKE: [&str; 3] = ["major", "ionian", "maj"];
const MINOR_LIKE: [&str; 3] = ["minor", "aeolian", "min"];

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Krumhansl-Kessler probe-tone ratings, tonic first.
const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedKey {
    pub tonic: String,
    pub mode: String,
}

impl DetectedKey {
    pub fn new(tonic: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            tonic: tonic.into(),
            mode: mode.into(),
        }
    }
}

/// Profile-based key finder over an unordered pitch multiset.
pub trait KeyEstimator {
    /// `Ok(None)` when the distribution carries no tonal information.
    fn estimate(&self, pitches: &[u8]) -> Result<Option<DetectedKey>>;
}

/// Correlates the pitch-class histogram with all 24 rotated major/minor profiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct KrumhanslSchmuckler;

impl KeyEstimator for KrumhanslSchmuckler {
    fn estimate(&self, pitches: &[u8]) -> Result<Option<DetectedKey>> {
        let mut histogram = [0.0f64; 12];
        for pitch in pitches {
            histogram[usize::from(pitch % 12)] += 1.0;
        }

        let mut best: Option<(f64, usize, &str)> = None;
        for (mode, profile) in [("major", &MAJOR_PROFILE), ("minor", &MINOR_PROFILE)] {
            for tonic in 0..12 {
                let rotated: [f64; 12] =
                    std::array::from_fn(|pc| profile[(pc + 12 - tonic) % 12]);
                let Some(score) = pearson(&histogram, &rotated) else {
                    continue;
                };
                if best.map_or(true, |(top, _, _)| score > top) {
                    best = Some((score, tonic, mode));
                }
            }
        }

        Ok(best.map(|(_, tonic, mode)| DetectedKey::new(SHARP_NAMES[tonic], mode)))
    }
}

fn pearson(x: &[f64; 12], y: &[f64; 12]) -> Option<f64> {
    let x = ArrayView1::from(&x[..]);
    let y = ArrayView1::from(&y[..]);
    let dx = &x - x.mean()?;
    let dy = &y - y.mean()?;
    let denominator = (dx.dot(&dx) * dy.dot(&dy)).sqrt();
    (denominator > 0.0).then(|| dx.dot(&dy) / denominator)
}

/// Pitch class (C = 0) of a note name such as `"D"`, `"f#"`, `"Bb"` or `"E-"`.
pub fn parse_pitch_class(name: &str) -> Option<u8> {
    let name = name.trim().to_ascii_uppercase();
    let mut chars = name.chars();
    let base: i32 = match chars.next()? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let mut pc = base;
    for accidental in chars {
        match accidental {
            '#' => pc += 1,
            'B' | '-' => pc -= 1,
            _ => return None,
        }
    }
    Some(pc.rem_euclid(12) as u8)
}

/// Canonical target for a mode label, or `None` for modes we do not normalize.
pub fn classify_mode(mode: &str) -> Option<KeyTarget> {
    let mode = mode.trim().to_ascii_lowercase();
    if MAJOR_LIKE.contains(&mode.as_str()) {
        Some(KeyTarget::CMajor)
    } else if MINOR_LIKE.contains(&mode.as_str()) {
        Some(KeyTarget::AMinor)
    } else {
        None
    }
}

/// Shortest transposition from the detected key to its canonical target, in `[-6, 6]`.
pub fn transpose_amount(tonic: &str, mode: &str) -> Option<(i8, KeyTarget)> {
    let pc = parse_pitch_class(tonic)?;
    let target = classify_mode(mode)?;
    let mut shift = (i16::from(target.tonic_pitch_class()) - i16::from(pc)).rem_euclid(12);
    if shift > 6 {
        shift -= 12;
    }
    Some((shift as i8, target))
}

/// Shift every note; notes leaving `1..=127` are dropped. Controller and
/// pitch-bend data are copied as-is. Drum kits come back unchanged.
pub fn transpose_instrument(instrument: &Instrument, semitones: i8) -> Instrument {
    if instrument.is_drum || semitones == 0 {
        return instrument.clone();
    }
    Instrument {
        notes: instrument
            .notes
            .iter()
            .filter_map(|note| note.transposed(semitones))
            .collect(),
        ..instrument.clone()
    }
}

pub struct KeyNormalizer {
    estimator: Box<dyn KeyEstimator + Send + Sync>,
    config: KeyConfig,
}

impl KeyNormalizer {
    pub fn new(estimator: Box<dyn KeyEstimator + Send + Sync>, config: KeyConfig) -> Self {
        Self { estimator, config }
    }

    /// Valid pitches from every non-drum instrument.
    pub fn collect_pitches<'a>(instruments: impl IntoIterator<Item = &'a Instrument>) -> Vec<u8> {
        instruments
            .into_iter()
            .filter(|instrument| !instrument.is_drum)
            .flat_map(|instrument| instrument.notes.iter().map(|note| note.pitch))
            .filter(|pitch| (1..128).contains(pitch))
            .collect()
    }

    fn detect_key(&self, pitches: &[u8]) -> Option<DetectedKey> {
        if pitches.len() < self.config.min_notes {
            debug!(
                count = pitches.len(),
                min = self.config.min_notes,
                "too few pitches for key detection"
            );
            return None;
        }
        match self.estimator.estimate(pitches) {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "key estimator failed");
                None
            }
        }
    }

    /// Decide the transposition for `bank` without touching it.
    pub fn decide(&self, bank: &ClassBank) -> KeyInfo {
        let pitches = Self::collect_pitches(bank.instruments());
        let detected = self.detect_key(&pitches);

        let mut info = KeyInfo {
            detected_tonic: detected.as_ref().map(|key| key.tonic.clone()),
            detected_mode: detected.as_ref().map(|key| key.mode.to_ascii_lowercase()),
            ..KeyInfo::default()
        };
        if let Some((shift, target)) = detected
            .as_ref()
            .and_then(|key| transpose_amount(&key.tonic, &key.mode))
        {
            if shift != 0 {
                info.normalized = true;
                info.transpose_semitones = shift;
                info.target = Some(target);
            }
        }
        info
    }

    pub fn normalize(&self, bank: ClassBank) -> (ClassBank, KeyInfo) {
        let info = self.decide(&bank);
        info!(
            tonic = ?info.detected_tonic,
            mode = ?info.detected_mode,
            shift = info.transpose_semitones,
            "key normalization"
        );
        if !info.normalized {
            return (bank, info);
        }
        let shifted = bank.map_instruments(|instrument| {
            transpose_instrument(instrument, info.transpose_semitones)
        });
        (shifted, info)
    }
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new(Box::new(KrumhanslSchmuckler), KeyConfig::default())
    }
}
