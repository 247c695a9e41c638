use stemscore_audio::{amplitude_to_db, rms, MonoAudio};
use stemscore_domain::NoteEvent;

use crate::config::VelocityConfig;

/// Derives MIDI velocity from loudness around a note onset.
#[derive(Debug, Clone, Default)]
pub struct VelocitySynthesizer {
    config: VelocityConfig,
}

impl VelocitySynthesizer {
    pub fn new(config: VelocityConfig) -> Self {
        Self { config }
    }

    /// RMS over `[onset - before, onset + after]` mapped linearly from
    /// `[floor_db, ceil_db]` onto `1..=127`. Falls back to the neutral velocity
    /// whenever there is nothing meaningful to measure.
    pub fn velocity_at(&self, audio: Option<&MonoAudio>, onset: f64) -> u8 {
        let cfg = &self.config;
        let neutral = cfg.neutral;
        let Some(audio) = audio.filter(|audio| !audio.is_empty()) else {
            return neutral;
        };
        if cfg.ceil_db <= cfg.floor_db || !onset.is_finite() {
            return neutral;
        }

        let start = audio.index_at(onset - cfg.window_before_seconds);
        let end = audio.index_at(onset + cfg.window_after_seconds);
        if end <= start {
            return neutral;
        }

        let db = amplitude_to_db(rms(&audio.samples[start..end]));
        let position = ((db - cfg.floor_db) / (cfg.ceil_db - cfg.floor_db)).clamp(0.0, 1.0);
        (1.0 + position * 126.0).round().clamp(1.0, 127.0) as u8
    }

    /// Replace every note's velocity with one measured from `audio`.
    pub fn apply(&self, audio: Option<&MonoAudio>, notes: &[NoteEvent]) -> Vec<NoteEvent> {
        notes
            .iter()
            .map(|note| NoteEvent {
                velocity: self.velocity_at(audio, note.onset),
                ..*note
            })
            .collect()
    }
}
