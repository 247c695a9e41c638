//! Heuristic cleanup passes over onset-ordered note lists.
//!
//! Every pass takes a slice and returns a new list; none of them mutate input.
//! Vocals run merge, vibrato squash and the lead/harmony split in that order.
//! Bass only goes through the silence gate. Other voices are left alone.

use tracing::debug;

use stemscore_audio::{MonoAudio, RmsEnvelope};
use stemscore_domain::NoteEvent;

use crate::config::CleanupConfig;

fn sorted_by_onset(events: &[NoteEvent]) -> Vec<NoteEvent> {
    let mut sorted = events.to_vec();
    sorted.sort_by(|a, b| a.onset.total_cmp(&b.onset));
    sorted
}

/// Fold same-pitch notes separated by at most `max_gap` seconds into the note
/// before them. The merged note keeps the later offset and the louder velocity.
pub fn merge_same_pitch(events: &[NoteEvent], max_gap: f64) -> Vec<NoteEvent> {
    let sorted = sorted_by_onset(events);
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for note in iter {
        if note.pitch == current.pitch && note.onset - current.offset <= max_gap {
            current.offset = current.offset.max(note.offset);
            current.velocity = current.velocity.max(note.velocity);
        } else {
            merged.push(current);
            current = note;
        }
    }
    merged.push(current);
    merged
}

/// Snap short interior notes that wobble around their neighbours.
///
/// A note shorter than `max_span` whose pitch is within `semitone_tol` of both
/// the previous and next note takes their average pitch (ties to even). The
/// first and last notes are never changed; neighbours are read from the
/// sorted input, not from already rewritten notes.
pub fn squash_vibrato(events: &[NoteEvent], semitone_tol: u8, max_span: f64) -> Vec<NoteEvent> {
    let sorted = sorted_by_onset(events);
    let tol = i16::from(semitone_tol);
    let last = sorted.len().saturating_sub(1);

    sorted
        .iter()
        .enumerate()
        .map(|(i, note)| {
            if i == 0 || i == last || note.duration() >= max_span {
                return *note;
            }
            let pitch = i16::from(note.pitch);
            let prev = i16::from(sorted[i - 1].pitch);
            let next = i16::from(sorted[i + 1].pitch);
            if (pitch - prev).abs() <= tol && (pitch - next).abs() <= tol {
                let snapped = (f64::from(prev + next) / 2.0).round_ties_even();
                NoteEvent {
                    pitch: snapped as u8,
                    ..*note
                }
            } else {
                *note
            }
        })
        .collect()
}

/// Drops notes that sit where a stem is effectively silent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceGate {
    /// Frames at or below this loudness count as silent.
    pub threshold_db: f64,
    /// Fraction of a note's frames that must be loud to keep it.
    pub min_active_ratio: f64,
    pub window_seconds: f64,
    pub hop_seconds: f64,
}

impl SilenceGate {
    /// Gate over a 30 ms window advanced every 10 ms.
    pub fn new(threshold_db: f64, min_active_ratio: f64) -> Self {
        Self {
            threshold_db,
            min_active_ratio,
            window_seconds: 0.03,
            hop_seconds: 0.01,
        }
    }

    /// Without usable audio every note is kept.
    pub fn apply(&self, events: &[NoteEvent], audio: Option<&MonoAudio>) -> Vec<NoteEvent> {
        let Some(audio) = audio.filter(|audio| !audio.is_empty()) else {
            return events.to_vec();
        };
        if events.is_empty() {
            return Vec::new();
        }
        let Some(envelope) = RmsEnvelope::compute(
            &audio.samples,
            audio.sample_rate,
            self.window_seconds,
            self.hop_seconds,
        ) else {
            return events.to_vec();
        };

        let kept: Vec<NoteEvent> = events
            .iter()
            .filter(|note| self.is_active(&envelope, note))
            .copied()
            .collect();
        debug!(
            before = events.len(),
            after = kept.len(),
            threshold_db = self.threshold_db,
            "silence gate"
        );
        kept
    }

    fn is_active(&self, envelope: &RmsEnvelope, note: &NoteEvent) -> bool {
        if note.offset <= note.onset {
            return false;
        }
        let frames = envelope.frames_between(note.onset, note.offset);
        if frames.is_empty() {
            return false;
        }
        let loud = frames.iter().filter(|db| **db > self.threshold_db).count();
        loud as f64 / frames.len() as f64 >= self.min_active_ratio
    }
}

pub fn filter_bass_silence(
    events: &[NoteEvent],
    stem_audio: Option<&MonoAudio>,
    rms_thresh_db: f64,
    min_active_ratio: f64,
) -> Vec<NoteEvent> {
    SilenceGate::new(rms_thresh_db, min_active_ratio).apply(events, stem_audio)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadHarmony {
    pub lead: Vec<NoteEvent>,
    pub harmony: Vec<NoteEvent>,
}

/// Partition notes by whether each is the highest sounding pitch at its own
/// midpoint. Notes tied for the highest pitch are all lead.
pub fn split_lead_harmony(events: &[NoteEvent]) -> LeadHarmony {
    let mut split = LeadHarmony::default();
    for note in events {
        let mid = note.midpoint();
        let highest = events
            .iter()
            .filter(|other| other.covers(mid))
            .map(|other| other.pitch)
            .max()
            .unwrap_or(note.pitch);
        if note.pitch >= highest {
            split.lead.push(*note);
        } else {
            split.harmony.push(*note);
        }
    }
    split
}

/// Applies the per-voice cleanup chains with configured thresholds.
#[derive(Debug, Clone, Default)]
pub struct EventCleaner {
    config: CleanupConfig,
}

impl EventCleaner {
    pub fn new(config: CleanupConfig) -> Self {
        Self { config }
    }

    /// merge, then vibrato squash, then lead/harmony split
    pub fn clean_vocals(&self, events: &[NoteEvent]) -> LeadHarmony {
        let cfg = &self.config;
        let merged = merge_same_pitch(events, cfg.vocal_merge_gap_seconds);
        let squashed = squash_vibrato(
            &merged,
            cfg.vibrato_semitone_tolerance,
            cfg.vibrato_max_span_seconds,
        );
        let split = split_lead_harmony(&squashed);
        debug!(
            raw = events.len(),
            merged = merged.len(),
            lead = split.lead.len(),
            harmony = split.harmony.len(),
            "cleaned vocals"
        );
        split
    }

    pub fn clean_bass(&self, events: &[NoteEvent], stem_audio: Option<&MonoAudio>) -> Vec<NoteEvent> {
        let gate = SilenceGate {
            window_seconds: self.config.rms_window_seconds,
            hop_seconds: self.config.rms_hop_seconds,
            ..SilenceGate::new(
                self.config.bass_rms_threshold_db,
                self.config.bass_min_active_ratio,
            )
        };
        gate.apply(events, stem_audio)
    }
}
