use serde::{Deserialize, Serialize};
use tracing::debug;

use stemscore_domain::{Meter, MeterInfo};

use crate::config::TempoConfig;

/// Every fourth beat opens a bar; no other meter is inferred.
const BEATS_PER_BAR: usize = 4;
const DOWNBEAT_CONFIDENCE: f32 = 0.9;
const SPARSE_BEAT_CONFIDENCE: f32 = 0.1;

/// Raw beat tracker output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BeatTrack {
    pub raw_bpm: f64,
    /// Beat positions in seconds.
    pub beat_times: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct TempoEstimator {
    config: TempoConfig,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        Self { config }
    }

    /// Correct half/double and 3/4 confusions in a raw tempo estimate.
    ///
    /// Candidates are the raw value scaled by each configured ratio, limited to
    /// the plausible window (or the raw value alone if none fit). If any land in
    /// the preferred band only those remain; the winner is the candidate closest
    /// to a multiple of 0.5 BPM, earliest ratio first on ties.
    pub fn disambiguate(&self, raw_bpm: f64) -> f64 {
        if !(raw_bpm > 0.0) || !raw_bpm.is_finite() {
            return self.config.fallback_bpm;
        }
        let cfg = &self.config;

        let mut candidates: Vec<f64> = cfg
            .ratios
            .iter()
            .map(|ratio| raw_bpm * ratio)
            .filter(|bpm| (cfg.min_bpm..=cfg.max_bpm).contains(bpm))
            .collect();
        if candidates.is_empty() {
            candidates.push(raw_bpm);
        }

        let preferred: Vec<f64> = candidates
            .iter()
            .copied()
            .filter(|bpm| (cfg.preferred_min_bpm..=cfg.preferred_max_bpm).contains(bpm))
            .collect();
        if !preferred.is_empty() {
            candidates = preferred;
        }

        candidates
            .into_iter()
            .min_by(|a, b| roundness(*a).total_cmp(&roundness(*b)))
            .unwrap_or(raw_bpm)
    }

    /// Every fourth beat from the first, with a grid confidence.
    pub fn downbeats(beat_times: &[f64]) -> (Vec<f64>, f32) {
        if beat_times.len() < BEATS_PER_BAR {
            return (Vec::new(), SPARSE_BEAT_CONFIDENCE);
        }
        let downbeats = beat_times.iter().copied().step_by(BEATS_PER_BAR).collect();
        (downbeats, DOWNBEAT_CONFIDENCE)
    }

    /// Build the song's meter; `None` means no audio was available at all.
    pub fn estimate(&self, beats: Option<&BeatTrack>) -> MeterInfo {
        let Some(track) = beats else {
            debug!(
                tempo = self.config.fallback_bpm,
                "no audio for tempo estimation"
            );
            return MeterInfo {
                tempo: self.config.fallback_bpm,
                ..MeterInfo::fallback()
            };
        };

        let tempo = self.disambiguate(track.raw_bpm);
        let mut beat_times = track.beat_times.clone();
        beat_times.retain(|t| t.is_finite());
        beat_times.sort_by(f64::total_cmp);
        let (downbeats, confidence) = Self::downbeats(&beat_times);
        debug!(
            raw_tempo = track.raw_bpm,
            tempo,
            downbeats = downbeats.len(),
            "estimated tempo"
        );
        MeterInfo {
            tempo,
            downbeats,
            meter: Meter::common_time(confidence),
        }
    }
}

/// Distance to the nearest half-BPM.
fn roundness(bpm: f64) -> f64 {
    (bpm - (bpm * 2.0).round() / 2.0).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn estimator() -> TempoEstimator {
        TempoEstimator::default()
    }

    #[test]
    fn halves_fast_estimate_into_preferred_band() {
        assert_eq!(estimator().disambiguate(200.0), 100.0);
    }

    #[test]
    fn non_positive_tempo_falls_back() {
        assert_eq!(estimator().disambiguate(0.0), 120.0);
        assert_eq!(estimator().disambiguate(-12.0), 120.0);
        assert_eq!(estimator().disambiguate(f64::NAN), 120.0);
    }

    #[test]
    fn three_quarter_candidate_wins_band() {
        // 120 * 0.75 = 90 is the only candidate inside [90, 110]
        assert_abs_diff_eq!(estimator().disambiguate(120.0), 90.0, epsilon = 1e-9);
        // 50 * 2 = 100
        assert_abs_diff_eq!(estimator().disambiguate(50.0), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn roundest_candidate_wins_outside_band() {
        // window keeps 150.2, 75.1, 112.65; 75.1 is closest to a half-BPM
        assert_abs_diff_eq!(estimator().disambiguate(150.2), 75.1, epsilon = 1e-9);
        assert_abs_diff_eq!(estimator().disambiguate(300.0), 150.0, epsilon = 1e-9);
    }

    #[test]
    fn implausible_tempo_is_kept_raw() {
        assert_eq!(estimator().disambiguate(500.0), 500.0);
    }

    #[test]
    fn downbeats_every_fourth_beat() {
        let beats: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let (downbeats, confidence) = TempoEstimator::downbeats(&beats);
        assert_eq!(downbeats, vec![0.0, 2.0, 4.0]);
        assert_eq!(confidence, 0.9);

        let (downbeats, confidence) = TempoEstimator::downbeats(&beats[..3]);
        assert!(downbeats.is_empty());
        assert_eq!(confidence, 0.1);
    }

    #[test]
    fn estimate_without_audio_is_default() {
        let info = estimator().estimate(None);
        assert_eq!(info.tempo, 120.0);
        assert!(info.downbeats.is_empty());
        assert_eq!(info.meter.confidence, 0.0);
    }

    #[test]
    fn estimate_builds_common_time_meter() {
        let track = BeatTrack {
            raw_bpm: 200.0,
            beat_times: (0..8).map(|i| i as f64 * 0.6).collect(),
        };
        let info = estimator().estimate(Some(&track));
        assert_eq!(info.tempo, 100.0);
        assert_eq!(info.downbeats.len(), 2);
        assert_eq!((info.meter.numerator, info.meter.denominator), (4, 4));
        assert_eq!(info.meter.confidence, 0.9);
    }
}
