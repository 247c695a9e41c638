//! Energy-flux beat tracking on the mono mix.

use anyhow::Result;
use ndarray::{s, Array1, ArrayView1};
use tracing::debug;

use stemscore_audio::{MonoAudio, RmsEnvelope};

use crate::collaborators::BeatTracker;
use crate::config::BeatConfig;
use crate::tempo::BeatTrack;

/// Picks onsets from the rise of the RMS envelope and reads the raw tempo off
/// the median inter-onset interval. The result is deliberately unrefined; the
/// tempo estimator handles octave errors afterwards.
#[derive(Debug, Clone, Default)]
pub struct EnergyBeatTracker {
    config: BeatConfig,
}

impl EnergyBeatTracker {
    pub fn new(config: BeatConfig) -> Self {
        Self { config }
    }

    /// Onset times in seconds.
    pub fn onsets(&self, audio: &MonoAudio) -> Vec<f64> {
        let cfg = &self.config;
        let Some(envelope) = RmsEnvelope::compute(
            &audio.samples,
            audio.sample_rate,
            cfg.window_seconds,
            cfg.hop_seconds,
        ) else {
            return Vec::new();
        };
        if envelope.len() < 3 {
            return Vec::new();
        }

        // strength[i] is the rise into frame i + 1
        let frames = &envelope.frames_db;
        let strength: Array1<f64> = frames
            .windows(2)
            .into_iter()
            .map(|pair| (pair[1] - pair[0]).max(0.0))
            .collect();
        let mean = strength.mean().unwrap_or(0.0);
        let threshold = mean + cfg.threshold_std * strength.std(0.0);

        let mut onsets: Vec<f64> = Vec::new();
        for i in 0..strength.len() {
            let value = strength[i];
            if value <= threshold {
                continue;
            }
            let left = if i > 0 { strength[i - 1] } else { 0.0 };
            let right = strength.get(i + 1).copied().unwrap_or(0.0);
            if value < left || value < right {
                continue;
            }
            let time = (i + 1) as f64 * envelope.hop_seconds;
            if let Some(last) = onsets.last() {
                if time - last < cfg.min_interval_seconds {
                    continue;
                }
            }
            onsets.push(time);
        }
        onsets
    }
}

fn median(values: &Array1<f64>) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        n if n % 2 == 0 => Array1::from(vec![sorted[mid - 1], sorted[mid]]).mean(),
        _ => Some(sorted[mid]),
    }
}

/// Positive gaps between consecutive onsets.
fn inter_onset_intervals(onsets: &[f64]) -> Array1<f64> {
    if onsets.len() < 2 {
        return Array1::zeros(0);
    }
    let times = ArrayView1::from(onsets);
    let gaps = &times.slice(s![1..]) - &times.slice(s![..-1]);
    gaps.iter().copied().filter(|ioi| *ioi > 0.0).collect()
}

impl BeatTracker for EnergyBeatTracker {
    fn track(&self, audio: &MonoAudio) -> Result<BeatTrack> {
        if audio.is_empty() {
            return Ok(BeatTrack::default());
        }
        let onsets = self.onsets(audio);
        let intervals = inter_onset_intervals(&onsets);
        let raw_bpm = median(&intervals).map_or(0.0, |ioi| 60.0 / ioi);
        debug!(onsets = onsets.len(), raw_bpm, "energy beat tracking done");
        Ok(BeatTrack {
            raw_bpm,
            beat_times: onsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 1_000;

    /// Near-silent bed with a short loud burst every `period` seconds.
    fn click_track(seconds: f64, period: f64) -> MonoAudio {
        let len = (seconds * SR as f64) as usize;
        let mut samples = vec![0.001_f32; len];
        let step = (period * SR as f64) as usize;
        let mut start = step;
        while start + 20 < len {
            for sample in &mut samples[start..start + 20] {
                *sample = 0.8;
            }
            start += step;
        }
        MonoAudio::new(SR, samples)
    }

    #[test]
    fn clicks_every_half_second_read_as_120() {
        let tracker = EnergyBeatTracker::default();
        let track = tracker.track(&click_track(4.0, 0.5)).unwrap();
        assert_eq!(track.beat_times.len(), 7);
        assert_abs_diff_eq!(track.beat_times[0], 0.48, epsilon = 1e-9);
        assert_abs_diff_eq!(track.raw_bpm, 120.0, epsilon = 1e-6);
    }

    #[test]
    fn steady_signal_has_no_beats() {
        let tracker = EnergyBeatTracker::default();
        let track = tracker.track(&MonoAudio::new(SR, vec![0.3; 3_000])).unwrap();
        assert!(track.beat_times.is_empty());
        assert_eq!(track.raw_bpm, 0.0);
    }

    #[test]
    fn empty_audio_is_an_empty_track() {
        let track = EnergyBeatTracker::default()
            .track(&MonoAudio::default())
            .unwrap();
        assert_eq!(track, BeatTrack::default());
    }

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(median(&Array1::from(vec![4.0, 1.0, 3.0, 2.0])), Some(2.5));
        assert_eq!(median(&Array1::from(vec![3.0, 9.0, 1.0])), Some(3.0));
        assert_eq!(median(&Array1::zeros(0)), None);
    }

    #[test]
    fn intervals_skip_repeated_onsets() {
        let gaps = inter_onset_intervals(&[0.5, 1.0, 1.0, 1.6]);
        assert_eq!(gaps.len(), 2);
        assert_abs_diff_eq!(gaps[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(gaps[1], 0.6, epsilon = 1e-12);
        assert!(inter_onset_intervals(&[2.0]).is_empty());
    }
}
