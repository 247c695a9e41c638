use ndarray::{Array1, ArrayView1};

/// Guards square roots and logarithms against silence.
pub const EPSILON: f64 = 1e-12;

pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let view = ArrayView1::from(samples);
    let mean_square = view.mapv(|s| f64::from(s) * f64::from(s)).mean().unwrap_or(0.0);
    (mean_square + EPSILON).sqrt()
}

pub fn amplitude_to_db(amplitude: f64) -> f64 {
    20.0 * (amplitude + EPSILON).log10()
}

/// Short-time RMS loudness in dB.
#[derive(Clone, Debug, PartialEq)]
pub struct RmsEnvelope {
    /// Seconds between consecutive frame starts.
    pub hop_seconds: f64,
    pub frames_db: Array1<f64>,
}

impl RmsEnvelope {
    /// Frame `i` covers `[i * hop, i * hop + window)` samples. Only full windows
    /// that start before `len - window` are produced. Returns `None` when the
    /// window or hop rounds to zero samples or the signal is not longer than
    /// one window.
    pub fn compute(
        samples: &[f32],
        sample_rate: u32,
        window_seconds: f64,
        hop_seconds: f64,
    ) -> Option<Self> {
        let window = (window_seconds * sample_rate as f64) as usize;
        let hop = (hop_seconds * sample_rate as f64) as usize;
        if window == 0 || hop == 0 || window >= samples.len() {
            return None;
        }

        let frames: Vec<f64> = (0..samples.len() - window)
            .step_by(hop)
            .map(|start| amplitude_to_db(rms(&samples[start..start + window])))
            .collect();
        if frames.is_empty() {
            return None;
        }

        Some(Self {
            hop_seconds: hop as f64 / sample_rate as f64,
            frames_db: Array1::from_vec(frames),
        })
    }

    pub fn len(&self) -> usize {
        self.frames_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames_db.is_empty()
    }

    /// Frames overlapping `[start, end)` seconds, clamped so at least one frame is returned.
    pub fn frames_between(&self, start: f64, end: f64) -> ArrayView1<'_, f64> {
        let last = self.len().saturating_sub(1);
        let start_idx = ((start / self.hop_seconds).max(0.0) as usize).min(last);
        let end_idx = ((end / self.hop_seconds).max(0.0) as usize)
            .min(self.len())
            .max(start_idx + 1);
        self.frames_db.slice(ndarray::s![start_idx..end_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rms_of_constant_signal() {
        assert_abs_diff_eq!(rms(&[0.5; 64]), 0.5, epsilon = 1e-9);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn db_of_unity_is_zero() {
        assert_abs_diff_eq!(amplitude_to_db(1.0), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(amplitude_to_db(0.1), -20.0, epsilon = 1e-6);
        assert!(amplitude_to_db(0.0) < -200.0);
    }

    #[test]
    fn envelope_frames_follow_hop() {
        let samples = vec![0.1f32; 1_000];
        let envelope = RmsEnvelope::compute(&samples, 1_000, 0.03, 0.01).unwrap();
        // starts 0, 10, ..., 960
        assert_eq!(envelope.len(), 97);
        assert_abs_diff_eq!(envelope.hop_seconds, 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(envelope.frames_db[0], -20.0, epsilon = 1e-4);
    }

    #[test]
    fn envelope_rejects_short_or_degenerate_input() {
        assert!(RmsEnvelope::compute(&[0.1; 20], 1_000, 0.03, 0.01).is_none());
        assert!(RmsEnvelope::compute(&[0.1; 2_000], 10, 0.03, 0.01).is_none());
    }

    #[test]
    fn frames_between_clamps_to_one_frame() {
        let samples = vec![0.1f32; 1_000];
        let envelope = RmsEnvelope::compute(&samples, 1_000, 0.03, 0.01).unwrap();
        assert_eq!(envelope.frames_between(0.1, 0.2).len(), 10);
        assert_eq!(envelope.frames_between(0.1, 0.1).len(), 1);
        assert_eq!(envelope.frames_between(50.0, 60.0).len(), 1);
    }
}
