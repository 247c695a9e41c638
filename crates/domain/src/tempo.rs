use serde::{Deserialize, Serialize};

/// Tempo used whenever nothing better is known.
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Meter {
    pub numerator: u8,
    pub denominator: u8,
    /// Confidence in the downbeat grid, in `[0, 1]`.
    pub confidence: f32,
}

impl Meter {
    pub fn common_time(confidence: f32) -> Self {
        Self {
            numerator: 4,
            denominator: 4,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Global tempo, downbeat grid and meter for one song.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeterInfo {
    /// Beats per minute.
    pub tempo: f64,
    /// Seconds from the start of the song, ascending.
    pub downbeats: Vec<f64>,
    pub meter: Meter,
}

impl MeterInfo {
    /// Default tempo, no downbeats, zero confidence.
    pub fn fallback() -> Self {
        Self {
            tempo: DEFAULT_TEMPO_BPM,
            downbeats: Vec::new(),
            meter: Meter::common_time(0.0),
        }
    }

    /// Replace the tempo with an already agreed value. Non-positive values are ignored.
    pub fn overwrite_tempo(&mut self, tempo: f64) {
        if tempo.is_finite() && tempo > 0.0 {
            self.tempo = tempo;
        }
    }
}
