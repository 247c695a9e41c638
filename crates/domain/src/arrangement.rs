use serde::{Deserialize, Serialize};

use crate::{
    events::{Instrument, InstrumentClass},
    key::KeyInfo,
    tempo::MeterInfo,
};

/// A track in the final bank, tagged with its canonical class.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArrangedTrack {
    pub class: InstrumentClass,
    pub instrument: Instrument,
}

/// Normalized song content handed to MIDI assembly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Arrangement {
    pub song_id: String,
    pub tempo: f64,
    pub meter: MeterInfo,
    pub key: Option<KeyInfo>,
    pub tracks: Vec<ArrangedTrack>,
}

impl Arrangement {
    pub fn new(
        song_id: impl Into<String>,
        tempo: f64,
        meter: MeterInfo,
        key: Option<KeyInfo>,
        tracks: Vec<ArrangedTrack>,
    ) -> Self {
        Self {
            song_id: song_id.into(),
            tempo,
            meter,
            key,
            tracks,
        }
    }

    pub fn classes(&self) -> Vec<InstrumentClass> {
        self.tracks.iter().map(|track| track.class).collect()
    }

    pub fn note_count(&self) -> usize {
        self.tracks
            .iter()
            .map(|track| track.instrument.notes.len())
            .sum()
    }
}
