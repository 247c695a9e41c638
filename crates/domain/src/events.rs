use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// A single note detection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct NoteEvent {
    /// Seconds from the start of the song.
    pub onset: f64,
    /// Seconds from the start of the song, strictly after `onset`.
    pub offset: f64,
    /// MIDI pitch in `1..=127`.
    pub pitch: u8,
    /// MIDI velocity in `1..=127`.
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(onset: f64, offset: f64, pitch: u8, velocity: u8) -> Result<Self, DomainError> {
        if !onset.is_finite() || !offset.is_finite() {
            return Err(DomainError::validation("note times must be finite"));
        }
        if offset <= onset {
            return Err(DomainError::validation(format!(
                "note offset {offset} must be after onset {onset}"
            )));
        }
        if !(1..=127).contains(&pitch) {
            return Err(DomainError::validation(format!(
                "note pitch {pitch} outside 1..=127"
            )));
        }
        if !(1..=127).contains(&velocity) {
            return Err(DomainError::validation(format!(
                "note velocity {velocity} outside 1..=127"
            )));
        }
        Ok(Self {
            onset,
            offset,
            pitch,
            velocity,
        })
    }

    pub fn duration(&self) -> f64 {
        self.offset - self.onset
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.onset + self.offset)
    }

    /// Whether `time` falls inside the note span, bounds included.
    pub fn covers(&self, time: f64) -> bool {
        self.onset <= time && time <= self.offset
    }

    /// Shift the pitch by `semitones`, or `None` when the result leaves `1..=127`.
    pub fn transposed(&self, semitones: i8) -> Option<Self> {
        let pitch = i16::from(self.pitch) + i16::from(semitones);
        if !(1..=127).contains(&pitch) {
            return None;
        }
        Some(Self {
            pitch: pitch as u8,
            ..*self
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ControlChange {
    pub time: f64,
    pub controller: u8,
    pub value: u8,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PitchBend {
    pub time: f64,
    /// Signed 14-bit bend amount.
    pub value: i16,
}

/// The seven canonical voices handed to final assembly.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Drums,
    VoxLead,
    VoxBg,
    Bass,
    Guitar,
    Keys,
    Other,
}

impl InstrumentClass {
    pub const PITCHED: [InstrumentClass; 6] = [
        InstrumentClass::VoxLead,
        InstrumentClass::VoxBg,
        InstrumentClass::Bass,
        InstrumentClass::Guitar,
        InstrumentClass::Keys,
        InstrumentClass::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentClass::Drums => "drums",
            InstrumentClass::VoxLead => "voxlead",
            InstrumentClass::VoxBg => "voxbg",
            InstrumentClass::Bass => "bass",
            InstrumentClass::Guitar => "guitar",
            InstrumentClass::Keys => "keys",
            InstrumentClass::Other => "other",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub name: String,
    pub is_drum: bool,
    /// General MIDI program number.
    pub program: u8,
    pub notes: Vec<NoteEvent>,
    #[serde(default)]
    pub control_changes: Vec<ControlChange>,
    #[serde(default)]
    pub pitch_bends: Vec<PitchBend>,
}

impl Instrument {
    pub fn pitched(name: impl Into<String>, program: u8, notes: Vec<NoteEvent>) -> Self {
        Self {
            name: name.into(),
            is_drum: false,
            program,
            notes,
            control_changes: Vec::new(),
            pitch_bends: Vec::new(),
        }
    }

    pub fn drum_kit(notes: Vec<NoteEvent>) -> Self {
        Self {
            name: InstrumentClass::Drums.as_str().to_string(),
            is_drum: true,
            program: 0,
            notes,
            control_changes: Vec::new(),
            pitch_bends: Vec::new(),
        }
    }

    pub fn has_notes(&self) -> bool {
        !self.notes.is_empty()
    }
}
