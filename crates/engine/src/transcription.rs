//! Normalizes raw model output into validated note events.
//!
//! Melodic models report notes either as a flat `{"notes": [[onset, offset,
//! pitch, velocity], ...]}` table or as a nested `[model_output, midi_data,
//! note_events]` triple. Rows that cannot form a valid note are skipped; any
//! other top-level structure is a contract violation and fails hard.

use serde_json::{Map, Value};
use thiserror::Error;

use stemscore_domain::{Instrument, InstrumentClass, NoteEvent};

/// Offset assumed when a nested note event carries no end time.
const DEFAULT_NOTE_SECONDS: f64 = 0.02;
const DEFAULT_VELOCITY: f64 = 80.0;
/// Placeholder for drum hits until velocity is resynthesised from audio.
const DRUM_PLACEHOLDER_VELOCITY: u8 = 100;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("unexpected transcription output shape: {0}")]
    UnexpectedShape(String),
    #[error("failed to read transcription: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse transcription: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawTranscription {
    Flat { rows: Vec<Value> },
    Nested { note_events: Vec<Value> },
}

impl RawTranscription {
    pub fn from_json(value: Value) -> Result<Self, TranscriptionError> {
        match value {
            Value::Object(mut object) if object.contains_key("notes") => {
                match object.remove("notes") {
                    Some(Value::Array(rows)) => Ok(Self::Flat { rows }),
                    _ => Err(TranscriptionError::UnexpectedShape(
                        "\"notes\" is not an array".into(),
                    )),
                }
            }
            Value::Array(mut parts) if parts.len() == 3 => match parts.pop() {
                Some(Value::Array(note_events)) => Ok(Self::Nested { note_events }),
                _ => Err(TranscriptionError::UnexpectedShape(
                    "third element of the output triple is not a list of note events".into(),
                )),
            },
            other => Err(TranscriptionError::UnexpectedShape(describe(&other))),
        }
    }

    pub fn to_events(&self) -> Vec<NoteEvent> {
        match self {
            Self::Flat { rows } => rows.iter().filter_map(flat_row).collect(),
            Self::Nested { note_events } => note_events.iter().filter_map(nested_event).collect(),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Number(_) => "number".into(),
        Value::String(_) => "string".into(),
        Value::Array(items) => format!("array of length {}", items.len()),
        Value::Object(_) => "object without \"notes\"".into(),
    }
}

/// Unit-interval velocities are scaled by 127, then everything is clamped to `1..=127`.
pub fn normalize_velocity(raw: f64) -> u8 {
    let scaled = if (0.0..=1.0).contains(&raw) {
        raw * 127.0
    } else {
        raw
    };
    scaled.clamp(1.0, 127.0).round() as u8
}

fn pitch_from(raw: f64) -> Option<u8> {
    let pitch = raw.trunc();
    (1.0..=127.0).contains(&pitch).then_some(pitch as u8)
}

fn build(onset: f64, offset: f64, pitch: f64, velocity: f64) -> Option<NoteEvent> {
    if offset <= onset {
        return None;
    }
    NoteEvent::new(onset, offset, pitch_from(pitch)?, normalize_velocity(velocity)).ok()
}

fn numbers(row: &[Value], count: usize) -> Option<Vec<f64>> {
    row.iter().take(count).map(Value::as_f64).collect()
}

fn flat_row(row: &Value) -> Option<NoteEvent> {
    let row = row.as_array().filter(|row| row.len() >= 4)?;
    let values = numbers(row, 4)?;
    build(values[0], values[1], values[2], values[3])
}

fn first_number(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_f64))
}

fn nested_event(event: &Value) -> Option<NoteEvent> {
    match event {
        Value::Object(object) => {
            let onset = first_number(object, &["start_time", "onset_time", "start"]).unwrap_or(0.0);
            let offset = first_number(object, &["end_time", "offset_time", "end"])
                .unwrap_or(onset + DEFAULT_NOTE_SECONDS);
            let pitch = first_number(object, &["pitch", "midi_note_number"]).unwrap_or(0.0);
            let velocity =
                first_number(object, &["velocity", "amplitude"]).unwrap_or(DEFAULT_VELOCITY);
            build(onset, offset, pitch, velocity)
        }
        Value::Array(_) => flat_row(event),
        _ => None,
    }
}

/// Drum hits as `[onset, offset, pitch, ...]` rows or `{onset, offset, pitch}`
/// objects. Any reported velocity is discarded.
pub fn parse_drum_hits(value: &Value) -> Result<Vec<NoteEvent>, TranscriptionError> {
    let hits = value
        .as_array()
        .ok_or_else(|| TranscriptionError::UnexpectedShape(describe(value)))?;
    Ok(hits
        .iter()
        .filter_map(|hit| {
            let (onset, offset, pitch) = match hit {
                Value::Array(row) => {
                    let values = numbers(row, 3).filter(|values| values.len() == 3)?;
                    (values[0], values[1], values[2])
                }
                Value::Object(object) => (
                    first_number(object, &["onset", "start"])?,
                    first_number(object, &["offset", "end"])?,
                    first_number(object, &["pitch"])?,
                ),
                _ => return None,
            };
            if offset <= onset {
                return None;
            }
            NoteEvent::new(onset, offset, pitch_from(pitch)?, DRUM_PLACEHOLDER_VELOCITY).ok()
        })
        .collect())
}

pub fn events_to_instrument(class: InstrumentClass, program: u8, events: Vec<NoteEvent>) -> Instrument {
    Instrument::pitched(class.as_str(), program, events)
}
