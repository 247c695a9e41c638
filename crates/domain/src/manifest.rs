//! Per-song audit record.
//!
//! Each pipeline stage owns one optional sub-record and writes nothing else.
//! The tempo in [`MeterRecord`] is the only value a later stage reads back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::events::InstrumentClass;
use crate::key::KeyInfo;

pub const MANIFEST_VERSION: u32 = 1;

/// Result of running one voice through transcription and cleanup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum VoiceStatus {
    Transcribed,
    NoNotes,
    NoNotesAfterFilter,
    MissingStem,
    Failed(String),
}

impl fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceStatus::Transcribed => f.write_str("transcribed"),
            VoiceStatus::NoNotes => f.write_str("no_notes"),
            VoiceStatus::NoNotesAfterFilter => f.write_str("no_notes_after_filter"),
            VoiceStatus::MissingStem => f.write_str("missing_stem"),
            VoiceStatus::Failed(reason) => write!(f, "error: {reason}"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SeparationRecord {
    /// Stem name to its location; absent stems are not listed.
    pub stems: BTreeMap<String, String>,
    /// Stems mixed down from several source files, with those files.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub merged: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeterRecord {
    pub tempo: f64,
    pub raw_tempo: Option<f64>,
    pub downbeat_count: usize,
    pub numerator: u8,
    pub denominator: u8,
    pub confidence: f32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionRecord {
    pub pitched: BTreeMap<InstrumentClass, VoiceStatus>,
    pub drums: Option<VoiceStatus>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignmentRecord {
    pub tracks: Vec<InstrumentClass>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArrangementRecord {
    pub tempo: f64,
    pub tracks: Vec<InstrumentClass>,
    pub note_count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub version: u32,
    pub song_id: String,
    pub source_audio: Option<String>,
    #[serde(default)]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub separation: Option<SeparationRecord>,
    #[serde(default)]
    pub meter: Option<MeterRecord>,
    #[serde(default)]
    pub transcription: Option<TranscriptionRecord>,
    #[serde(default)]
    pub assignment: Option<AssignmentRecord>,
    #[serde(default)]
    pub key: Option<KeyInfo>,
    #[serde(default)]
    pub arrangement: Option<ArrangementRecord>,
}

impl Manifest {
    pub fn new(song_id: impl Into<String>, source_audio: Option<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            song_id: song_id.into(),
            source_audio,
            updated_at: None,
            separation: None,
            meter: None,
            transcription: None,
            assignment: None,
            key: None,
            arrangement: None,
        }
    }

    /// Tempo agreed by the meter stage, if it ran and produced a usable value.
    pub fn tempo(&self) -> Option<f64> {
        self.meter
            .as_ref()
            .map(|meter| meter.tempo)
            .filter(|tempo| tempo.is_finite() && *tempo > 0.0)
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(OffsetDateTime::now_utc());
    }

    /// Drops every stage sub-record so a rerun cannot leave stale results behind.
    pub fn reset_stages(&mut self) {
        self.separation = None;
        self.meter = None;
        self.transcription = None;
        self.assignment = None;
        self.key = None;
        self.arrangement = None;
    }

    /// Names of the sub-records written so far, in pipeline order.
    pub fn completed_stages(&self) -> Vec<&'static str> {
        let mut stages = Vec::new();
        if self.separation.is_some() {
            stages.push("separation");
        }
        if self.meter.is_some() {
            stages.push("meter");
        }
        if self.transcription.is_some() {
            stages.push("transcription");
        }
        if self.assignment.is_some() {
            stages.push("assignment");
        }
        if self.key.is_some() {
            stages.push("key");
        }
        if self.arrangement.is_some() {
            stages.push("arrangement");
        }
        stages
    }
}
