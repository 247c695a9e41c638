//! Seams to the external models: separation, transcription and beat tracking.
//!
//! The file-backed implementations read artifacts another process has already
//! produced, laid out as `<stems_root>/<song_id>/<stem>.wav` with
//! `<stem>.notes.json` and `<stem>.hits.json` sidecars.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use stemscore_audio::{AudioDecoder, MonoAudio};
use stemscore_domain::NoteEvent;

use crate::stems::{StemName, StemSource, Stems};
use crate::tempo::BeatTrack;
use crate::transcription::parse_drum_hits;

pub trait Separator {
    fn separate(&self, audio_path: &Path) -> Result<Stems>;
}

/// Produces raw, unnormalized model output for one pitched stem.
pub trait MelodicTranscriber {
    fn transcribe(&self, stem: &StemSource, tempo_hint: f64) -> Result<Value>;
}

pub trait DrumTranscriber {
    fn transcribe(&self, stem: &StemSource) -> Result<Vec<NoteEvent>>;
}

pub trait BeatTracker {
    fn track(&self, audio: &MonoAudio) -> Result<BeatTrack>;
}

pub fn song_id_for(audio_path: &Path) -> Result<String> {
    audio_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("cannot derive a song id from {}", audio_path.display()))
}

/// Stems previously written by an offline separator.
#[derive(Debug, Clone)]
pub struct DirectorySeparator {
    stems_root: PathBuf,
}

impl DirectorySeparator {
    pub fn new(stems_root: impl Into<PathBuf>) -> Self {
        Self {
            stems_root: stems_root.into(),
        }
    }
}

impl Separator for DirectorySeparator {
    fn separate(&self, audio_path: &Path) -> Result<Stems> {
        let song_dir = self.stems_root.join(song_id_for(audio_path)?);
        if !song_dir.is_dir() {
            bail!("no stems directory at {}", song_dir.display());
        }

        let mut stems = Stems::new();
        for name in StemName::ALL {
            let path = song_dir.join(format!("{name}.wav"));
            if path.is_file() {
                stems.insert(name, StemSource::File(path));
            } else {
                debug!(stem = %name, "stem not present");
            }
        }

        let piano = song_dir.join(format!("{PIANO_STEM}.wav"));
        if piano.is_file() {
            let other = match stems.remove(&StemName::Other) {
                Some(StemSource::File(other)) => merge_stem_files(other, piano)?,
                _ => StemSource::File(piano),
            };
            stems.insert(StemName::Other, other);
        }
        Ok(stems)
    }
}

/// Six-stem separators emit piano on its own; it is folded into `other`.
const PIANO_STEM: &str = "piano";

fn merge_stem_files(other: PathBuf, piano: PathBuf) -> Result<StemSource> {
    let mixed = AudioDecoder::open_mono(&other)?
        .mix(&AudioDecoder::open_mono(&piano)?)
        .with_context(|| format!("merging {} into {}", piano.display(), other.display()))?;
    info!(
        other = %other.display(),
        piano = %piano.display(),
        samples = mixed.samples.len(),
        "merged piano into other"
    );
    Ok(StemSource::Merged {
        audio: mixed,
        parts: vec![other, piano],
    })
}

fn sidecar(stem: &StemSource, extension: &str) -> Result<PathBuf> {
    match stem.path() {
        Some(path) => Ok(path.with_extension(extension)),
        None => bail!("in-memory stems have no sidecar transcription"),
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Reads `<stem>.notes.json` next to the stem audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMelodicTranscriber;

impl MelodicTranscriber for JsonMelodicTranscriber {
    fn transcribe(&self, stem: &StemSource, tempo_hint: f64) -> Result<Value> {
        let path = sidecar(stem, "notes.json")?;
        debug!(path = %path.display(), tempo_hint, "reading melodic transcription");
        read_json(&path)
    }
}

/// Reads `<stem>.hits.json` next to the stem audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDrumTranscriber;

impl DrumTranscriber for JsonDrumTranscriber {
    fn transcribe(&self, stem: &StemSource) -> Result<Vec<NoteEvent>> {
        let path = sidecar(stem, "hits.json")?;
        let hits = parse_drum_hits(&read_json(&path)?)
            .with_context(|| format!("drum hits in {}", path.display()))?;
        if hits.is_empty() {
            warn!(path = %path.display(), "drum transcription produced no hits");
        }
        Ok(hits)
    }
}
