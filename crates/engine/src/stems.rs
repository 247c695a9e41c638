use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use stemscore_audio::{AudioDecoder, MonoAudio};

/// Stems produced by source separation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StemName {
    Vocals,
    Drums,
    Bass,
    Guitar,
    Other,
}

impl StemName {
    pub const ALL: [StemName; 5] = [
        StemName::Vocals,
        StemName::Drums,
        StemName::Bass,
        StemName::Guitar,
        StemName::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StemName::Vocals => "vocals",
            StemName::Drums => "drums",
            StemName::Bass => "bass",
            StemName::Guitar => "guitar",
            StemName::Other => "other",
        }
    }
}

impl fmt::Display for StemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stem's audio lives.
#[derive(Clone, Debug, PartialEq)]
pub enum StemSource {
    File(PathBuf),
    Memory(MonoAudio),
    /// Several files mixed down in memory; sidecars are looked up next to the first.
    Merged { audio: MonoAudio, parts: Vec<PathBuf> },
}

impl StemSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            StemSource::File(path) => Some(path),
            StemSource::Memory(_) => None,
            StemSource::Merged { parts, .. } => parts.first().map(PathBuf::as_path),
        }
    }

    /// Source files mixed into this stem, empty unless it was merged.
    pub fn merged_parts(&self) -> &[PathBuf] {
        match self {
            StemSource::Merged { parts, .. } => parts,
            _ => &[],
        }
    }

    /// Location as recorded in the manifest.
    pub fn describe(&self) -> String {
        match self {
            StemSource::File(path) => path.display().to_string(),
            StemSource::Memory(audio) => format!(
                "<memory: {} samples @ {} Hz>",
                audio.samples.len(),
                audio.sample_rate
            ),
            StemSource::Merged { parts, .. } => parts
                .iter()
                .map(|part| part.display().to_string())
                .collect::<Vec<_>>()
                .join(" + "),
        }
    }

    /// Decode (or clone) the stem audio as mono.
    pub fn load(&self) -> Result<MonoAudio> {
        match self {
            StemSource::File(path) => AudioDecoder::open_mono(path),
            StemSource::Memory(audio) | StemSource::Merged { audio, .. } => Ok(audio.clone()),
        }
    }
}

/// A stem whose audio has been resolved once at the pipeline boundary.
#[derive(Clone, Debug)]
pub struct ResolvedStem {
    pub source: StemSource,
    /// `None` when decoding failed; stages treat that as unavailable audio.
    pub audio: Option<MonoAudio>,
}

impl ResolvedStem {
    pub fn audio(&self) -> Option<&MonoAudio> {
        self.audio.as_ref().filter(|audio| !audio.is_empty())
    }
}

pub type Stems = BTreeMap<StemName, StemSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stem_loads_its_buffer() {
        let audio = MonoAudio::new(1_000, vec![0.5; 10]);
        let source = StemSource::Memory(audio.clone());
        assert!(source.path().is_none());
        assert_eq!(source.load().unwrap(), audio);
        assert!(source.describe().contains("10 samples"));
    }

    #[test]
    fn merged_stem_points_at_its_first_part() {
        let audio = MonoAudio::new(1_000, vec![0.1; 4]);
        let source = StemSource::Merged {
            audio: audio.clone(),
            parts: vec![PathBuf::from("s/other.wav"), PathBuf::from("s/piano.wav")],
        };
        assert_eq!(source.path(), Some(Path::new("s/other.wav")));
        assert_eq!(source.merged_parts().len(), 2);
        assert_eq!(source.describe(), "s/other.wav + s/piano.wav");
        assert_eq!(source.load().unwrap(), audio);
        assert!(StemSource::Memory(audio).merged_parts().is_empty());
    }

    #[test]
    fn missing_file_stem_fails_to_load() {
        let source = StemSource::File(PathBuf::from("nope/bass.wav"));
        assert_eq!(source.path(), Some(Path::new("nope/bass.wav")));
        assert!(source.load().is_err());
    }

    #[test]
    fn resolved_stem_hides_empty_audio() {
        let stem = ResolvedStem {
            source: StemSource::Memory(MonoAudio::default()),
            audio: Some(MonoAudio::default()),
        };
        assert!(stem.audio().is_none());
    }
}
