use std::fs;
use std::path::{Path, PathBuf};

use crate::{arrangement::Arrangement, error::DomainError, manifest::Manifest};

pub trait ArrangementExporter {
    fn export(&self, arrangement: &Arrangement) -> Result<Vec<u8>, DomainError>;
}

pub struct JsonExporter;

impl ArrangementExporter for JsonExporter {
    fn export(&self, arrangement: &Arrangement) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec_pretty(arrangement)
            .map_err(|err| DomainError::Serialization(err.to_string()))
    }
}

/// JSON persistence for manifests, one file per song.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, song_id: &str) -> PathBuf {
        self.root.join(format!("{song_id}.json"))
    }

    /// Load the stored manifest, or start a fresh one when none exists yet.
    pub fn load_or_create(
        &self,
        song_id: &str,
        source_audio: Option<String>,
    ) -> Result<Manifest, DomainError> {
        let path = self.path_for(song_id);
        if !path.exists() {
            return Ok(Manifest::new(song_id, source_audio));
        }
        let mut manifest = read_manifest(&path)?;
        if manifest.source_audio.is_none() {
            manifest.source_audio = source_audio;
        }
        Ok(manifest)
    }

    pub fn save(&self, manifest: &mut Manifest) -> Result<PathBuf, DomainError> {
        let path = self.path_for(&manifest.song_id);
        manifest.touch();
        write_manifest(&path, manifest)?;
        Ok(path)
    }
}

pub fn read_manifest(path: &Path) -> Result<Manifest, DomainError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|err| DomainError::Serialization(err.to_string()))
}

pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), DomainError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(manifest)
        .map_err(|err| DomainError::Serialization(err.to_string()))?;
    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arrangement::ArrangedTrack,
        events::{Instrument, InstrumentClass, NoteEvent},
        manifest::AssignmentRecord,
        tempo::MeterInfo,
    };

    #[test]
    fn exports_json() {
        let arrangement = Arrangement::new(
            "song",
            100.0,
            MeterInfo::fallback(),
            None,
            vec![ArrangedTrack {
                class: InstrumentClass::Guitar,
                instrument: Instrument::pitched(
                    "guitar",
                    28,
                    vec![NoteEvent::new(0.0, 0.5, 64, 100).unwrap()],
                ),
            }],
        );

        let exporter = JsonExporter;
        let bytes = exporter.export(&arrangement).unwrap();
        let output = String::from_utf8(bytes).unwrap();
        assert!(output.contains("\"song_id\": \"song\""));
        assert!(output.contains("\"guitar\""));
    }

    #[test]
    fn store_creates_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("manifests"));

        let mut manifest = store
            .load_or_create("song", Some("raw/song.wav".into()))
            .unwrap();
        assert!(manifest.assignment.is_none());
        manifest.assignment = Some(AssignmentRecord {
            tracks: vec![InstrumentClass::Drums],
        });
        let path = store.save(&mut manifest).unwrap();
        assert!(path.exists());
        assert!(manifest.updated_at.is_some());

        let reloaded = store.load_or_create("song", None).unwrap();
        assert_eq!(reloaded.source_audio.as_deref(), Some("raw/song.wav"));
        assert_eq!(
            reloaded.assignment.unwrap().tracks,
            vec![InstrumentClass::Drums]
        );
    }

    #[test]
    fn corrupt_manifest_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        fs::write(store.path_for("bad"), b"{not json").unwrap();
        let err = store.load_or_create("bad", None).unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
    }
}
