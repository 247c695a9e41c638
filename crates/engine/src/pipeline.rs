use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use stemscore_audio::{AudioDecoder, MonoAudio};
use stemscore_domain::{
    Arrangement, ArrangementRecord, Instrument, InstrumentClass, KeyInfo, Manifest,
    ManifestStore, MeterInfo, MeterRecord, NoteEvent, SeparationRecord, TranscriptionRecord,
    VoiceStatus, DEFAULT_TEMPO_BPM,
};

use crate::assign::ClassAssigner;
use crate::beats::EnergyBeatTracker;
use crate::cleanup::EventCleaner;
use crate::collaborators::{
    song_id_for, BeatTracker, DirectorySeparator, DrumTranscriber, JsonDrumTranscriber,
    JsonMelodicTranscriber, MelodicTranscriber, Separator,
};
use crate::config::PipelineConfig;
use crate::key::{KeyEstimator, KeyNormalizer, KrumhanslSchmuckler};
use crate::stems::{ResolvedStem, StemName};
use crate::tempo::{BeatTrack, TempoEstimator};
use crate::transcription::{events_to_instrument, RawTranscription, TranscriptionError};
use crate::velocity::VelocitySynthesizer;

/// One song to push through the pipeline.
#[derive(Debug, Clone)]
pub struct SongJob {
    pub song_id: String,
    pub audio_path: PathBuf,
    pub normalize_key: bool,
}

impl SongJob {
    pub fn from_path(audio_path: impl Into<PathBuf>, normalize_key: bool) -> Result<Self> {
        let audio_path = audio_path.into();
        Ok(Self {
            song_id: song_id_for(&audio_path)?,
            audio_path,
            normalize_key,
        })
    }
}

/// The external models a run depends on.
pub struct Collaborators {
    pub separator: Box<dyn Separator + Send + Sync>,
    pub melodic: Box<dyn MelodicTranscriber + Send + Sync>,
    pub drums: Box<dyn DrumTranscriber + Send + Sync>,
    pub beats: Box<dyn BeatTracker + Send + Sync>,
}

impl Collaborators {
    /// Stems and transcriptions read from disk, beats tracked in-process.
    pub fn file_backed(stems_root: impl Into<PathBuf>, config: &PipelineConfig) -> Self {
        Self {
            separator: Box::new(DirectorySeparator::new(stems_root)),
            melodic: Box::new(JsonMelodicTranscriber),
            drums: Box::new(JsonDrumTranscriber),
            beats: Box::new(EnergyBeatTracker::new(config.beats.clone())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SongOutput {
    pub arrangement: Arrangement,
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
}

/// Per-voice events, or the reason there are none.
type VoiceOutcome = std::result::Result<Vec<NoteEvent>, VoiceStatus>;

type ResolvedStems = BTreeMap<StemName, ResolvedStem>;

pub struct SongPipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    tempo: TempoEstimator,
    velocity: VelocitySynthesizer,
    cleaner: EventCleaner,
    assigner: ClassAssigner,
    key: KeyNormalizer,
    store: ManifestStore,
}

impl SongPipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators, store: ManifestStore) -> Self {
        Self {
            tempo: TempoEstimator::new(config.tempo.clone()),
            velocity: VelocitySynthesizer::new(config.velocity.clone()),
            cleaner: EventCleaner::new(config.cleanup.clone()),
            assigner: ClassAssigner,
            key: KeyNormalizer::new(Box::new(KrumhanslSchmuckler), config.key.clone()),
            config,
            collaborators,
            store,
        }
    }

    pub fn with_key_estimator(mut self, estimator: Box<dyn KeyEstimator + Send + Sync>) -> Self {
        self.key = KeyNormalizer::new(estimator, self.config.key.clone());
        self
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    #[instrument(skip(self, job), fields(song = %job.song_id))]
    pub fn run(&self, job: &SongJob) -> Result<SongOutput> {
        info!(path = %job.audio_path.display(), "processing song");
        let mut manifest = self
            .store
            .load_or_create(&job.song_id, Some(job.audio_path.display().to_string()))
            .context("loading manifest")?;
        manifest.reset_stages();
        self.store.save(&mut manifest)?;

        let stems = self.separate(&job.audio_path, &mut manifest)?;
        self.store.save(&mut manifest)?;

        let meter = self.estimate_meter(&job.audio_path, &stems, &mut manifest);
        self.store.save(&mut manifest)?;

        let (pitched, drums) = self.transcribe(&stems, &mut manifest)?;
        self.store.save(&mut manifest)?;

        let (bank, record) = self.assigner.assign(pitched, drums);
        info!(tracks = ?record.tracks, "assigned classes");
        manifest.assignment = Some(record);
        self.store.save(&mut manifest)?;

        let (bank, key) = if job.normalize_key {
            self.key.normalize(bank)
        } else {
            (bank, KeyInfo::disabled())
        };
        manifest.key = Some(key.clone());
        self.store.save(&mut manifest)?;

        let tempo = manifest.tempo().unwrap_or(meter.tempo);
        let tempo = if tempo.is_finite() && tempo > 0.0 {
            tempo
        } else {
            DEFAULT_TEMPO_BPM
        };
        let mut meter = meter;
        meter.overwrite_tempo(tempo);
        let tracks = bank
            .into_tracks()
            .into_iter()
            .filter(|track| track.instrument.has_notes())
            .collect();
        let arrangement = Arrangement::new(&job.song_id, tempo, meter, Some(key), tracks);
        manifest.arrangement = Some(ArrangementRecord {
            tempo,
            tracks: arrangement.classes(),
            note_count: arrangement.note_count(),
        });
        let manifest_path = self.store.save(&mut manifest)?;
        info!(
            tempo,
            tracks = arrangement.tracks.len(),
            notes = arrangement.note_count(),
            "arrangement ready"
        );

        Ok(SongOutput {
            arrangement,
            manifest,
            manifest_path,
        })
    }

    fn separate(&self, audio_path: &Path, manifest: &mut Manifest) -> Result<ResolvedStems> {
        let stems = self
            .collaborators
            .separator
            .separate(audio_path)
            .context("source separation")?;

        let mut record = SeparationRecord::default();
        let mut resolved = ResolvedStems::new();
        for (name, source) in stems {
            record.stems.insert(name.to_string(), source.describe());
            if !source.merged_parts().is_empty() {
                let parts = source
                    .merged_parts()
                    .iter()
                    .map(|part| part.display().to_string())
                    .collect();
                record.merged.insert(name.to_string(), parts);
            }
            let audio = match source.load() {
                Ok(audio) => Some(audio),
                Err(err) => {
                    warn!(stem = %name, error = %err, "stem audio unavailable");
                    None
                }
            };
            resolved.insert(name, ResolvedStem { source, audio });
        }
        info!(stems = resolved.len(), "separated");
        manifest.separation = Some(record);
        Ok(resolved)
    }

    fn mix_audio(&self, audio_path: &Path, stems: &ResolvedStems) -> Option<MonoAudio> {
        match AudioDecoder::open_mono(audio_path) {
            Ok(audio) if !audio.is_empty() => return Some(audio),
            Ok(_) => debug!("mix is empty"),
            Err(err) => debug!(error = %err, "mix unavailable, trying stems"),
        }
        stems.values().find_map(|stem| stem.audio().cloned())
    }

    fn estimate_meter(
        &self,
        audio_path: &Path,
        stems: &ResolvedStems,
        manifest: &mut Manifest,
    ) -> MeterInfo {
        let track = self.mix_audio(audio_path, stems).map(|audio| {
            self.collaborators.beats.track(&audio).unwrap_or_else(|err| {
                warn!(error = %err, "beat tracking failed");
                BeatTrack::default()
            })
        });
        let meter = self.tempo.estimate(track.as_ref());
        manifest.meter = Some(MeterRecord {
            tempo: meter.tempo,
            raw_tempo: track.as_ref().map(|track| track.raw_bpm),
            downbeat_count: meter.downbeats.len(),
            numerator: meter.meter.numerator,
            denominator: meter.meter.denominator,
            confidence: meter.meter.confidence,
        });
        info!(tempo = meter.tempo, "meter estimated");
        meter
    }

    /// Raw events for a pitched stem. Only a malformed model output is an error.
    fn melodic_events(
        &self,
        stem: Option<&ResolvedStem>,
        tempo_hint: f64,
    ) -> Result<VoiceOutcome, TranscriptionError> {
        let Some(stem) = stem else {
            return Ok(Err(VoiceStatus::MissingStem));
        };
        let raw = match self.collaborators.melodic.transcribe(&stem.source, tempo_hint) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(stem = %stem.source.describe(), error = %err, "melodic transcription failed");
                return Ok(Err(VoiceStatus::Failed(format!("{err:#}"))));
            }
        };
        Ok(Ok(RawTranscription::from_json(raw)?.to_events()))
    }

    fn instrument(&self, class: InstrumentClass, events: Vec<NoteEvent>) -> Instrument {
        events_to_instrument(class, self.config.programs.program_for(class), events)
    }

    fn transcribe(
        &self,
        stems: &ResolvedStems,
        manifest: &mut Manifest,
    ) -> Result<(BTreeMap<InstrumentClass, Instrument>, Option<Instrument>)> {
        let tempo_hint = manifest.tempo().unwrap_or(DEFAULT_TEMPO_BPM);
        let mut record = TranscriptionRecord::default();
        let mut pitched = BTreeMap::new();
        let mut keep = |class: InstrumentClass,
                        outcome: VoiceOutcome,
                        empty: VoiceStatus,
                        record: &mut TranscriptionRecord| {
            let status = match outcome {
                Ok(events) if events.is_empty() => empty,
                Ok(events) => {
                    pitched.insert(class, self.instrument(class, events));
                    VoiceStatus::Transcribed
                }
                Err(status) => status,
            };
            debug!(%class, %status, "voice done");
            record.pitched.insert(class, status);
        };

        let vocals = self
            .melodic_events(stems.get(&StemName::Vocals), tempo_hint)
            .context("vocals")?;
        match vocals {
            Ok(events) => {
                let split = self.cleaner.clean_vocals(&events);
                keep(InstrumentClass::VoxLead, Ok(split.lead), VoiceStatus::NoNotes, &mut record);
                keep(InstrumentClass::VoxBg, Ok(split.harmony), VoiceStatus::NoNotes, &mut record);
            }
            Err(status) => {
                keep(InstrumentClass::VoxLead, Err(status.clone()), VoiceStatus::NoNotes, &mut record);
                keep(InstrumentClass::VoxBg, Err(status), VoiceStatus::NoNotes, &mut record);
            }
        }

        let bass_stem = stems.get(&StemName::Bass);
        let bass = self
            .melodic_events(bass_stem, tempo_hint)
            .context("bass")?
            .map(|events| {
                self.cleaner
                    .clean_bass(&events, bass_stem.and_then(ResolvedStem::audio))
            });
        keep(InstrumentClass::Bass, bass, VoiceStatus::NoNotesAfterFilter, &mut record);

        for (stem, class) in [
            (StemName::Guitar, InstrumentClass::Guitar),
            (StemName::Other, InstrumentClass::Other),
        ] {
            let outcome = self
                .melodic_events(stems.get(&stem), tempo_hint)
                .with_context(|| stem.to_string())?;
            keep(class, outcome, VoiceStatus::NoNotes, &mut record);
        }

        let (drums, drum_status) = self.transcribe_drums(stems.get(&StemName::Drums));
        record.drums = Some(drum_status);
        info!(voices = pitched.len(), drums = drums.is_some(), "transcribed");
        manifest.transcription = Some(record);
        Ok((pitched, drums))
    }

    fn transcribe_drums(&self, stem: Option<&ResolvedStem>) -> (Option<Instrument>, VoiceStatus) {
        let Some(stem) = stem else {
            return (None, VoiceStatus::MissingStem);
        };
        match self.collaborators.drums.transcribe(&stem.source) {
            Ok(hits) if hits.is_empty() => (None, VoiceStatus::NoNotes),
            Ok(hits) => {
                let hits = self.velocity.apply(stem.audio(), &hits);
                (Some(Instrument::drum_kit(hits)), VoiceStatus::Transcribed)
            }
            Err(err) => {
                warn!(error = %err, "drum transcription failed");
                (None, VoiceStatus::Failed(format!("{err:#}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DetectedKey;
    use crate::stems::{StemSource, Stems};
    use anyhow::bail;
    use serde_json::{json, Value};
    use stemscore_domain::{read_manifest, KeyTarget};
    use tempfile::tempdir;

    /// Stems that point at files which never decode.
    struct Listed(Vec<StemName>);

    impl Separator for Listed {
        fn separate(&self, _audio_path: &Path) -> Result<Stems> {
            Ok(self
                .0
                .iter()
                .map(|name| (*name, StemSource::File(PathBuf::from(format!("{name}.wav")))))
                .collect())
        }
    }

    struct NoStems;

    impl Separator for NoStems {
        fn separate(&self, _audio_path: &Path) -> Result<Stems> {
            bail!("separator offline")
        }
    }

    /// Raw output per stem file name; unknown stems fail.
    struct Canned(BTreeMap<String, Value>);

    impl MelodicTranscriber for Canned {
        fn transcribe(&self, stem: &StemSource, _tempo_hint: f64) -> Result<Value> {
            let name = stem
                .path()
                .and_then(|path| path.file_stem())
                .and_then(|stem| stem.to_str())
                .unwrap_or_default();
            match self.0.get(name) {
                Some(value) => Ok(value.clone()),
                None => bail!("model crashed on {name}"),
            }
        }
    }

    struct Hits;

    impl DrumTranscriber for Hits {
        fn transcribe(&self, _stem: &StemSource) -> Result<Vec<NoteEvent>> {
            Ok(vec![
                NoteEvent::new(0.0, 0.05, 36, 10).unwrap(),
                NoteEvent::new(0.5, 0.55, 38, 10).unwrap(),
            ])
        }
    }

    struct FixedBeats;

    impl BeatTracker for FixedBeats {
        fn track(&self, _audio: &MonoAudio) -> Result<BeatTrack> {
            Ok(BeatTrack {
                raw_bpm: 200.0,
                beat_times: vec![0.0, 0.6, 1.2, 1.8, 2.4],
            })
        }
    }

    struct DMajor;

    impl KeyEstimator for DMajor {
        fn estimate(&self, _pitches: &[u8]) -> Result<Option<DetectedKey>> {
            Ok(Some(DetectedKey::new("D", "major")))
        }
    }

    fn canned() -> Canned {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "vocals".to_string(),
            json!({"notes": [[0.0, 1.0, 62, 0.5], [0.1, 1.0, 64, 0.8], [1.02, 1.5, 64, 90]]}),
        );
        outputs.insert(
            "bass".to_string(),
            json!([
                {},
                null,
                [
                    {"start_time": 0.0, "end_time": 1.0, "pitch": 38},
                    {"start_time": 1.0, "end_time": 2.0, "pitch": 40},
                ]
            ]),
        );
        outputs.insert("guitar".to_string(), json!({"notes": []}));
        Canned(outputs)
    }

    fn pipeline(separator: Box<dyn Separator + Send + Sync>, root: &Path) -> SongPipeline {
        SongPipeline::new(
            PipelineConfig::default(),
            Collaborators {
                separator,
                melodic: Box::new(canned()),
                drums: Box::new(Hits),
                beats: Box::new(FixedBeats),
            },
            ManifestStore::new(root),
        )
    }

    fn job(normalize_key: bool) -> SongJob {
        SongJob::from_path("missing/song.wav", normalize_key).unwrap()
    }

    #[test]
    fn full_run_records_every_stage() {
        let dir = tempdir().unwrap();
        let separator = Listed(StemName::ALL.to_vec());
        let output = pipeline(Box::new(separator), dir.path()).run(&job(false)).unwrap();

        let manifest = &output.manifest;
        assert_eq!(
            manifest.completed_stages(),
            vec!["separation", "meter", "transcription", "assignment", "key", "arrangement"]
        );
        assert_eq!(manifest.separation.as_ref().unwrap().stems.len(), 5);
        // no decodable audio anywhere, so tempo falls back
        assert_eq!(manifest.meter.as_ref().unwrap().raw_tempo, None);
        assert_eq!(output.arrangement.tempo, 120.0);

        let transcription = manifest.transcription.as_ref().unwrap();
        assert_eq!(transcription.pitched[&InstrumentClass::VoxLead], VoiceStatus::Transcribed);
        assert_eq!(transcription.pitched[&InstrumentClass::VoxBg], VoiceStatus::Transcribed);
        assert_eq!(transcription.pitched[&InstrumentClass::Bass], VoiceStatus::Transcribed);
        assert_eq!(transcription.pitched[&InstrumentClass::Guitar], VoiceStatus::NoNotes);
        assert!(matches!(
            transcription.pitched[&InstrumentClass::Other],
            VoiceStatus::Failed(_)
        ));
        assert_eq!(transcription.drums, Some(VoiceStatus::Transcribed));

        assert_eq!(
            output.arrangement.classes(),
            vec![
                InstrumentClass::Drums,
                InstrumentClass::VoxLead,
                InstrumentClass::VoxBg,
                InstrumentClass::Bass
            ]
        );
        // the two 64s merge across the 20 ms gap
        let lead = &output.arrangement.tracks[1].instrument;
        assert_eq!(lead.notes.len(), 1);
        assert_eq!(lead.notes[0].offset, 1.5);
        assert_eq!(lead.program, 0);
        assert_eq!(output.arrangement.tracks[3].instrument.program, 34);
        // drum velocities are resynthesised; no audio means neutral
        assert!(output.arrangement.tracks[0]
            .instrument
            .notes
            .iter()
            .all(|hit| hit.velocity == 100));

        let key = manifest.key.as_ref().unwrap();
        assert!(!key.normalized);
        assert_eq!(key.reason.as_deref(), Some("key normalization disabled"));

        let stored = read_manifest(&output.manifest_path).unwrap();
        assert_eq!(stored.arrangement, manifest.arrangement);
    }

    #[test]
    fn key_normalization_shifts_pitched_tracks() {
        let dir = tempdir().unwrap();
        let output = pipeline(Box::new(Listed(StemName::ALL.to_vec())), dir.path())
            .with_key_estimator(Box::new(DMajor))
            .run(&job(true))
            .unwrap();
        let key = output.manifest.key.unwrap();
        assert!(key.normalized);
        assert_eq!(key.transpose_semitones, -2);
        assert_eq!(key.target, Some(KeyTarget::CMajor));
        let bass = &output.arrangement.tracks[3].instrument;
        assert_eq!(bass.notes[0].pitch, 36);
        let drums = &output.arrangement.tracks[0].instrument;
        assert_eq!(drums.notes[0].pitch, 36);
    }

    #[test]
    fn missing_stems_are_recorded_not_fatal() {
        let dir = tempdir().unwrap();
        let output = pipeline(Box::new(Listed(vec![StemName::Bass])), dir.path())
            .run(&job(false))
            .unwrap();
        let transcription = output.manifest.transcription.unwrap();
        assert_eq!(transcription.pitched[&InstrumentClass::VoxLead], VoiceStatus::MissingStem);
        assert_eq!(transcription.drums, Some(VoiceStatus::MissingStem));
        assert_eq!(output.arrangement.classes(), vec![InstrumentClass::Bass]);
    }

    #[test]
    fn malformed_model_output_aborts_the_song() {
        let dir = tempdir().unwrap();
        let mut outputs = canned();
        outputs.0.insert("vocals".to_string(), json!({"events": []}));
        let pipeline = SongPipeline::new(
            PipelineConfig::default(),
            Collaborators {
                separator: Box::new(Listed(vec![StemName::Vocals])),
                melodic: Box::new(outputs),
                drums: Box::new(Hits),
                beats: Box::new(FixedBeats),
            },
            ManifestStore::new(dir.path()),
        );
        let err = pipeline.run(&job(false)).unwrap_err();
        assert!(err
            .chain()
            .any(|cause| cause.downcast_ref::<TranscriptionError>().is_some()));
        // stages before the failure were persisted
        let stored = read_manifest(&dir.path().join("song.json")).unwrap();
        assert!(stored.meter.is_some());
        assert!(stored.transcription.is_none());
    }

    #[test]
    fn rerun_replaces_results_of_the_previous_run() {
        let dir = tempdir().unwrap();
        let first = pipeline(Box::new(Listed(StemName::ALL.to_vec())), dir.path())
            .with_key_estimator(Box::new(DMajor))
            .run(&job(true))
            .unwrap();
        assert!(first.manifest.key.as_ref().unwrap().normalized);

        let mut outputs = canned();
        outputs.0.insert("vocals".to_string(), json!({"events": []}));
        let rerun = SongPipeline::new(
            PipelineConfig::default(),
            Collaborators {
                separator: Box::new(Listed(vec![StemName::Vocals])),
                melodic: Box::new(outputs),
                drums: Box::new(Hits),
                beats: Box::new(FixedBeats),
            },
            ManifestStore::new(dir.path()),
        );
        assert!(rerun.run(&job(true)).is_err());

        let stored = read_manifest(&first.manifest_path).unwrap();
        assert_eq!(stored.completed_stages(), vec!["separation", "meter"]);
        assert_eq!(stored.separation.unwrap().stems.len(), 1);

        assert!(pipeline(Box::new(NoStems), dir.path()).run(&job(false)).is_err());
        let stored = read_manifest(&first.manifest_path).unwrap();
        assert!(stored.completed_stages().is_empty());
        assert_eq!(stored.source_audio.as_deref(), Some("missing/song.wav"));
    }

    #[test]
    fn merged_stems_are_listed_in_the_separation_record() {
        let dir = tempdir().unwrap();
        struct MergedOther;
        impl Separator for MergedOther {
            fn separate(&self, _audio_path: &Path) -> Result<Stems> {
                let mut stems = Stems::new();
                stems.insert(
                    StemName::Other,
                    StemSource::Merged {
                        audio: MonoAudio::new(1_000, vec![0.2; 1_000]),
                        parts: vec![PathBuf::from("other.wav"), PathBuf::from("piano.wav")],
                    },
                );
                Ok(stems)
            }
        }
        let output = pipeline(Box::new(MergedOther), dir.path())
            .run(&job(false))
            .unwrap();
        let separation = output.manifest.separation.unwrap();
        assert_eq!(separation.stems["other"], "other.wav + piano.wav");
        assert_eq!(
            separation.merged["other"],
            vec!["other.wav".to_string(), "piano.wav".to_string()]
        );
        assert!(matches!(
            output.manifest.transcription.unwrap().pitched[&InstrumentClass::Other],
            VoiceStatus::Failed(_)
        ));
    }

    #[test]
    fn separation_failure_is_an_error() {
        let dir = tempdir().unwrap();
        let err = pipeline(Box::new(NoStems), dir.path())
            .run(&job(false))
            .unwrap_err();
        assert!(format!("{err:#}").contains("separator offline"));
    }

    #[test]
    fn stem_audio_drives_the_meter_when_mix_is_missing() {
        let dir = tempdir().unwrap();
        struct MemoryStems;
        impl Separator for MemoryStems {
            fn separate(&self, _audio_path: &Path) -> Result<Stems> {
                let mut stems = Stems::new();
                stems.insert(
                    StemName::Other,
                    StemSource::Memory(MonoAudio::new(1_000, vec![0.2; 1_000])),
                );
                Ok(stems)
            }
        }
        let output = pipeline(Box::new(MemoryStems), dir.path())
            .run(&job(false))
            .unwrap();
        let meter = output.manifest.meter.unwrap();
        assert_eq!(meter.raw_tempo, Some(200.0));
        assert_eq!(meter.tempo, 100.0);
        assert_eq!(meter.downbeat_count, 2);
        assert_eq!(output.arrangement.tempo, 100.0);
        assert_eq!(output.arrangement.meter.tempo, 100.0);
    }
}
