pub mod assign;
pub mod beats;
pub mod cleanup;
pub mod collaborators;
pub mod config;
pub mod key;
pub mod pipeline;
pub mod stems;
pub mod tempo;
pub mod transcription;
pub mod velocity;

pub use assign::{ClassAssigner, ClassBank};
pub use beats::EnergyBeatTracker;
pub use cleanup::{EventCleaner, LeadHarmony, SilenceGate};
pub use collaborators::{
    song_id_for, BeatTracker, DirectorySeparator, DrumTranscriber, JsonDrumTranscriber,
    JsonMelodicTranscriber, MelodicTranscriber, Separator,
};
pub use config::{ConfigError, PipelineConfig};
pub use key::{DetectedKey, KeyEstimator, KeyNormalizer, KrumhanslSchmuckler};
pub use pipeline::{Collaborators, SongJob, SongOutput, SongPipeline};
pub use stems::{ResolvedStem, StemName, StemSource, Stems};
pub use tempo::{BeatTrack, TempoEstimator};
pub use transcription::{RawTranscription, TranscriptionError};
pub use velocity::VelocitySynthesizer;
