pub mod arrangement;
pub mod error;
pub mod events;
pub mod io;
pub mod key;
pub mod manifest;
pub mod tempo;

pub use crate::arrangement::{ArrangedTrack, Arrangement};
pub use crate::error::DomainError;
pub use crate::events::{ControlChange, Instrument, InstrumentClass, NoteEvent, PitchBend};
pub use crate::io::{
    read_manifest, write_manifest, ArrangementExporter, JsonExporter, ManifestStore,
};
pub use crate::key::{KeyInfo, KeyTarget};
pub use crate::manifest::{
    ArrangementRecord, AssignmentRecord, Manifest, MeterRecord, SeparationRecord,
    TranscriptionRecord, VoiceStatus, MANIFEST_VERSION,
};
pub use crate::tempo::{Meter, MeterInfo, DEFAULT_TEMPO_BPM};
