pub mod dsp;
pub mod io;

pub use dsp::{amplitude_to_db, rms, RmsEnvelope};
pub use io::{AudioDecoder, MonoAudio};
