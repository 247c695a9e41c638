use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::{s, Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Single-channel audio at its native sample rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MonoAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl MonoAudio {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    /// True when there is nothing usable to analyse.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() || self.sample_rate == 0
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Sample index for `seconds`, truncated and clamped to the buffer length.
    pub fn index_at(&self, seconds: f64) -> usize {
        let index = (seconds.max(0.0) * self.sample_rate as f64) as usize;
        index.min(self.samples.len())
    }

    /// Sum with another signal at the same rate. The shorter one is padded with
    /// silence and the result is scaled back to unit peak if it clips.
    pub fn mix(&self, other: &MonoAudio) -> Result<MonoAudio> {
        if self.sample_rate != other.sample_rate {
            bail!(
                "sample rate mismatch: {} vs {}",
                self.sample_rate,
                other.sample_rate
            );
        }
        let len = self.samples.len().max(other.samples.len());
        let mut mixed = Array1::<f32>::zeros(len);
        for part in [&self.samples, &other.samples] {
            let mut head = mixed.slice_mut(s![..part.len()]);
            head += &ArrayView1::from(part.as_slice());
        }
        let peak = mixed.fold(0.0_f32, |peak, sample| peak.max(sample.abs()));
        if peak > 1.0 {
            mixed /= peak;
        }
        Ok(MonoAudio::new(self.sample_rate, mixed.to_vec()))
    }
}

pub struct AudioDecoder;

impl AudioDecoder {
    /// Decode a file and average its channels down to mono.
    pub fn open_mono<P: AsRef<Path>>(path: P) -> Result<MonoAudio> {
        let path_ref = path.as_ref();
        let file =
            File::open(path_ref).with_context(|| format!("open audio file {:?}", path_ref))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path_ref.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("probe audio format {:?}", path_ref))?;
        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow::anyhow!("no default track found in {:?}", path_ref))?;
        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(err) => {
                    use symphonia::core::errors::Error as SymphError;
                    match err {
                        SymphError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            break;
                        }
                        SymphError::ResetRequired => break,
                        _ => return Err(err.into()),
                    }
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(buffer) => {
                    let spec = *buffer.spec();
                    let channels = spec.channels.count().max(1);
                    let mut interleaved = SampleBuffer::<f32>::new(buffer.capacity() as u64, spec);
                    interleaved.copy_interleaved_ref(buffer);
                    samples.extend(
                        interleaved
                            .samples()
                            .chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                    );
                }
                // skip undecodable packet
                Err(symphonia::core::errors::Error::DecodeError(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        debug!(
            path = ?path_ref,
            sample_rate,
            sample_count = samples.len(),
            "decoded mono audio"
        );
        Ok(MonoAudio {
            sample_rate,
            samples,
        })
    }
}
