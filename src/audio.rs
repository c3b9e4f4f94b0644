use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec};

use crate::{Error, Result};

/// Mono audio that passed format validation, normalized to `f32` in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl CanonicalAudio {
    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Validates raw payloads against the format the embedding backend requires.
///
/// Format requirements:
/// - RIFF/WAVE container
/// - Mono (1 channel)
/// - The configured sample rate
/// - 16-bit integer or 32-bit float PCM
///
/// We never resample or downmix. A mismatch is rejected immediately, before any embedding call
/// is attempted, so the caller can re-submit audio in the right shape.
#[derive(Debug, Clone, Copy)]
pub struct AudioIngest {
    sample_rate: u32,
}

impl AudioIngest {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Validate and normalize an in-memory payload (an HTTP body, for example).
    pub fn ingest(&self, raw: &[u8]) -> Result<CanonicalAudio> {
        self.ingest_reader(Cursor::new(raw))
    }

    /// Validate and normalize a WAV file on disk.
    pub fn ingest_file(&self, path: impl AsRef<Path>) -> Result<CanonicalAudio> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| {
            Error::invalid_audio(format!("failed to read '{}': {err}", path.display()))
        })?;
        self.ingest(&bytes)
    }

    /// Validate and normalize WAV audio from any seekable reader.
    pub fn ingest_reader<R>(&self, mut reader: R) -> Result<CanonicalAudio>
    where
        R: Read + Seek,
    {
        let payload_len = remaining_len(&mut reader)?;
        let reader = WavReader::new(reader)
            .map_err(|err| Error::invalid_audio(format!("unreadable WAV payload: {err}")))?;
        let spec = reader.spec();
        self.check_spec(&spec)?;

        // The header's data length is untrusted; never reserve more than the payload can hold.
        let max_samples = payload_len / u64::from(spec.bits_per_sample / 8);
        let samples = read_normalized(reader, &spec, max_samples)?;
        if samples.is_empty() {
            return Err(Error::invalid_audio("WAV payload contains no samples"));
        }

        Ok(CanonicalAudio {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Check that already-decoded audio matches what this ingest would have produced.
    pub fn check(&self, audio: &CanonicalAudio) -> Result<()> {
        if audio.sample_rate != self.sample_rate {
            return Err(Error::invalid_audio(format!(
                "expected {} Hz sample rate, got {} Hz",
                self.sample_rate, audio.sample_rate
            )));
        }
        if audio.samples.is_empty() {
            return Err(Error::invalid_audio("audio contains no samples"));
        }
        Ok(())
    }

    fn check_spec(&self, spec: &WavSpec) -> Result<()> {
        if spec.channels != 1 {
            return Err(Error::invalid_audio(format!(
                "expected mono WAV (1 channel), got {} channels",
                spec.channels
            )));
        }

        if spec.sample_rate != self.sample_rate {
            return Err(Error::invalid_audio(format!(
                "expected {} Hz sample rate, got {} Hz",
                self.sample_rate, spec.sample_rate
            )));
        }

        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) | (SampleFormat::Float, 32) => Ok(()),
            (format, bits) => Err(Error::invalid_audio(format!(
                "unsupported sample encoding: {bits}-bit {format:?} (expected 16-bit Int or 32-bit Float)"
            ))),
        }
    }
}

fn remaining_len<R: Seek>(reader: &mut R) -> Result<u64> {
    let unreadable = |err: std::io::Error| Error::invalid_audio(format!("unreadable WAV payload: {err}"));
    let start = reader.stream_position().map_err(unreadable)?;
    let end = reader.seek(SeekFrom::End(0)).map_err(unreadable)?;
    reader.seek(SeekFrom::Start(start)).map_err(unreadable)?;
    Ok(end.saturating_sub(start))
}

fn read_normalized<R: Read>(
    mut reader: WavReader<R>,
    spec: &WavSpec,
    max_samples: u64,
) -> Result<Vec<f32>> {
    let truncated = |err: hound::Error| Error::invalid_audio(format!("truncated WAV data: {err}"));

    let declared = u64::from(reader.len());
    let mut samples = Vec::with_capacity(declared.min(max_samples) as usize);
    match spec.sample_format {
        SampleFormat::Int => {
            // Full-scale negative is -32768, so dividing by 32768 keeps every value in [-1, 1].
            for sample in reader.samples::<i16>() {
                samples.push(f32::from(sample.map_err(truncated)?) / 32_768.0);
            }
        }
        SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                let value = sample.map_err(truncated)?;
                if !value.is_finite() {
                    return Err(Error::invalid_audio("WAV payload contains non-finite samples"));
                }
                samples.push(value.clamp(-1.0, 1.0));
            }
        }
    }

    Ok(samples)
}
