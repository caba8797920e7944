//! Audio ingestion: container decode, mono downmix and resampling.
//!
//! Everything downstream of this module works on mono `f64` PCM at the
//! canonical rate, so fingerprints stay comparable across inputs that
//! arrived in different containers and at different sample rates.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use rayon::iter::ParallelIterator;
use rayon::slice::ParallelSlice;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, WindowFunction};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;

/// Sample rate every clip is normalized to before fingerprinting. A
/// reference stored at one rate will not match a query at another, so the
/// loader resamples rather than passing the container rate through.
pub const CANONICAL_RATE: u32 = 44_100;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("unsupported or unrecognized audio format")]
    UnsupportedFormat,
    #[error("no decodable audio track")]
    NoTrack,
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("decoded stream contained no samples")]
    EmptyStream,
}

/// Mono PCM clip in [-1, 1], tagged with its sample rate.
#[derive(Debug, Clone)]
pub struct Samples {
    pub data: Vec<f64>,
    pub sample_rate: u32,
}

impl Samples {
    pub fn duration_seconds(&self) -> f64 {
        self.data.len() as f64 / self.sample_rate as f64
    }
}

/// Load a clip from disk and normalize it to mono at [`CANONICAL_RATE`].
pub fn load(path: &Path) -> Result<Samples, AudioError> {
    let bytes = fs::read(path).map_err(|source| AudioError::Read {
        path: path.display().to_string(),
        source,
    })?;

    load_bytes(&bytes)
}

/// Decode raw container bytes (WAV, MP3, FLAC, OGG) into canonical samples.
pub fn load_bytes(bytes: &[u8]) -> Result<Samples, AudioError> {
    let (samples, rate, channels) = decode_audio(bytes)?;
    debug!(
        samples = samples.len(),
        rate, channels, "decoded audio stream"
    );

    let mono = to_mono(&samples, channels);
    let data = resample(&mono, rate, CANONICAL_RATE)?;
    if data.is_empty() {
        return Err(AudioError::EmptyStream);
    }

    Ok(Samples {
        data,
        sample_rate: CANONICAL_RATE,
    })
}

fn resample(input: &[f64], input_rate: u32, output_rate: u32) -> Result<Vec<f64>, AudioError> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }

    let chunk_size = 1024;
    let thread_batch_size = chunk_size * 100;

    let segments = input
        .par_chunks(thread_batch_size)
        .map(|segment| resample_segment(segment, chunk_size, input_rate, output_rate))
        .collect::<Result<Vec<_>, AudioError>>()?;

    Ok(segments.into_iter().flatten().collect())
}

fn resample_segment(
    segment: &[f64],
    chunk_size: usize,
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f64>, AudioError> {
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: rubato::SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f64>::new(
        output_rate as f64 / input_rate as f64,
        2.0,
        params,
        chunk_size,
        1,
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    let mut local_output = Vec::new();
    let mut position = 0;

    while position + chunk_size <= segment.len() {
        let chunk = vec![segment[position..position + chunk_size].to_vec()];
        let result = resampler
            .process(&chunk, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;

        local_output.extend_from_slice(&result[0]);
        position += chunk_size;
    }

    let remaining = segment.len() - position;
    if remaining > 0 {
        let mut padded = vec![0.0; chunk_size];
        padded[..remaining].copy_from_slice(&segment[position..]);
        let result = resampler
            .process(&[padded], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;

        local_output.extend_from_slice(&result[0]);
    }

    Ok(local_output)
}

fn to_mono(input: &[f64], channels: usize) -> Vec<f64> {
    if channels <= 1 {
        return input.to_vec();
    }

    input
        .par_chunks(channels)
        .map(|frame| frame.iter().sum::<f64>() / frame.len() as f64)
        .collect()
}

fn decode_audio(bytes: &[u8]) -> Result<(Vec<f64>, u32, usize), AudioError> {
    let cursor = Cursor::new(bytes.to_vec());
    let media_source_stream = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut format = get_format(media_source_stream)?;
    let track = format.default_track().ok_or(AudioError::NoTrack)?;

    let sample_rate = track.codec_params.sample_rate.ok_or(AudioError::NoTrack)?;
    let channels = track
        .codec_params
        .channels
        .ok_or(AudioError::NoTrack)?
        .count();
    let track_id = track.id;

    let mut decoder = get_decoder(track)?;
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(_) => break,
        };

        if packet.track_id() != track_id {
            continue;
        }

        // corrupt packets are skipped rather than failing the whole clip
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(_) => continue,
        };

        let mut buffer = SampleBuffer::<f64>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() {
        return Err(AudioError::EmptyStream);
    }

    Ok((samples, sample_rate, channels))
}

fn get_format(media_source_stream: MediaSourceStream) -> Result<Box<dyn FormatReader>, AudioError> {
    let hint = Hint::new();
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            media_source_stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|_| AudioError::UnsupportedFormat)?;

    Ok(probed.format)
}

fn get_decoder(track: &Track) -> Result<Box<dyn Decoder>, AudioError> {
    symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|_| AudioError::UnsupportedFormat)
}
