//! Fingerprint pipeline glue.
//!
//! Wires spectral analysis, peak extraction and landmark hashing together
//! to reduce a mono clip to its fingerprint map.

pub mod hashing;
pub mod peaks;
pub mod spectrogram;

use std::collections::HashMap;

use tracing::debug;

/// Run the spectral pipeline over a mono clip.
///
/// Returns `hash -> anchor seconds`; empty for clips shorter than one FFT
/// window or too quiet to produce peaks.
pub fn fingerprint(samples: &[f64], sample_rate: u32) -> HashMap<u32, f64> {
    let spec = spectrogram::build(samples);
    let constellation = peaks::extract(&spec);
    let hashes = hashing::generate_hashes(&constellation, sample_rate);

    debug!(
        frames = spec.len(),
        peaks = constellation.len(),
        hashes = hashes.len(),
        "fingerprinted clip"
    );

    hashes
}
