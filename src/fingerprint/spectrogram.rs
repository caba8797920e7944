//! Short-time spectral analysis.
//!
//! Frames the clip at 50% overlap, applies a Hann window and keeps the
//! magnitude of the non-redundant half of each frame's FFT.

use std::f64::consts::PI;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

/// FFT window length in samples.
pub const WINDOW_SIZE: usize = 4096;
/// Hop between consecutive frames; half the window, so every sample lands
/// in two frames and transients cannot fall between frame boundaries.
pub const HOP_SIZE: usize = 2048;
/// Frequency bins retained per frame.
pub const NUM_BINS: usize = WINDOW_SIZE / 2 + 1;

/// Magnitude spectrogram: one row per frame, [`NUM_BINS`] columns.
pub type Spectrogram = Vec<Vec<f64>>;

/// Compute the magnitude spectrogram of a mono clip.
///
/// Returns an empty matrix when the clip is shorter than one window.
/// Silence is not an error; it produces rows of zeros which the peak
/// extractor filters out.
pub fn build(samples: &[f64]) -> Spectrogram {
    if samples.len() < WINDOW_SIZE {
        return Vec::new();
    }

    let window = hann_window(WINDOW_SIZE);
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(WINDOW_SIZE);

    let frame_count = (samples.len() - WINDOW_SIZE) / HOP_SIZE + 1;

    (0..frame_count)
        .into_par_iter()
        .map(|frame| {
            let start = frame * HOP_SIZE;
            let mut buffer: Vec<Complex<f64>> = samples[start..start + WINDOW_SIZE]
                .iter()
                .zip(&window)
                .map(|(&sample, &weight)| Complex {
                    re: sample * weight,
                    im: 0.0,
                })
                .collect();

            fft.process(&mut buffer);

            buffer[..NUM_BINS]
                .iter()
                .map(|c| (c.re * c.re + c.im * c.im).sqrt())
                .collect()
        })
        .collect()
}

fn hann_window(size: usize) -> Vec<f64> {
    if size == 1 {
        return vec![1.0];
    }

    let n = (size - 1) as f64;
    (0..size)
        .map(|k| 0.5 * (1.0 - (2.0 * PI * k as f64 / n).cos()))
        .collect()
}
