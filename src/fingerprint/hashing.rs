//! Combinatorial landmark hashing.
//!
//! Each peak anchors a fan-out over the peaks ahead of it inside the target
//! zone. An anchor/target pair packs into a 32-bit hash carrying both
//! frequencies and their frame distance; the anchor's absolute time in
//! seconds rides alongside for offset voting.

use std::collections::HashMap;

use rayon::prelude::*;

use super::peaks::Peak;
use super::spectrogram::HOP_SIZE;

/// How far ahead of an anchor, in frames, targets are taken.
pub const TARGET_ZONE_FRAMES: u32 = 90;
/// How far from the anchor's bin, in either direction, targets are taken.
pub const TARGET_ZONE_BINS: u32 = 45;

const FREQ_MASK: u32 = 0x3FF;
const DELTA_MASK: u32 = 0xFFF;

/// Fan anchor/target pairs out into `hash -> anchor seconds`.
///
/// When a hash recurs within one clip the later anchor wins; anchors are
/// processed in parallel but folded back in scan order, so the surviving
/// time is deterministic.
pub fn generate_hashes(peaks: &[Peak], sample_rate: u32) -> HashMap<u32, f64> {
    let per_anchor: Vec<Vec<(u32, f64)>> = peaks
        .par_iter()
        .enumerate()
        .map(|(i, anchor)| {
            let seconds = anchor_seconds(anchor.time, sample_rate);
            let mut pairs = Vec::new();

            // peaks are time-sorted, so the zone scan can stop early
            for target in &peaks[i + 1..] {
                let delta = target.time - anchor.time;
                if delta > TARGET_ZONE_FRAMES {
                    break;
                }
                if delta == 0 {
                    continue;
                }
                if target.freq.abs_diff(anchor.freq) > TARGET_ZONE_BINS {
                    continue;
                }

                pairs.push((pack(anchor.freq, target.freq, delta), seconds));
            }

            pairs
        })
        .collect();

    let mut hashes = HashMap::new();
    for pairs in per_anchor {
        for (hash, seconds) in pairs {
            hashes.insert(hash, seconds);
        }
    }

    hashes
}

/// Pack an anchor/target pair into 10 + 10 + 12 bits.
///
/// Fields are masked, never clamped: with 4096-point windows there are 2049
/// bins, so bins >= 1024 alias into the low field bits, and every index on
/// disk depends on that exact aliasing.
pub fn pack(anchor_freq: u32, target_freq: u32, delta: u32) -> u32 {
    (anchor_freq & FREQ_MASK) << 22 | (target_freq & FREQ_MASK) << 12 | (delta & DELTA_MASK)
}

/// Absolute time of a frame's left edge in seconds.
pub fn anchor_seconds(frame: u32, sample_rate: u32) -> f64 {
    frame as f64 * HOP_SIZE as f64 / sample_rate as f64
}
