//! Register/query orchestration.
//!
//! The engine runs load -> spectrogram -> peaks -> hashes and dispatches
//! to the store or the matcher, folding every failure into one envelope
//! for the front-ends.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::audio::{self, AudioError, Samples};
use crate::fingerprint;
use crate::matcher::{self, MatchResult};
use crate::store::{IndexStore, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("invalid audio: empty sample buffer or zero sample rate")]
    InvalidAudio,
    #[error("clip produced no fingerprints")]
    EmptyFingerprint,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub song_id: i32,
    pub song_name: String,
    pub hash_count: usize,
}

/// Ties the fingerprint pipeline to a persistent index.
pub struct Engine {
    store: IndexStore,
}

impl Engine {
    pub fn new(store: IndexStore) -> Self {
        Engine { store }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Reduce a clip to its fingerprint map, rejecting inputs the spectral
    /// pipeline cannot say anything about.
    pub fn fingerprint_samples(
        &self,
        samples: &Samples,
    ) -> Result<HashMap<u32, f64>, PipelineError> {
        if samples.data.is_empty() || samples.sample_rate == 0 {
            return Err(PipelineError::InvalidAudio);
        }

        let hashes = fingerprint::fingerprint(&samples.data, samples.sample_rate);
        if hashes.is_empty() {
            // near-silent or sub-window clips fingerprint to nothing; that
            // is a soft failure, distinct from malformed input
            return Err(PipelineError::EmptyFingerprint);
        }

        Ok(hashes)
    }

    /// Fingerprint a clip and register it under the next free song ID.
    pub fn register(&self, samples: &Samples, name: &str) -> Result<Registration, PipelineError> {
        let hashes = self.fingerprint_samples(samples)?;
        let song_id = self.store.register_next(name, &hashes)?;

        info!(
            song_id,
            name,
            hashes = hashes.len(),
            seconds = samples.duration_seconds(),
            "registered clip"
        );

        Ok(Registration {
            song_id,
            song_name: name.to_string(),
            hash_count: hashes.len(),
        })
    }

    /// Fingerprint a clip and vote it against the index.
    pub fn identify(&self, samples: &Samples) -> Result<MatchResult, PipelineError> {
        let hashes = self.fingerprint_samples(samples)?;
        let view = self.store.snapshot();
        let result = matcher::best_match(&view, &hashes);

        info!(
            song_id = result.song_id,
            matches = result.match_count,
            total = result.total,
            "match pass complete"
        );

        Ok(result)
    }

    pub fn register_file(&self, path: &Path, name: &str) -> Result<Registration, PipelineError> {
        let samples = audio::load(path)?;
        self.register(&samples, name)
    }

    pub fn identify_file(&self, path: &Path) -> Result<MatchResult, PipelineError> {
        let samples = audio::load(path)?;
        self.identify(&samples)
    }
}
