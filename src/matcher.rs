//! Time-coherent match voting.
//!
//! Random hash collisions scatter across offset values; a genuine match
//! piles its collisions into one `query time - reference time` bucket
//! because every landmark aligns with the same region of the reference.
//! The winner is the (song, bucket) pair with the tallest histogram bar.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::store::IndexView;

/// Width of an offset histogram bucket in seconds. Half a second absorbs
/// the frame-alignment jitter between a query and its reference.
pub const OFFSET_BUCKET_SECONDS: f64 = 0.5;

/// Best candidate for a query fingerprint set. `song_id = -1` means no
/// candidate; that is a value, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub song_id: i32,
    pub song_name: String,
    pub match_count: u32,
    pub total: u32,
    pub confidence: f64,
}

impl MatchResult {
    fn none(total: u32) -> Self {
        MatchResult {
            song_id: -1,
            song_name: String::new(),
            match_count: 0,
            total,
            confidence: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.song_id != -1
    }
}

/// Vote every query hash's index entries into `(song, offset bucket)`
/// histogram cells and return the strongest cell.
///
/// No confidence floor is applied here; the best candidate is returned
/// however weak, and callers threshold as they see fit. Equal vote counts
/// resolve toward the smallest `(song_id, bucket)` pair so repeated
/// queries return the same answer.
pub fn best_match(view: &IndexView, query: &HashMap<u32, f64>) -> MatchResult {
    let total = query.len() as u32;
    if query.is_empty() || view.is_empty() {
        return MatchResult::none(total);
    }

    let mut votes: HashMap<(i32, i64), u32> = HashMap::new();
    for (&hash, &query_time) in query {
        for entry in view.lookup(hash) {
            let offset = query_time - entry.anchor_time;
            let bucket = (offset / OFFSET_BUCKET_SECONDS).floor() as i64;
            *votes.entry((entry.song_id, bucket)).or_default() += 1;
        }
    }

    let Some(((song_id, bucket), match_count)) = votes
        .into_iter()
        .max_by_key(|&(key, count)| (count, Reverse(key)))
    else {
        return MatchResult::none(total);
    };

    let song_name = view.name_of(song_id).unwrap_or("Unknown").to_string();
    debug!(song_id, bucket, match_count, total, "vote histogram peak");

    MatchResult {
        song_id,
        song_name,
        match_count,
        total,
        confidence: match_count as f64 / total as f64,
    }
}
