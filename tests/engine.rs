//! End-to-end register/query scenarios against a real on-disk store.

use std::f64::consts::PI;
use std::fs;

use tempfile::TempDir;

use overtone::audio::Samples;
use overtone::fingerprint::spectrogram::HOP_SIZE;
use overtone::pipeline::{Engine, PipelineError};
use overtone::store::IndexStore;

const RATE: u32 = 44_100;

fn sine(freq: f64, seconds: f64) -> Samples {
    let count = (seconds * RATE as f64) as usize;
    let data = (0..count)
        .map(|i| (2.0 * PI * freq * i as f64 / RATE as f64).sin() * 0.8)
        .collect();

    Samples {
        data,
        sample_rate: RATE,
    }
}

/// A tone with a slow amplitude wobble, so its constellation is richer
/// than a bare sine's.
fn warbling_tone(freq: f64, seconds: f64) -> Samples {
    let count = (seconds * RATE as f64) as usize;
    let data = (0..count)
        .map(|i| {
            let t = i as f64 / RATE as f64;
            let envelope = 0.6 + 0.4 * (2.0 * PI * 0.5 * t).sin();
            (2.0 * PI * freq * t).sin() * envelope * 0.8
        })
        .collect();

    Samples {
        data,
        sample_rate: RATE,
    }
}

fn engine() -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let store = IndexStore::open(dir.path()).unwrap();
    (dir, Engine::new(store))
}

#[test]
fn exact_replay_matches_every_hash() {
    let (_dir, engine) = engine();
    let clip = sine(440.0, 5.0);

    let registration = engine.register(&clip, "A440").unwrap();
    let result = engine.identify(&clip).unwrap();

    assert_eq!(result.song_id, registration.song_id);
    assert_eq!(result.song_name, "A440");
    assert_eq!(result.match_count as usize, registration.hash_count);
    assert!(result.confidence >= 0.99);
}

#[test]
fn two_songs_disambiguate() {
    let (_dir, engine) = engine();
    let clip_a = sine(440.0, 5.0);
    let clip_b = sine(880.0, 5.0);

    let id_a = engine.register(&clip_a, "A440").unwrap().song_id;
    let id_b = engine.register(&clip_b, "A880").unwrap().song_id;
    assert_ne!(id_a, id_b);

    let result = engine.identify(&clip_a).unwrap();
    assert_eq!(result.song_id, id_a);
    assert_eq!(result.song_name, "A440");
}

#[test]
fn offset_clip_matches_its_source() {
    let (_dir, engine) = engine();
    let full = warbling_tone(440.0, 20.0);
    let id = engine.register(&full, "Long").unwrap().song_id;

    // slice on a hop boundary about ten seconds in, so the query frames
    // line up exactly with reference frames
    let start = 215 * HOP_SIZE;
    let end = start + 5 * RATE as usize;
    let query = Samples {
        data: full.data[start..end].to_vec(),
        sample_rate: RATE,
    };

    let query_hashes = engine.fingerprint_samples(&query).unwrap();
    let result = engine.identify(&query).unwrap();

    assert_eq!(result.song_id, id);
    // frames align, but peaks near the slice edges see a clamped
    // neighborhood and may differ from the reference constellation
    assert!(
        result.match_count as usize * 2 >= query_hashes.len(),
        "only {}/{} hashes aligned",
        result.match_count,
        query_hashes.len()
    );
}

#[test]
fn noisy_query_still_matches() {
    let (_dir, engine) = engine();
    let clean = warbling_tone(440.0, 10.0);
    let id = engine.register(&clean, "Clean").unwrap().song_id;

    // deterministic pseudo-noise, loud enough to litter the constellation
    // with spurious peaks but not to drown the tone
    let mut state = 0x9e3779b97f4a7c15u64;
    let noisy_data: Vec<f64> = clean
        .data
        .iter()
        .map(|&s| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let noise = ((state >> 11) as f64 / (1u64 << 53) as f64 - 0.5) * 0.3;
            (s + noise).clamp(-1.0, 1.0)
        })
        .collect();
    let noisy = Samples {
        data: noisy_data,
        sample_rate: RATE,
    };

    let result = engine.identify(&noisy).unwrap();
    assert_eq!(result.song_id, id);
}

#[test]
fn empty_database_returns_no_match() {
    let (_dir, engine) = engine();
    let result = engine.identify(&sine(440.0, 3.0)).unwrap();

    assert_eq!(result.song_id, -1);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.match_count, 0);
    assert!(result.total > 0);
}

#[test]
fn silent_query_is_a_soft_failure() {
    let (_dir, engine) = engine();
    let silence = Samples {
        data: vec![0.0; RATE as usize * 2],
        sample_rate: RATE,
    };

    assert!(matches!(
        engine.identify(&silence),
        Err(PipelineError::EmptyFingerprint)
    ));
}

#[test]
fn registrations_survive_restart() {
    let dir = TempDir::new().unwrap();
    let clip = sine(440.0, 5.0);
    let id;

    {
        let engine = Engine::new(IndexStore::open(dir.path()).unwrap());
        id = engine.register(&clip, "Restartable").unwrap().song_id;
    }

    let engine = Engine::new(IndexStore::open(dir.path()).unwrap());
    let result = engine.identify(&clip).unwrap();

    assert_eq!(result.song_id, id);
    assert_eq!(result.song_name, "Restartable");
    assert!(result.confidence >= 0.99);
}

#[test]
fn lagging_song_table_keeps_hashes_and_loses_the_name() {
    let dir = TempDir::new().unwrap();
    let clip_one = sine(440.0, 5.0);
    let clip_two = sine(660.0, 5.0);
    let clip_three = sine(880.0, 5.0);
    let (id_one, id_two, id_three);
    let songs_after_two;

    {
        let engine = Engine::new(IndexStore::open(dir.path()).unwrap());
        id_one = engine.register(&clip_one, "One").unwrap().song_id;
        id_two = engine.register(&clip_two, "Two").unwrap().song_id;
        songs_after_two = fs::read(dir.path().join("songs.json")).unwrap();
        id_three = engine.register(&clip_three, "Three").unwrap().song_id;
    }

    // crash between the third register's log append and table rewrite
    fs::write(dir.path().join("songs.json"), songs_after_two).unwrap();

    let engine = Engine::new(IndexStore::open(dir.path()).unwrap());

    let first = engine.identify(&clip_one).unwrap();
    assert_eq!(first.song_id, id_one);
    assert_eq!(first.song_name, "One");

    let second = engine.identify(&clip_two).unwrap();
    assert_eq!(second.song_id, id_two);
    assert_eq!(second.song_name, "Two");

    // the log is authoritative: song three still matches, just unnamed
    let third = engine.identify(&clip_three).unwrap();
    assert_eq!(third.song_id, id_three);
    assert_eq!(third.song_name, "Unknown");
}

#[test]
fn double_registration_does_not_change_the_answer() {
    let (_dir, engine) = engine();
    let clip = sine(440.0, 5.0);

    let first = engine.register(&clip, "Dup").unwrap();
    let second = engine.register(&clip, "Dup").unwrap();
    assert_ne!(first.song_id, second.song_id);

    // both registrations carry the same hashes at the same offsets; the
    // tie resolves deterministically to the lower id
    let result = engine.identify(&clip).unwrap();
    assert_eq!(result.song_id, first.song_id);
    assert_eq!(result.song_name, "Dup");
}
