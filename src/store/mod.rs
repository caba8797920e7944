//! Persistent inverted index of fingerprint hashes.
//!
//! Memory holds `hash -> [(song, anchor seconds)]` behind one
//! reader-writer lock; matches take the shared side, registrations the
//! exclusive side. Durability is an append-only log of fixed 16-byte
//! records plus a JSON song-name table, both replayed at startup. The log
//! is the authoritative record of index contents; the JSON only names
//! songs and may lag behind it after a crash.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

use thiserror::Error;
use tracing::{info, warn};

/// One log record: u32 hash, i32 song id, f64 anchor seconds, little-endian.
const RECORD_SIZE: usize = 16;
const LOG_FILE: &str = "hashes.log";
const SONGS_FILE: &str = "songs.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt store: {0}")]
    Corruption(String),
}

/// A single occurrence of a hash in a registered song.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub song_id: i32,
    pub anchor_time: f64,
}

#[derive(Default)]
struct State {
    index: HashMap<u32, Vec<IndexEntry>>,
    songs: HashMap<i32, String>,
    max_song_id: i32,
}

impl State {
    fn insert_entry(&mut self, hash: u32, entry: IndexEntry) {
        self.index.entry(hash).or_default().push(entry);
        self.max_song_id = self.max_song_id.max(entry.song_id);
    }
}

/// Inverted index with an append-only on-disk log and a song-name table.
pub struct IndexStore {
    state: RwLock<State>,
    log_path: PathBuf,
    songs_path: PathBuf,
}

/// Read-locked view of the store. A match pass holds one view for its
/// whole duration, so registrations wait but other lookups do not.
pub struct IndexView<'a> {
    state: RwLockReadGuard<'a, State>,
}

impl IndexView<'_> {
    /// Every registered occurrence of `hash`, in insertion order.
    pub fn lookup(&self, hash: u32) -> &[IndexEntry] {
        self.state
            .index
            .get(&hash)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn name_of(&self, song_id: i32) -> Option<&str> {
        self.state
            .songs
            .get(&normalize_song_id(song_id))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.state.index.is_empty()
    }

    pub fn song_count(&self) -> usize {
        self.state.songs.len()
    }

    pub fn hash_count(&self) -> usize {
        self.state.index.len()
    }
}

impl IndexStore {
    /// Open (or create) the store under `data_dir`, replaying any existing
    /// files into memory.
    ///
    /// Refuses to start on a truncated log or unreadable song table rather
    /// than silently dropping registered data.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;

        let store = IndexStore {
            state: RwLock::new(State::default()),
            log_path: data_dir.join(LOG_FILE),
            songs_path: data_dir.join(SONGS_FILE),
        };

        let mut state = store.state.write().unwrap();
        store.load_songs(&mut state)?;
        store.load_log(&mut state)?;

        info!(
            songs = state.songs.len(),
            hashes = state.index.len(),
            "index store opened"
        );

        drop(state);
        Ok(store)
    }

    /// Register a song's fingerprints under `song_id`.
    ///
    /// The log append is flushed and fsynced before the call returns; the
    /// song table is then rewritten atomically. A failed table rewrite is
    /// retried once and otherwise rolled back (log truncated, memory
    /// restored) so a successful return always means both files agree.
    pub fn register(
        &self,
        song_id: i32,
        name: &str,
        fingerprints: &HashMap<u32, f64>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        self.register_locked(&mut state, song_id, name, fingerprints)
    }

    /// Register under the next free song ID, returning it. ID allocation
    /// happens under the same exclusive lock as the write, so concurrent
    /// registrations cannot collide.
    pub fn register_next(
        &self,
        name: &str,
        fingerprints: &HashMap<u32, f64>,
    ) -> Result<i32, StoreError> {
        let mut state = self.state.write().unwrap();
        let song_id = state.max_song_id + 1;
        self.register_locked(&mut state, song_id, name, fingerprints)?;
        Ok(song_id)
    }

    fn register_locked(
        &self,
        state: &mut State,
        song_id: i32,
        name: &str,
        fingerprints: &HashMap<u32, f64>,
    ) -> Result<(), StoreError> {
        let song_id = normalize_song_id(song_id);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let prior_len = file.metadata()?.len();

        let mut writer = BufWriter::new(file);
        for (&hash, &seconds) in fingerprints {
            writer.write_all(&hash.to_le_bytes())?;
            writer.write_all(&song_id.to_le_bytes())?;
            writer.write_all(&seconds.to_le_bytes())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        let previous_name = state.songs.insert(song_id, name.to_string());
        for (&hash, &seconds) in fingerprints {
            state.insert_entry(
                hash,
                IndexEntry {
                    song_id,
                    anchor_time: seconds,
                },
            );
        }

        if let Err(first) = self.write_songs(&state.songs) {
            warn!(error = %first, "song table rewrite failed, retrying");
            if let Err(second) = self.write_songs(&state.songs) {
                self.rollback(state, song_id, previous_name, fingerprints, prior_len)?;
                return Err(StoreError::Io(second));
            }
        }

        info!(song_id, name, entries = fingerprints.len(), "registered");
        Ok(())
    }

    /// Undo a register whose song-table rewrite failed: truncate the log
    /// back to its pre-register length and drop the in-memory entries.
    fn rollback(
        &self,
        state: &mut State,
        song_id: i32,
        previous_name: Option<String>,
        fingerprints: &HashMap<u32, f64>,
        prior_len: u64,
    ) -> Result<(), StoreError> {
        let file = OpenOptions::new().write(true).open(&self.log_path)?;
        file.set_len(prior_len)?;
        file.sync_all()?;

        for &hash in fingerprints.keys() {
            if let Some(entries) = state.index.get_mut(&hash) {
                entries.pop();
                if entries.is_empty() {
                    state.index.remove(&hash);
                }
            }
        }

        match previous_name {
            Some(previous) => state.songs.insert(song_id, previous),
            None => state.songs.remove(&song_id),
        };

        warn!(song_id, "register rolled back");
        Ok(())
    }

    /// Take the shared lock for a whole match pass.
    pub fn snapshot(&self) -> IndexView<'_> {
        IndexView {
            state: self.state.read().unwrap(),
        }
    }

    /// The next unused song ID (IDs are dense, positive, monotonic).
    pub fn next_song_id(&self) -> i32 {
        self.state.read().unwrap().max_song_id + 1
    }

    fn load_songs(&self, state: &mut State) -> Result<(), StoreError> {
        let data = match fs::read(&self.songs_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let table: HashMap<String, String> = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Corruption(format!("unreadable song table: {e}")))?;

        for (key, name) in table {
            let id: i32 = key
                .parse()
                .map_err(|_| StoreError::Corruption(format!("bad song id {key:?}")))?;
            let id = normalize_song_id(id);
            state.max_song_id = state.max_song_id.max(id);
            state.songs.insert(id, name);
        }

        Ok(())
    }

    fn load_log(&self, state: &mut State) -> Result<(), StoreError> {
        let data = match fs::read(&self.log_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if data.len() % RECORD_SIZE != 0 {
            return Err(StoreError::Corruption(format!(
                "hash log length {} is not a multiple of {}",
                data.len(),
                RECORD_SIZE
            )));
        }

        for record in data.chunks_exact(RECORD_SIZE) {
            let mut hash = [0u8; 4];
            let mut song_id = [0u8; 4];
            let mut seconds = [0u8; 8];
            hash.copy_from_slice(&record[0..4]);
            song_id.copy_from_slice(&record[4..8]);
            seconds.copy_from_slice(&record[8..16]);

            // entries whose song is missing from the table are kept; the
            // log is authoritative and the JSON may lag after a crash
            state.insert_entry(
                u32::from_le_bytes(hash),
                IndexEntry {
                    song_id: normalize_song_id(i32::from_le_bytes(song_id)),
                    anchor_time: f64::from_le_bytes(seconds),
                },
            );
        }

        Ok(())
    }

    fn write_songs(&self, songs: &HashMap<i32, String>) -> Result<(), std::io::Error> {
        let table: HashMap<String, &str> = songs
            .iter()
            .map(|(id, name)| (id.to_string(), name.as_str()))
            .collect();

        let data = serde_json::to_vec_pretty(&table)
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;

        let tmp_path = self.songs_path.with_extension("json.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&data)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.songs_path)?;

        Ok(())
    }
}

/// Song IDs are positive by convention; legacy storage may hold negative
/// or zero IDs, which fold to their usable form instead of being dropped.
fn normalize_song_id(song_id: i32) -> i32 {
    match song_id {
        0 => 1,
        id if id < 0 => id.saturating_abs(),
        id => id,
    }
}
