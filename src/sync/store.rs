//! Truth store: the shared, last-write-wins key-value surface, plus the typed
//! ledger used by publishers and readers.

use std::{
    error::Error,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::sync::{
    snapshot::GameState,
    wire::{decode_state, encode_state},
};

/// Key holding the latest canonical game state.
pub const GAME_STATE_KEY: &str = "gameState";
/// Key holding the display truth written at each epoch.
pub const DISPLAY_TRUTH_KEY: &str = "displayTruth";

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by truth store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Keys are restricted to ASCII alphanumerics, `-` and `_`.
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
    /// The snapshot could not be serialized.
    #[error("failed to encode snapshot")]
    Encode(#[from] serde_json::Error),
    /// The backend could not complete the operation.
    #[error("store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Shared key-value surface. Writes are atomic per key; there is no locking
/// across keys and a single writer role is assumed.
pub trait TruthStore: Send + Sync {
    /// Replace the value stored under `key`.
    fn write(&self, key: &str, value: String) -> StoreResult<()>;
    /// Last completed write for `key`, if any.
    fn read(&self, key: &str) -> StoreResult<Option<String>>;
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryTruthStore {
    entries: DashMap<String, String>,
}

impl MemoryTruthStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TruthStore for MemoryTruthStore {
    fn write(&self, key: &str, value: String) -> StoreResult<()> {
        validate_key(key)?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        validate_key(key)?;
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }
}

/// Store keeping one JSON file per key so several processes on one machine can
/// share it. Writes go to a temporary file that is renamed over the target.
#[derive(Debug, Clone)]
pub struct FileTruthStore {
    dir: PathBuf,
}

impl FileTruthStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            StoreError::unavailable(format!("cannot create {}", dir.display()), err)
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl TruthStore for FileTruthStore {
    fn write(&self, key: &str, value: String) -> StoreResult<()> {
        validate_key(key)?;
        let target = self.entry_path(key);
        let staging = self
            .dir
            .join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));

        fs::write(&staging, value).map_err(|err| {
            StoreError::unavailable(format!("cannot write {}", staging.display()), err)
        })?;
        if let Err(err) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::unavailable(
                format!("cannot replace {}", target.display()),
                err,
            ));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> StoreResult<Option<String>> {
        validate_key(key)?;
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::unavailable(
                format!("cannot read {}", path.display()),
                err,
            )),
        }
    }
}

fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Typed access to the game state and display truth records.
///
/// Reads never fail: a missing, unreadable or unparsable record is reported as
/// absent so readers keep their prior state.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn TruthStore>,
}

impl Ledger {
    /// Wrap a store.
    pub fn new(store: Arc<dyn TruthStore>) -> Self {
        Self { store }
    }

    /// Persist the canonical game state.
    pub fn write_game_state(&self, state: &GameState) -> StoreResult<()> {
        self.store.write(GAME_STATE_KEY, encode_state(state)?)
    }

    /// Persist the display truth for the current epoch.
    pub fn write_display_truth(&self, state: &GameState) -> StoreResult<()> {
        self.store.write(DISPLAY_TRUTH_KEY, encode_state(state)?)
    }

    /// Latest canonical game state, if readable.
    pub fn game_state(&self) -> Option<GameState> {
        self.read_snapshot(GAME_STATE_KEY)
    }

    /// Display truth of the current epoch, if readable.
    pub fn display_truth(&self) -> Option<GameState> {
        self.read_snapshot(DISPLAY_TRUTH_KEY)
    }

    fn read_snapshot(&self, key: &str) -> Option<GameState> {
        let raw = match self.store.read(key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key, error = %err, "truth store read failed; treating as absent");
                return None;
            }
        };
        match decode_state(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(key, error = %err, "malformed snapshot in truth store; treating as absent");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::snapshot::{PhaseState, Round};

    fn question(timestamp: u64) -> GameState {
        GameState::new(
            PhaseState::Question(Round {
                question_index: 0,
                question_counter: 1,
                time_left: 20,
            }),
            timestamp,
            "A1B2",
        )
    }

    #[test]
    fn memory_store_is_last_write_wins() {
        let store = MemoryTruthStore::new();
        store.write("gameState", "one".into()).unwrap();
        store.write("gameState", "two".into()).unwrap();
        assert_eq!(store.read("gameState").unwrap().as_deref(), Some("two"));
        assert_eq!(store.read("displayTruth").unwrap(), None);
    }

    #[test]
    fn keys_with_path_characters_are_rejected() {
        let store = MemoryTruthStore::new();
        assert!(matches!(
            store.write("../escape", "x".into()),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn file_store_replaces_entries_without_leftovers() {
        let dir = std::env::temp_dir().join(format!("trivia-sync-{}", Uuid::new_v4().simple()));
        let store = FileTruthStore::open(&dir).unwrap();

        store.write("gameState", "first".into()).unwrap();
        store.write("gameState", "second".into()).unwrap();

        assert_eq!(store.read("gameState").unwrap().as_deref(), Some("second"));
        assert_eq!(store.read("displayTruth").unwrap(), None);
        let files: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn ledger_reads_back_written_snapshots() {
        let ledger = Ledger::new(Arc::new(MemoryTruthStore::new()));
        ledger.write_game_state(&question(10)).unwrap();

        assert_eq!(ledger.game_state(), Some(question(10)));
        assert_eq!(ledger.display_truth(), None);
    }

    #[test]
    fn malformed_snapshot_reads_as_absent() {
        let store = Arc::new(MemoryTruthStore::new());
        store
            .write(GAME_STATE_KEY, "{\"state\":\"question\"".into())
            .unwrap();
        let ledger = Ledger::new(store);

        assert_eq!(ledger.game_state(), None);
    }
}
