//! Desired and observed state, and where observed state is kept.
//!
//! Unique responsibility: hold the caller's desired attributes and persist the
//! last observed attributes of every managed object.
//!
//! Non-goals:
//! - Call the GitHub API (done by the resource kinds through `github_client`).
//! - Decide what to do (done by `github_reconciler`).
//!
//! Records are keyed by `(kind, identity)`. The reconciler is the only writer;
//! it treats one record as exclusively owned for the duration of one operation.
//!
//! Two stores ship with the crate:
//! - [`MemoryStateStore`] for embedding and tests,
//! - [`JsonFileStateStore`], a single JSON document written atomically.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::github_cache::ValidationToken;
use crate::github_identity::ResourceIdentity;

/// State file format version.
const STATE_FORMAT_VERSION: u32 = 1;

/// Attribute bag, keyed by attribute name.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Attributes the caller wants to exist remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredState(Attributes);

impl DesiredState {
    /// Wrap an attribute bag.
    #[must_use]
    pub const fn new(attributes: Attributes) -> Self {
        Self(attributes)
    }

    /// Build from a JSON object. Returns `None` for any other JSON value.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Raw attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.0
    }

    /// Deserialize the attributes into a typed request.
    ///
    /// # Errors
    ///
    /// Returns the decoder message if a required attribute is missing or has
    /// the wrong type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(serde_json::Value::Object(self.0.clone())).map_err(|e| e.to_string())
    }
}

/// Last observed state of one remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Resource kind (see `RemoteResource::kind`).
    pub kind: String,
    /// Identity assigned by GitHub at creation. Never changed by an update.
    pub identity: ResourceIdentity,
    /// Validation token from the last full read, if any.
    pub token: Option<ValidationToken>,
    /// Remote attributes.
    pub attributes: Attributes,
    /// Timestamp (ms since epoch) of the observation.
    pub observed_at_ms: u64,
}

impl ObservedState {
    /// String attribute, if present.
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Errors for state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Serialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Invalid state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// Persistence for observed state.
///
/// Implementations must be safe to share between concurrent reconciliations
/// of distinct objects.
pub trait StateStore: Send + Sync {
    /// Load the record for `(kind, identity)`.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails (I/O, parsing, or validation).
    fn load(&self, kind: &str, identity: &ResourceIdentity) -> Result<Option<ObservedState>, StateStoreError>;

    /// Insert or replace the record for `(state.kind, state.identity)`.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails (I/O, serialization, or validation).
    fn save(&self, state: &ObservedState) -> Result<(), StateStoreError>;

    /// Remove the record for `(kind, identity)`. Removing a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn clear(&self, kind: &str, identity: &ResourceIdentity) -> Result<(), StateStoreError>;
}

fn record_key(kind: &str, identity: &ResourceIdentity) -> String {
    format!("{kind}/{identity}")
}

fn validate(state: &ObservedState) -> Result<(), StateStoreError> {
    if state.kind.trim().is_empty() {
        return Err(StateStoreError::InvalidState("kind is empty"));
    }
    if state.identity.as_str().is_empty() {
        return Err(StateStoreError::InvalidState("identity is empty"));
    }
    Ok(())
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, ObservedState>>,
    writes: AtomicUsize,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save`/`clear` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of records held.
    ///
    /// Still counts the records after a thread panicked holding the lock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, kind: &str, identity: &ResourceIdentity) -> Result<Option<ObservedState>, StateStoreError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StateStoreError::InvalidState("state lock poisoned"))?;
        Ok(records.get(&record_key(kind, identity)).cloned())
    }

    fn save(&self, state: &ObservedState) -> Result<(), StateStoreError> {
        validate(state)?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| StateStoreError::InvalidState("state lock poisoned"))?;
        records.insert(record_key(&state.kind, &state.identity), state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self, kind: &str, identity: &ResourceIdentity) -> Result<(), StateStoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StateStoreError::InvalidState("state lock poisoned"))?;
        records.remove(&record_key(kind, identity));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    format_version: u32,
    #[serde(default)]
    resources: BTreeMap<String, ObservedState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            resources: BTreeMap::new(),
        }
    }
}

/// File-based JSON state store with safe atomic writes.
///
/// All records live in one document; writes are serialized within the process.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStateStore {
    /// Create a new JSON file state store.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Get the path to the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default path from environment or fallback.
    ///
    /// Env: `GITHUB_STATE_PATH` (default: `.github_state.json`)
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Some(p) = std::env::var_os("GITHUB_STATE_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(".github_state.json")
    }

    fn ensure_parent_dir(&self) -> Result<(), io::Error> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn read_file(&self) -> Result<StateFile, StateStoreError> {
        if !self.path.exists() {
            return Ok(StateFile::default());
        }
        let bytes = fs::read(&self.path)?;
        let file: StateFile = serde_json::from_slice(&bytes)?;
        if file.format_version != STATE_FORMAT_VERSION {
            return Err(StateStoreError::InvalidState(
                "unsupported state format version",
            ));
        }
        Ok(file)
    }

    fn write_file(&self, file: &StateFile) -> Result<(), StateStoreError> {
        self.ensure_parent_dir()?;

        // Write to temp file in same directory for atomic rename.
        let mut tmp = self.path.clone();
        let tmp_name = format!(
            ".{}.tmp",
            self.path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("github_state")
        );
        tmp.set_file_name(tmp_name);

        let json = serde_json::to_vec_pretty(file)?;

        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&json)?;
            f.sync_all()?;
        }

        // On Windows, rename over an existing file can fail; remove first.
        if cfg!(windows) && self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<(), StateStoreError>
    where
        F: FnOnce(&mut BTreeMap<String, ObservedState>),
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StateStoreError::InvalidState("state lock poisoned"))?;
        let mut file = self.read_file()?;
        f(&mut file.resources);
        self.write_file(&file)
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self, kind: &str, identity: &ResourceIdentity) -> Result<Option<ObservedState>, StateStoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StateStoreError::InvalidState("state lock poisoned"))?;
        let mut file = self.read_file()?;
        Ok(file.resources.remove(&record_key(kind, identity)))
    }

    fn save(&self, state: &ObservedState) -> Result<(), StateStoreError> {
        validate(state)?;
        let key = record_key(&state.kind, &state.identity);
        self.update(|resources| {
            resources.insert(key, state.clone());
        })
    }

    fn clear(&self, kind: &str, identity: &ResourceIdentity) -> Result<(), StateStoreError> {
        let key = record_key(kind, identity);
        self.update(|resources| {
            resources.remove(&key);
        })
    }
}

/// Utility: current timestamp in milliseconds since UNIX epoch.
#[must_use]
pub fn now_unix_ms() -> u64 {
    let Ok(dur) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) else {
        return 0;
    };
    u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observed(kind: &str, id: &str) -> ObservedState {
        ObservedState {
            kind: kind.to_string(),
            identity: ResourceIdentity::new(id),
            token: Some(ValidationToken::new("\"etag-1\"")),
            attributes: DesiredState::from_json(json!({"title": "laptop"}))
                .unwrap()
                .attributes()
                .clone(),
            observed_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn desired_state_decoding() {
        #[derive(Debug, Deserialize)]
        struct Key {
            title: String,
        }

        let desired = DesiredState::from_json(json!({"title": "laptop", "extra": 1})).unwrap();
        let key: Key = desired.decode().unwrap();
        assert_eq!(key.title, "laptop");

        let missing = DesiredState::from_json(json!({})).unwrap();
        assert!(missing.decode::<Key>().unwrap_err().contains("title"));

        assert!(DesiredState::from_json(json!([1, 2])).is_none());
    }

    #[test]
    fn memory_store_round_trip_and_write_count() {
        let store = MemoryStateStore::new();
        let state = observed("github_user_ssh_signing_key", "42");

        assert!(store.load(&state.kind, &state.identity).unwrap().is_none());
        store.save(&state).unwrap();
        assert_eq!(store.load(&state.kind, &state.identity).unwrap(), Some(state.clone()));
        assert_eq!(store.len(), 1);

        // Same identity under another kind is a different record.
        assert!(store.load("github_organization_webhook", &state.identity).unwrap().is_none());

        store.clear(&state.kind, &state.identity).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn len_survives_a_poisoned_lock() {
        let store = MemoryStateStore::new();
        store.save(&observed("github_user_ssh_signing_key", "42")).unwrap();

        std::thread::scope(|s| {
            let crashed = s
                .spawn(|| {
                    let _records = store.records.lock().unwrap();
                    panic!("writer crashed");
                })
                .join();
            assert!(crashed.is_err());
        });

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
        assert!(store.load("github_user_ssh_signing_key", &ResourceIdentity::new("42")).is_err());
    }

    #[test]
    fn save_rejects_empty_kind() {
        let store = MemoryStateStore::new();
        let err = store.save(&observed("", "1")).unwrap_err();
        assert!(matches!(err, StateStoreError::InvalidState("kind is empty")));
    }

    #[test]
    fn json_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let a = observed("github_organization_webhook", "7");
        let b = observed("github_repository_code_scanning", "octo:hello");
        {
            let store = JsonFileStateStore::new(&path);
            store.save(&a).unwrap();
            store.save(&b).unwrap();
            store.clear(&a.kind, &a.identity).unwrap();
        }

        let reopened = JsonFileStateStore::new(&path);
        assert!(reopened.load(&a.kind, &a.identity).unwrap().is_none());
        assert_eq!(reopened.load(&b.kind, &b.identity).unwrap(), Some(b));
        assert!(!path.with_file_name(".state.json.tmp").exists());
    }

    #[test]
    fn json_file_store_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, br#"{"format_version": 99, "resources": {}}"#).unwrap();

        let store = JsonFileStateStore::new(&path);
        let err = store
            .load("github_organization_webhook", &ResourceIdentity::new("1"))
            .unwrap_err();
        assert!(matches!(err, StateStoreError::InvalidState(_)));
    }
}
