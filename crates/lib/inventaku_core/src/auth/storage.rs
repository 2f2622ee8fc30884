//! Persisted session snapshot.
//!
//! A small string key/value store holding the last known identity (as JSON)
//! and the remembered login username. The snapshot is only a pre-paint hint;
//! the server's `/auth/me` answer always wins over it.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::auth::Identity;

/// Key holding the JSON-serialized [`Identity`].
pub const USER_KEY: &str = "inventaku_user";

/// Key holding the username remembered by the login form.
pub const REMEMBERED_USERNAME_KEY: &str = "inventaku_remembered_username";

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// String key/value store shaped like browser local storage.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: SessionStorage + ?Sized> SessionStorage for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// File storage
// =============================================================================

/// JSON object file, rewritten on every mutation.
///
/// A missing file reads as empty. A file that is not a JSON object is treated
/// as empty and replaced on the next write.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Default location: `<data_dir>/inventaku/session.json`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inventaku")
            .join("session.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "session file is not a JSON object, ignoring");
                Ok(Map::new())
            }
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(map)?;
        write_private(&self.path, body.as_bytes()).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write `body` to `path`, readable by the owner only. The file holds the
/// server session cookie.
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let mut file = options.open(path)?;
        // `mode` only applies on creation; tighten files left by older runs.
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(body)
    }
    #[cfg(not(unix))]
    {
        options.open(path)?.write_all(body)
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = lock(&self.guard);
        let map = self.read_all()?;
        Ok(map.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.read_all()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(&map)?;
        }
        Ok(())
    }
}

// =============================================================================
// Memory storage
// =============================================================================

/// In-process storage. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set`/`remove` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// =============================================================================
// Snapshot helpers
// =============================================================================

/// Read the stored identity.
///
/// An entry that does not parse is removed and reported as absent.
pub fn load_identity(storage: &dyn SessionStorage) -> Option<Identity> {
    let raw = match storage.get(USER_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "could not read stored identity");
            return None;
        }
    };
    match serde_json::from_str::<Identity>(&raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "stored identity is corrupt, removing it");
            if let Err(e) = storage.remove(USER_KEY) {
                warn!(error = %e, "could not remove corrupt identity");
            }
            None
        }
    }
}

pub fn save_identity(storage: &dyn SessionStorage, user: &Identity) -> Result<(), StorageError> {
    let raw = serde_json::to_string(user)?;
    storage.set(USER_KEY, &raw)?;
    debug!(user_id = %user.id, "persisted identity snapshot");
    Ok(())
}

pub fn clear_identity(storage: &dyn SessionStorage) -> Result<(), StorageError> {
    storage.remove(USER_KEY)
}

/// Store the username the login form should pre-fill next time.
pub fn remember_username(storage: &dyn SessionStorage, username: &str) -> Result<(), StorageError> {
    storage.set(REMEMBERED_USERNAME_KEY, username)
}

pub fn remembered_username(storage: &dyn SessionStorage) -> Option<String> {
    storage
        .get(REMEMBERED_USERNAME_KEY)
        .ok()
        .flatten()
        .filter(|u| !u.is_empty())
}

pub fn forget_username(storage: &dyn SessionStorage) -> Result<(), StorageError> {
    storage.remove(REMEMBERED_USERNAME_KEY)
}
