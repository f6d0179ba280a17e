//! Secret storage backing.
//!
//! The credential store sits on a pluggable `SecretStore`. The OS
//! keychain implementation lives with the presentation shell; this
//! module ships a JSON-file backend (non-keychain platforms and dev
//! builds) and an in-memory backend for tests and previews.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Secret store unavailable: {0}")]
    Backend(String),
    #[error("Malformed secret payload: {0}")]
    Decode(String),
}

/// Key/value secure storage. All operations are synchronous and must be
/// safe to call from concurrently polling adapters.
pub trait SecretStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn has(&self, key: &str) -> Result<bool, StorageError>;
}

/// Single-file JSON backend. Values are base64 so arbitrary bytes
/// survive the JSON round-trip. File and parent directory are created
/// with owner-only permissions.
pub struct FileSecretStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileSecretStore {
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| StorageError::Decode(e.to_string()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(
                        parent,
                        std::fs::Permissions::from_mode(0o700),
                    );
                }
            }
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| StorageError::Backend(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), BASE64.encode(value));
        self.persist(&entries)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(encoded) => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|e| StorageError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().contains_key(key))
    }
}

/// In-memory backend for tests and sample-data previews.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");

        let store = FileSecretStore::open(path.clone()).unwrap();
        store.put("tokens-github", b"{\"accessToken\":\"gho_x\"}").unwrap();
        assert!(store.has("tokens-github").unwrap());

        // Reopen from disk
        let reopened = FileSecretStore::open(path).unwrap();
        let value = reopened.get("tokens-github").unwrap().unwrap();
        assert_eq!(value, b"{\"accessToken\":\"gho_x\"}");
    }

    #[test]
    fn file_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::open(dir.path().join("secrets.json")).unwrap();
        store.put("k", b"v").unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(!store.has("k").unwrap());
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn memory_store_basic_operations() {
        let store = MemorySecretStore::new();
        assert!(!store.has("a").unwrap());
        store.put("a", &[1, 2, 3]).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), vec![1, 2, 3]);
        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
    }
}
