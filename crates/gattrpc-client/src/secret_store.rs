use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::StoreError;

/// Backend key holding the client identity.
pub const CLIENT_ID_KEY: &str = "client_id";

/// Backend key holding the `deviceIdHex -> secretHex` map.
pub const SECRETS_KEY: &str = "hmac_secrets";

const CLIENT_ID_LEN: usize = 16;

/// String key/value persistence used by [`SecretStore`].
pub trait KeyValueBackend: Send + Sync {
    /// Load a value. Unreadable values count as absent.
    fn load(&self, key: &str) -> Option<String>;

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Volatile backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an entry.
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.lock().insert(key.to_string(), value.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn load(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash never leaves a half-written value behind.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueBackend for FileBackend {
    fn load(&self, key: &str) -> Option<String> {
        let path = self.path(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable store entry");
                None
            }
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let path = self.path(key);
        let tmp = self.dir.join(format!(".{key}.tmp"));
        std::fs::write(&tmp, value).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_err(&path))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

/// Shared secret bytes. Redacted in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted:{} bytes>)", self.0.len())
    }
}

/// Per-installation client identity: 16 random bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId([u8; CLIENT_ID_LEN]);

impl ClientId {
    /// Generate a fresh identity from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CLIENT_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse the persisted form (32 hex characters).
    pub fn from_hex(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.len() != CLIENT_ID_LEN * 2 {
            return None;
        }
        let mut bytes = [0u8; CLIENT_ID_LEN];
        hex::decode_to_slice(text, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.to_hex())
    }
}

/// Client identity and per-device shared secrets.
///
/// Missing or corrupt persisted values are treated as "not yet
/// established": a bad client id is regenerated and a bad secret map reads
/// as empty.
pub struct SecretStore {
    backend: Box<dyn KeyValueBackend>,
    write_lock: Mutex<()>,
}

impl SecretStore {
    pub fn new(backend: impl KeyValueBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_lock: Mutex::new(()),
        }
    }

    /// Store backed by memory only.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Store backed by files under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        Self::new(FileBackend::new(dir))
    }

    /// The client identity, created and persisted on first access.
    pub fn client_id(&self) -> Result<ClientId, StoreError> {
        let _guard = self.lock_writes();
        if let Some(id) = self
            .backend
            .load(CLIENT_ID_KEY)
            .and_then(|text| ClientId::from_hex(&text))
        {
            return Ok(id);
        }

        let id = ClientId::generate();
        self.backend.save(CLIENT_ID_KEY, &id.to_hex())?;
        tracing::info!(client_id = %id, "generated client identity");
        Ok(id)
    }

    pub fn has_secret(&self, device_id: &[u8]) -> bool {
        self.get_secret(device_id).is_some()
    }

    pub fn get_secret(&self, device_id: &[u8]) -> Option<Secret> {
        let secrets = self.load_secrets();
        let text = secrets.get(&hex::encode(device_id))?;
        match hex::decode(text) {
            Ok(bytes) if !bytes.is_empty() => Some(Secret(bytes)),
            Ok(_) => None,
            Err(_) => {
                tracing::warn!(device_id = %hex::encode(device_id), "ignoring corrupt stored secret");
                None
            }
        }
    }

    /// Store a secret for `device_id`, or delete it when `secret` is `None`
    /// or empty.
    pub fn set_secret(&self, device_id: &[u8], secret: Option<&[u8]>) -> Result<(), StoreError> {
        let _guard = self.lock_writes();
        let mut secrets = self.load_secrets();
        let key = hex::encode(device_id);
        match secret.filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => {
                secrets.insert(key, hex::encode(bytes));
            }
            None => {
                if secrets.remove(&key).is_none() {
                    return Ok(());
                }
            }
        }
        self.backend
            .save(SECRETS_KEY, &serde_json::to_string(&secrets)?)
    }

    /// Hex ids of all devices with a stored secret.
    pub fn device_ids(&self) -> Vec<String> {
        self.load_secrets().into_keys().collect()
    }

    /// Forget every stored secret. The client identity is kept.
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock_writes();
        self.backend.remove(SECRETS_KEY)
    }

    fn load_secrets(&self) -> BTreeMap<String, String> {
        let Some(text) = self.backend.load(SECRETS_KEY) else {
            return BTreeMap::new();
        };
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect(),
            _ => {
                tracing::warn!("stored secret map is corrupt, treating as empty");
                BTreeMap::new()
            }
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("devices", &self.device_ids().len())
            .finish()
    }
}
