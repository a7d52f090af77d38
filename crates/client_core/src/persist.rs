//! Small key/value store that survives restarts: guest usage, pending referral
//! code, pending landing link and the signed-in identity.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::debug;
use url::Url;

pub const GUEST_USAGE_KEY: &str = "guestUsageCount";
pub const REFERRAL_CODE_KEY: &str = "referralCode";
pub const PENDING_LANDING_URL_KEY: &str = "pendingLandingUrl";
pub const SESSION_USER_KEY: &str = "sessionUserId";
pub const SESSION_EMAIL_KEY: &str = "sessionEmail";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write state file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("state file '{path}' is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait PersistedState: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistError>;
    fn clear(&self, key: &str) -> Result<(), PersistError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryState {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistedState for MemoryState {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), PersistError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten in full on every change.
#[derive(Debug)]
pub struct FileState {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileState {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| PersistError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(PersistError::Io { path, source }),
        };
        debug!(path = %path.display(), keys = entries.len(), "loaded client state");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), PersistError> {
        let io_error = |source| PersistError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let encoded = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded).map_err(io_error)?;
        fs::rename(&tmp, &self.path).map_err(io_error)
    }
}

impl PersistedState for FileState {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn clear(&self, key: &str) -> Result<(), PersistError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

/// Stores the `ref` query parameter of a landing link, if any.
pub fn capture_referral_from_url(
    state: &dyn PersistedState,
    link: &str,
) -> Result<Option<String>, PersistError> {
    let Ok(parsed) = Url::parse(link) else {
        return Ok(None);
    };
    let code = parsed
        .query_pairs()
        .find(|(key, _)| key == "ref")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if let Some(code) = &code {
        state.set(REFERRAL_CODE_KEY, code)?;
    }
    Ok(code)
}

pub fn pending_referral_code(state: &dyn PersistedState) -> Option<String> {
    state
        .get(REFERRAL_CODE_KEY)
        .filter(|code| !code.trim().is_empty())
}

pub fn guest_usage(state: &dyn PersistedState) -> u32 {
    state
        .get(GUEST_USAGE_KEY)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(0)
}

pub fn stash_landing_url(state: &dyn PersistedState, link: &str) -> Result<(), PersistError> {
    state.set(PENDING_LANDING_URL_KEY, link.trim())
}

pub fn take_landing_url(state: &dyn PersistedState) -> Result<Option<String>, PersistError> {
    let link = state
        .get(PENDING_LANDING_URL_KEY)
        .filter(|link| !link.is_empty());
    if link.is_some() {
        state.clear(PENDING_LANDING_URL_KEY)?;
    }
    Ok(link)
}
