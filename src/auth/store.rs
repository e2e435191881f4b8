//! Token storage backends.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::debug;

use super::credential::Credential;
use super::error::StoreError;

/// Persists the single active credential as one opaque blob.
pub trait TokenStore {
    /// Load the stored credential. `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Credential>, StoreError>;

    /// Replace the stored credential as a whole.
    fn save(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Human readable location, used in error messages.
    fn location(&self) -> String;
}

/// JSON file store. Writes go to a temp file that is renamed over the
/// target, so readers see either the old or the new blob.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Credential>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = ?self.path, "no token store on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let credential: Credential = serde_json::from_str(&contents)?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let contents = serde_json::to_string_pretty(credential)?;

        // Fresh name next to the target, created with mode 0600 on Unix.
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = ?self.path, "token store written");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store for tests and embedding; counts writes.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    credential: Option<Credential>,
    writes: usize,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                credential: Some(credential),
                writes: 0,
            }),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    pub fn snapshot(&self) -> Option<Credential> {
        self.state().credential.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Credential>, StoreError> {
        Ok(self.state().credential.clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut state = self.state();
        state.credential = Some(credential.clone());
        state.writes += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}
