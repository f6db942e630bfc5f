use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::session::PersistedViewerState;

/// Stable identity of a book, derived from its directory path, so persisted
/// state survives across sessions without storing paths as keys.
pub type BookId = Uuid;

static BOOK_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("8f1d2c3a-5b6e-4f70-9a81-02c3d4e5f607").expect("valid namespace UUID")
});

pub fn book_id_for_path(path: &Path) -> BookId {
    let resolved = match path.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) if path.is_absolute() => path.to_path_buf(),
        Err(_) => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    };
    Uuid::new_v5(&BOOK_NAMESPACE, resolved.to_string_lossy().as_bytes())
}

/// Injected persistence capability for the navigation state. Both methods
/// are best-effort from the session's point of view: failures are logged
/// and never block a transition.
pub trait StateStore: Send + Sync {
    fn load(&self, book: &BookId) -> Result<Option<PersistedViewerState>>;
    fn save(&self, book: &BookId, state: &PersistedViewerState) -> Result<()>;
}

/// One JSON file per book under a root directory.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {}", root.display()))?;
        Ok(Self { root })
    }

    fn state_path(&self, book: &BookId) -> PathBuf {
        self.root.join(format!("{book}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, book: &BookId) -> Result<Option<PersistedViewerState>> {
        let path = self.state_path(book);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        let state = serde_json::from_str(&text)
            .with_context(|| format!("failed to decode state file {}", path.display()))?;
        Ok(Some(state))
    }

    fn save(&self, book: &BookId, state: &PersistedViewerState) -> Result<()> {
        let path = self.state_path(book);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, payload)
            .with_context(|| format!("failed to write temp state file {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace state file {}", path.display()))?;
        Ok(())
    }
}

pub struct MemoryStateStore {
    inner: Mutex<HashMap<BookId, PersistedViewerState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, book: &BookId) -> Result<Option<PersistedViewerState>> {
        Ok(self.inner.lock().get(book).cloned())
    }

    fn save(&self, book: &BookId, state: &PersistedViewerState) -> Result<()> {
        self.inner.lock().insert(*book, state.clone());
        Ok(())
    }
}
