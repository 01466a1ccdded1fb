//! Committed graph state.
//!
//! The registry and the snapshot are two JSON documents committed together.
//! A commit writes both to temporary files first and only then renames them
//! into place, so a failed write leaves the previous pair untouched. The
//! previous registry is kept aside until the snapshot rename succeeds and is
//! put back if it fails, so the pair on disk always comes from one commit.
//!
//! Readers never see a half-built state: the aggregator builds a new
//! [`GraphState`] off to the side and swaps it into [`SharedGraph`] only after
//! the store has accepted it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cohort_core::{GraphSnapshot, GraphState, Registry};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{Error, Result};

pub const REGISTRY_FILE: &str = "registry.json";
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// Durable storage for the registry and snapshot.
pub trait GraphStore: Send + Sync + 'static {
    /// Load the last committed state. A store that has never been committed
    /// to yields an empty state.
    fn load(&self) -> Result<GraphState>;

    /// Durably replace the committed state with `state`.
    fn commit(&self, state: &GraphState) -> Result<()>;
}

/// Two JSON documents in a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    registry_path: PathBuf,
    snapshot_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(registry_path: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
            snapshot_path: snapshot_path.into(),
        }
    }

    /// `registry.json` and `snapshot.json` under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(REGISTRY_FILE), dir.join(SNAPSHOT_FILE))
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }
}

fn read_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found, starting empty", path.display());
            return Ok(T::default());
        }
        Err(e) => return Err(Error::persistence(path, e)),
    };
    serde_json::from_str(&contents).map_err(|source| Error::CorruptDocument {
        path: path.to_path_buf(),
        source,
    })
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".prev")
}

/// Best-effort removal of leftovers from a failed commit.
fn discard<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn write_temp<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
    }
    let tmp = temp_path(path);
    let contents = serde_json::to_string_pretty(value).map_err(cohort_core::Error::from)?;
    fs::write(&tmp, contents).map_err(|e| Error::persistence(&tmp, e))?;
    Ok(tmp)
}

impl GraphStore for JsonFileStore {
    fn load(&self) -> Result<GraphState> {
        let registry: Registry = read_document(&self.registry_path)?;
        let snapshot: GraphSnapshot = read_document(&self.snapshot_path)?;
        info!(
            "Loaded graph state: {} registered identities, {} members, last updated {}",
            registry.len(),
            snapshot.members.len(),
            snapshot.last_updated
        );
        Ok(GraphState { registry, snapshot })
    }

    fn commit(&self, state: &GraphState) -> Result<()> {
        let registry_tmp = write_temp(&self.registry_path, &state.registry)?;
        let snapshot_tmp = match write_temp(&self.snapshot_path, &state.snapshot) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&registry_tmp);
                return Err(e);
            }
        };

        let backup = backup_path(&self.registry_path);
        let had_previous = match fs::copy(&self.registry_path, &backup) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                discard(&[&registry_tmp, &snapshot_tmp, &backup]);
                return Err(Error::persistence(&backup, e));
            }
        };

        if let Err(e) = fs::rename(&registry_tmp, &self.registry_path) {
            discard(&[&registry_tmp, &snapshot_tmp, &backup]);
            return Err(Error::persistence(&self.registry_path, e));
        }

        if let Err(e) = fs::rename(&snapshot_tmp, &self.snapshot_path) {
            // The new registry must not sit next to the old snapshot.
            let restored = if had_previous {
                fs::rename(&backup, &self.registry_path)
            } else {
                fs::remove_file(&self.registry_path)
            };
            if let Err(restore) = restored {
                warn!(
                    "Could not roll back {}: {}",
                    self.registry_path.display(),
                    restore
                );
            }
            discard(&[&snapshot_tmp, &backup]);
            return Err(Error::persistence(&self.snapshot_path, e));
        }
        discard(&[&backup]);

        debug!(
            "Committed {} and {}",
            self.registry_path.display(),
            self.snapshot_path.display()
        );
        Ok(())
    }
}

/// In-memory store, for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: Mutex<Option<GraphState>>,
    commits: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already-committed state.
    pub fn with_state(state: GraphState) -> Self {
        Self {
            committed: Mutex::new(Some(state)),
            ..Default::default()
        }
    }

    /// Make every subsequent commit fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> Option<GraphState> {
        self.committed.lock().clone()
    }
}

impl GraphStore for MemoryStore {
    fn load(&self) -> Result<GraphState> {
        Ok(self.committed.lock().clone().unwrap_or_default())
    }

    fn commit(&self, state: &GraphState) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::persistence(
                "memory",
                std::io::Error::other("commit rejected"),
            ));
        }
        *self.committed.lock() = Some(state.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The state readers see: always the last successfully committed one.
#[derive(Debug, Default)]
pub struct SharedGraph {
    current: RwLock<Arc<GraphState>>,
}

impl SharedGraph {
    pub fn new(state: GraphState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
        }
    }

    /// A consistent view of the current state.
    pub fn load(&self) -> Arc<GraphState> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, state: impl Into<Arc<GraphState>>) {
        *self.current.write() = state.into();
    }
}
