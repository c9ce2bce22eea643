//! Where snapshot bytes live.
//!
//! A [`SnapshotStore`] is a keyed blob store. Implementations report plain
//! [`std::io::Error`]s; the [`SnapshotManager`](crate::snapshot::SnapshotManager)
//! decides which error kinds are worth retrying.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::snapshot::SnapshotKey;

/// Keyed storage for encoded snapshots.
pub trait SnapshotStore {
    /// Store `bytes` under `key`, replacing any previous value.
    fn put(&mut self, key: &SnapshotKey, bytes: &[u8]) -> io::Result<()>;

    /// Fetch the bytes stored under `key`. A missing key is
    /// [`io::ErrorKind::NotFound`].
    fn get(&self, key: &SnapshotKey) -> io::Result<Vec<u8>>;

    /// Keys stored for `scenario`, in ascending tick order.
    fn list(&self, scenario: &str) -> io::Result<Vec<SnapshotKey>>;
}

// ---------------------------------------------------------------------------
// DirectoryStore
// ---------------------------------------------------------------------------

/// One JSON file per snapshot under `root/{scenario}/tick_{tick:08}.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written snapshot.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `key`.
    pub fn path_of(&self, key: &SnapshotKey) -> PathBuf {
        self.root.join(&key.scenario).join(key.file_name())
    }
}

impl SnapshotStore for DirectoryStore {
    fn put(&mut self, key: &SnapshotKey, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)
    }

    fn get(&self, key: &SnapshotKey) -> io::Result<Vec<u8>> {
        fs::read(self.path_of(key))
    }

    fn list(&self, scenario: &str) -> io::Result<Vec<SnapshotKey>> {
        let dir = self.root.join(scenario);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(key) = name
                .to_str()
                .and_then(|n| SnapshotKey::from_file_name(scenario, n))
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store backed by an ordered map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<SnapshotKey, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SnapshotStore for MemoryStore {
    fn put(&mut self, key: &SnapshotKey, bytes: &[u8]) -> io::Result<()> {
        self.entries.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &SnapshotKey) -> io::Result<Vec<u8>> {
        self.entries.get(key).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no snapshot stored under {key}"))
        })
    }

    fn list(&self, scenario: &str) -> io::Result<Vec<SnapshotKey>> {
        Ok(self
            .entries
            .keys()
            .filter(|k| k.scenario == scenario)
            .cloned()
            .collect())
    }
}
