//! Watched collections
//!
//! A collection only has to produce a [`Fingerprint`]: a row count plus the
//! highest value of some monotonic modification marker. Producing one must
//! not scale with the collection size.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;

/// Cheap summary of a collection's state
///
/// Two equal fingerprints mean "probably unchanged"; the fingerprint cannot
/// say which row changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Collection the fingerprint was taken from
    pub collection: String,
    /// Number of rows (or bytes, for file-backed collections)
    pub count: u64,
    /// Latest modification marker, compared for equality only
    pub marker: String,
}

impl Fingerprint {
    pub fn new(collection: impl Into<String>, count: u64, marker: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            count,
            marker: marker.into(),
        }
    }
}

/// Something the change poller can watch
///
/// `fingerprint` is synchronous and may block; the poller runs it on the
/// blocking pool under a timeout.
pub trait Collection: Send + Sync + 'static {
    /// Collection name, also used as the change topic
    fn name(&self) -> &str;

    /// Compute the current fingerprint
    fn fingerprint(&self) -> io::Result<Fingerprint>;
}

#[derive(Debug, Default)]
struct Rows {
    rows: BTreeMap<String, serde_json::Value>,
    marker: u64,
}

/// In-memory collection with a modification counter
///
/// Stands in for a table that other tools write to directly.
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    inner: Mutex<Rows>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Rows::default()),
        }
    }

    /// Insert or replace a row
    pub fn upsert(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut inner = self.inner.lock();
        inner.rows.insert(key.into(), value);
        inner.marker += 1;
    }

    /// Remove a row, returning whether it existed
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.rows.remove(key).is_some();
        if removed {
            inner.marker += 1;
        }
        removed
    }

    /// Read a row
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().rows.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> io::Result<Fingerprint> {
        let inner = self.inner.lock();
        Ok(Fingerprint::new(
            self.name.as_str(),
            inner.rows.len() as u64,
            inner.marker.to_string(),
        ))
    }
}

/// Collection backed by a single file
///
/// Fingerprint is the file length plus its modification time in
/// nanoseconds. A missing file is a read failure, not a change.
#[derive(Debug, Clone)]
pub struct FileCollection {
    name: String,
    path: PathBuf,
}

impl FileCollection {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Collection for FileCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> io::Result<Fingerprint> {
        let metadata = std::fs::metadata(&self.path)?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Fingerprint::new(
            self.name.as_str(),
            metadata.len(),
            modified.as_nanos().to_string(),
        ))
    }
}
