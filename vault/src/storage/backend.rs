//! Byte storage for sealed artifacts.
//!
//! A `Backend` stores opaque blobs under `(directory, name)` pairs, where the
//! directory is a collection name. `DirBackend` maps these onto a directory
//! tree on disk; `MemoryBackend` keeps them in a map and counts every call so
//! tests can assert on I/O behavior.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Errors returned by a backend.
#[derive(Debug)]
pub enum BackendError {
    /// The named blob does not exist.
    NotFound(String),
    /// Any other I/O failure.
    Io(std::io::Error),
    /// Fault injected by a test backend.
    InjectedFault(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "not found: {name}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Blob storage keyed by directory and file name.
///
/// # Invariants
///
/// - `read` returns the bytes of the last completed `write` of that name.
/// - `write` replaces a blob atomically: a reader never sees a partial blob.
/// - `list` of a directory that was never written is empty, not an error.
pub trait Backend: Send + Sync {
    /// Names of every blob in `dir`, sorted.
    fn list(&self, dir: &str) -> Result<Vec<String>, BackendError>;

    /// Read a whole blob. A missing blob is `BackendError::NotFound`.
    fn read(&self, dir: &str, name: &str) -> Result<Vec<u8>, BackendError>;

    /// Create or replace a blob.
    fn write(&self, dir: &str, name: &str, data: &[u8]) -> Result<(), BackendError>;

    /// Delete a blob. A missing blob is `BackendError::NotFound`.
    fn remove(&self, dir: &str, name: &str) -> Result<(), BackendError>;
}

/// Files under a root directory, one subdirectory per collection.
#[derive(Debug)]
pub struct DirBackend {
    root: PathBuf,
}

impl DirBackend {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn map_err(e: std::io::Error, name: &str) -> BackendError {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackendError::NotFound(name.to_owned())
        } else {
            BackendError::Io(e)
        }
    }
}

impl Backend for DirBackend {
    fn list(&self, dir: &str) -> Result<Vec<String>, BackendError> {
        let entries = match std::fs::read_dir(self.root.join(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackendError::Io(e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(BackendError::Io)?;
            if !entry.file_type().map_err(BackendError::Io)?.is_file() {
                continue;
            }
            // Names are always ASCII; anything else is not ours.
            match entry.file_name().into_string() {
                Ok(name) if !name.ends_with(".tmp") => names.push(name),
                _ => {}
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    fn read(&self, dir: &str, name: &str) -> Result<Vec<u8>, BackendError> {
        std::fs::read(self.root.join(dir).join(name)).map_err(|e| Self::map_err(e, name))
    }

    fn write(&self, dir: &str, name: &str, data: &[u8]) -> Result<(), BackendError> {
        let dir_path = self.root.join(dir);
        std::fs::create_dir_all(&dir_path).map_err(BackendError::Io)?;

        // Write-then-rename so a crash never leaves a torn blob behind.
        let tmp_path = dir_path.join(format!("{name}.tmp"));
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp_path).map_err(BackendError::Io)?;
            file.write_all(data).map_err(BackendError::Io)?;
            file.sync_all().map_err(BackendError::Io)?;
        }
        std::fs::rename(&tmp_path, dir_path.join(name)).map_err(BackendError::Io)
    }

    fn remove(&self, dir: &str, name: &str) -> Result<(), BackendError> {
        std::fs::remove_file(self.root.join(dir).join(name)).map_err(|e| Self::map_err(e, name))
    }
}

/// Statistics about backend calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackendStats {
    pub lists: u64,
    pub reads: u64,
    pub writes: u64,
    pub removes: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    blobs: BTreeMap<(String, String), Vec<u8>>,
    stats: BackendStats,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory backend for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far.
    #[must_use]
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn stats(&self) -> BackendStats {
        self.state.lock().expect("lock poisoned").stats
    }

    /// Zero the call counters.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn reset_stats(&self) {
        self.state.lock().expect("lock poisoned").stats = BackendStats::default();
    }

    /// Make every subsequent read fail.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_reads = fail;
    }

    /// Make every subsequent write and remove fail.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_writes = fail;
    }
}

impl Backend for MemoryBackend {
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn list(&self, dir: &str) -> Result<Vec<String>, BackendError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.stats.lists += 1;
        Ok(state
            .blobs
            .keys()
            .filter(|(d, _)| d == dir)
            .map(|(_, name)| name.as_str().to_owned())
            .collect())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn read(&self, dir: &str, name: &str) -> Result<Vec<u8>, BackendError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.stats.reads += 1;
        if state.fail_reads {
            return Err(BackendError::InjectedFault(format!("read {dir}/{name}")));
        }
        state
            .blobs
            .get(&(dir.to_owned(), name.to_owned()))
            .map(|blob| blob.as_slice().to_vec())
            .ok_or_else(|| BackendError::NotFound(name.to_owned()))
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn write(&self, dir: &str, name: &str, data: &[u8]) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.stats.writes += 1;
        if state.fail_writes {
            return Err(BackendError::InjectedFault(format!("write {dir}/{name}")));
        }
        state
            .blobs
            .insert((dir.to_owned(), name.to_owned()), data.to_vec());
        Ok(())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn remove(&self, dir: &str, name: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.stats.removes += 1;
        if state.fail_writes {
            return Err(BackendError::InjectedFault(format!("remove {dir}/{name}")));
        }
        state
            .blobs
            .remove(&(dir.to_owned(), name.to_owned()))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(name.to_owned()))
    }
}
