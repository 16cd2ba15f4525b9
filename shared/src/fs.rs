//! File-system capability for mission state persistence.
//!
//! The mission core only needs whole-file reads, overwriting and appending
//! writes, renames and size queries. Paths are absolute-looking names such as
//! `/time0`; each implementation decides where they actually live.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// File operations consumed by the mission core.
pub trait FileSystem: Send + Sync {
    /// Read the whole file.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Create or truncate the file and write `data` to it.
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;

    /// Append `data`, creating the file if needed.
    fn append(&self, path: &str, data: &[u8]) -> io::Result<()>;

    /// Move a file, replacing the destination if it exists.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Size of the file in bytes.
    fn size(&self, path: &str) -> io::Result<u64>;
}

/// Read the first `N` bytes of a file.
///
/// Fails with [`io::ErrorKind::UnexpectedEof`] when the file is shorter than `N`.
pub fn read_exact<const N: usize>(fs: &dyn FileSystem, path: &str) -> io::Result<[u8; N]> {
    let data = fs.read(path)?;
    if data.len() < N {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{path}: expected {N} bytes, found {}", data.len()),
        ));
    }

    let mut buffer = [0u8; N];
    buffer.copy_from_slice(&data[..N]);
    Ok(buffer)
}

/// File system rooted in a host directory.
///
/// `/time0` maps to `<root>/time0`. Parent directories are created on write.
#[derive(Debug, Clone)]
pub struct DirFileSystem {
    root_path: PathBuf,
}

impl DirFileSystem {
    /// Create a file system rooted at `root_path`.
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root directory.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root_path.join(path.trim_start_matches('/'))
    }

    fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl FileSystem for DirFileSystem {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path)).inspect_err(|e| debug!("Unable to read {path}: {e}"))
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let resolved = self.resolve(path);
        Self::ensure_parent(&resolved)
            .and_then(|()| std::fs::write(&resolved, data))
            .inspect_err(|e| warn!("Unable to write {}: {e}", resolved.display()))
    }

    fn append(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let resolved = self.resolve(path);
        Self::ensure_parent(&resolved)
            .and_then(|()| {
                let mut file = OpenOptions::new().create(true).append(true).open(&resolved)?;
                file.write_all(data)
            })
            .inspect_err(|e| warn!("Unable to append to {}: {e}", resolved.display()))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        std::fs::rename(self.resolve(from), self.resolve(to))
            .inspect_err(|e| warn!("Unable to rename {from} to {to}: {e}"))
    }

    fn size(&self, path: &str) -> io::Result<u64> {
        Ok(std::fs::metadata(self.resolve(path))?.len())
    }
}

/// In-memory file system for tests and simulation.
///
/// Writes to paths registered with [`fail_writes`](Self::fail_writes) fail with
/// an I/O error until [`heal`](Self::heal) is called.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file directly, bypassing failure injection.
    pub fn insert(&self, path: &str, data: &[u8]) {
        self.files().insert(path.to_string(), data.to_vec());
    }

    /// Current content of a file, if present.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files().get(path).cloned()
    }

    /// Remove a file.
    pub fn remove(&self, path: &str) {
        self.files().remove(path);
    }

    /// Make every subsequent write to `path` fail.
    pub fn fail_writes(&self, path: &str) {
        self.failing().insert(path.to_string());
    }

    /// Stop failing writes to `path`.
    pub fn heal(&self, path: &str) {
        self.failing().remove(path);
    }

    fn files(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failing(&self) -> MutexGuard<'_, HashSet<String>> {
        self.failing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self, path: &str) -> io::Result<()> {
        if self.failing().contains(path) {
            debug!("Injected write failure on {path}");
            return Err(io::Error::other(format!("injected write failure: {path}")));
        }
        Ok(())
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {path}"))
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files().get(path).cloned().ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        self.check_writable(path)?;
        self.files().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn append(&self, path: &str, data: &[u8]) -> io::Result<()> {
        self.check_writable(path)?;
        self.files()
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.check_writable(to)?;
        let mut files = self.files();
        let data = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    fn size(&self, path: &str) -> io::Result<u64> {
        self.files()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| not_found(path))
    }
}
