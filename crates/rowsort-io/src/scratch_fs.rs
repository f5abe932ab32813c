//! Reference-counted scratch storage (`scratch://`) for spilled chunks.
//!
//! A file lands in one of two tiers:
//! - RAM, when written without the force-disk hint and it fits both the
//!   per-file and the total budget (`ROWSORT_CACHE_CAPACITY_PER_FILE`,
//!   `ROWSORT_CACHE_CAPACITY`);
//! - a private directory otherwise.
//!
//! A path lives as long as some [`ScratchGuard`] holds it. Dropping an owned
//! `ScratchFs` removes its directory.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use rowsort_types::error::Result;

use crate::vfs::{ReadableFile, WritableFile};

const SCHEME: &str = "scratch://";

static NEXT_ROOT_ID: AtomicU64 = AtomicU64::new(0);

static GLOBAL_SCRATCH_FS: OnceLock<Arc<ScratchFs>> = OnceLock::new();

/// The process-wide scratch store, created on first use.
pub fn global_scratch_fs() -> Result<Arc<ScratchFs>> {
    if let Some(fs) = GLOBAL_SCRATCH_FS.get() {
        return Ok(fs.clone());
    }
    let fs = Arc::new(ScratchFs::new()?);
    Ok(GLOBAL_SCRATCH_FS.get_or_init(|| fs).clone())
}

/// Budget for the RAM tier.
struct MemoryTier {
    files: Mutex<HashMap<String, Arc<[u8]>>>,
    used: AtomicUsize,
    capacity: usize,
    capacity_per_file: usize,
}

impl MemoryTier {
    /// Keep `data` if it fits, otherwise hand it back.
    fn admit(&self, path: &str, data: Vec<u8>) -> std::result::Result<(), Vec<u8>> {
        let size = data.len();
        if size > self.capacity_per_file {
            return Err(data);
        }
        let reserved = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                (used + size <= self.capacity).then_some(used + size)
            });
        if reserved.is_err() {
            return Err(data);
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::from(data));
        Ok(())
    }

    fn get(&self, path: &str) -> Option<Arc<[u8]>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    fn evict(&self, path: &str) {
        if let Some(data) = self.files.lock().unwrap().remove(path) {
            self.used.fetch_sub(data.len(), Ordering::Relaxed);
        }
    }
}

/// Ephemeral file store shared by every container of a factory.
pub struct ScratchFs {
    root: PathBuf,
    owns_root: bool,
    next_path: AtomicU64,
    refcounts: Mutex<HashMap<String, usize>>,
    memory: MemoryTier,
}

impl ScratchFs {
    /// Store under the system temp directory with the configured budgets.
    pub fn new() -> Result<Self> {
        Self::with_limits(
            rowsort_config::get_cache_capacity(),
            rowsort_config::get_cache_capacity_per_file(),
        )
    }

    /// Store under the system temp directory with explicit RAM budgets.
    pub fn with_limits(capacity: usize, capacity_per_file: usize) -> Result<Self> {
        let root = std::env::temp_dir().join(format!(
            "rowsort_scratch_{}_{}",
            std::process::id(),
            NEXT_ROOT_ID.fetch_add(1, Ordering::Relaxed)
        ));
        Self::build(root, true, capacity, capacity_per_file)
    }

    /// Store in a caller-owned directory, left in place on drop.
    pub fn with_root(root: PathBuf) -> Result<Self> {
        Self::build(
            root,
            false,
            rowsort_config::get_cache_capacity(),
            rowsort_config::get_cache_capacity_per_file(),
        )
    }

    fn build(root: PathBuf, owns_root: bool, capacity: usize, capacity_per_file: usize) -> Result<Self> {
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), capacity, capacity_per_file, "scratch store created");
        Ok(ScratchFs {
            root,
            owns_root,
            next_path: AtomicU64::new(0),
            refcounts: Mutex::new(HashMap::new()),
            memory: MemoryTier {
                files: Mutex::new(HashMap::new()),
                used: AtomicUsize::new(0),
                capacity,
                capacity_per_file,
            },
        })
    }

    /// A fresh `scratch://N` path. Nothing is created yet.
    pub fn alloc_path(&self) -> String {
        format!("{}{}", SCHEME, self.next_path.fetch_add(1, Ordering::Relaxed))
    }

    fn retain(&self, path: &str) {
        *self.refcounts.lock().unwrap().entry(path.to_string()).or_insert(0) += 1;
    }

    /// Drop one reference; the last one deletes the file from both tiers.
    fn release(&self, path: &str) {
        let mut refcounts = self.refcounts.lock().unwrap();
        let Some(count) = refcounts.get_mut(path) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        refcounts.remove(path);
        self.memory.evict(path);
        match fs::remove_file(self.disk_path(path)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path, error = %e, "failed to remove scratch file"),
        }
    }

    /// Paths still held by a guard.
    pub fn live_files(&self) -> usize {
        self.refcounts.lock().unwrap().len()
    }

    /// Bytes held in the RAM tier.
    pub fn total_cached_bytes(&self) -> usize {
        self.memory.used.load(Ordering::Relaxed)
    }

    pub fn in_memory_count(&self) -> usize {
        self.memory.files.lock().unwrap().len()
    }

    pub fn on_disk_count(&self) -> Result<usize> {
        Ok(fs::read_dir(&self.root)?.count())
    }

    fn disk_path(&self, path: &str) -> PathBuf {
        self.root.join(path.strip_prefix(SCHEME).unwrap_or(path))
    }

    /// Open `path` for writing.
    ///
    /// With `force_disk` the writer streams to the disk tier. Otherwise it
    /// buffers and picks the tier on [`WritableFile::flush_all`]; a writer
    /// dropped before that leaves nothing behind.
    pub fn open_scratch_write(
        self: &Arc<Self>,
        path: &str,
        force_disk: bool,
    ) -> Result<Box<dyn WritableFile>> {
        let writer = if force_disk {
            ScratchWriter::Disk(BufWriter::new(File::create(self.disk_path(path))?))
        } else {
            ScratchWriter::Pending {
                path: path.to_string(),
                buffer: Vec::new(),
                fs: self.clone(),
            }
        };
        Ok(Box::new(writer))
    }

    /// Open a flushed scratch file for reading.
    pub fn open_read(&self, path: &str) -> Result<Box<dyn ReadableFile>> {
        let reader = match self.memory.get(path) {
            Some(data) => ScratchReader::Memory(Cursor::new(data)),
            None => ScratchReader::Disk(BufReader::new(File::open(self.disk_path(path))?)),
        };
        Ok(Box::new(reader))
    }
}

impl Drop for ScratchFs {
    fn drop(&mut self) {
        if self.owns_root {
            let _ = fs::remove_dir_all(&self.root);
        }
    }
}

enum ScratchReader {
    Memory(Cursor<Arc<[u8]>>),
    Disk(BufReader<File>),
}

impl Read for ScratchReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ScratchReader::Memory(cursor) => cursor.read(buf),
            ScratchReader::Disk(file) => file.read(buf),
        }
    }
}

enum ScratchWriter {
    /// Tier not chosen yet.
    Pending {
        path: String,
        buffer: Vec<u8>,
        fs: Arc<ScratchFs>,
    },
    Disk(BufWriter<File>),
    Done,
}

impl Write for ScratchWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ScratchWriter::Pending { buffer, .. } => {
                buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
            ScratchWriter::Disk(file) => file.write(buf),
            ScratchWriter::Done => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scratch file already flushed",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ScratchWriter::Disk(file) => file.flush(),
            _ => Ok(()),
        }
    }
}

impl WritableFile for ScratchWriter {
    fn flush_all(&mut self) -> Result<()> {
        match std::mem::replace(self, ScratchWriter::Done) {
            ScratchWriter::Pending { path, buffer, fs } => {
                if let Err(data) = fs.memory.admit(&path, buffer) {
                    tracing::debug!(path = %path, bytes = data.len(), "scratch file written to disk");
                    let mut file = BufWriter::new(File::create(fs.disk_path(&path))?);
                    file.write_all(&data)?;
                    file.flush()?;
                }
            }
            ScratchWriter::Disk(mut file) => {
                file.flush()?;
                *self = ScratchWriter::Disk(file);
            }
            ScratchWriter::Done => {}
        }
        Ok(())
    }
}

/// Keeps a scratch path alive. Cloning adds a reference; the file is
/// deleted when the last guard drops.
pub struct ScratchGuard {
    path: String,
    fs: Arc<ScratchFs>,
}

impl ScratchGuard {
    pub fn new(path: String, fs: Arc<ScratchFs>) -> Self {
        fs.retain(&path);
        ScratchGuard { path, fs }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fs(&self) -> &Arc<ScratchFs> {
        &self.fs
    }
}

impl Clone for ScratchGuard {
    fn clone(&self) -> Self {
        ScratchGuard::new(self.path.clone(), self.fs.clone())
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        self.fs.release(&self.path);
    }
}
