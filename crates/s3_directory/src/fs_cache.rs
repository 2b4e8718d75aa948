//! A thin wrapper over a local directory, serving both fully-present files (Buffered/Synced) and
//! sparse cache files (Cached) by name — they coexist because the state classes are disjoint.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use nix::fcntl::{flock, FlockArg};
use tracing::{info, warn};

use crate::error::{DirectoryError, Result};

/// Files created via `createTempOutput` must end in this suffix.
pub const TEMP_SUFFIX: &str = "tmp";

/// Legacy on-disk layout kept newly-created-but-not-yet-synced files under a `buffer/`
/// subdirectory; current layout keeps everything flat under the cache root. Orphans left behind
/// in that subpath by an older build are swept on open; cache files are always preserved across
/// restarts as a best-effort warm cache.
const LEGACY_BUFFER_SUBPATH: &str = "buffer";

pub struct FSCache {
    root: Utf8PathBuf,
    temp_counter: AtomicU64,
}

impl FSCache {
    pub fn new(root: Utf8PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;

        let legacy_buffer = root.join(LEGACY_BUFFER_SUBPATH);
        if legacy_buffer.exists() {
            info!(path = %legacy_buffer, "removing orphaned legacy buffer directory");
            std::fs::remove_dir_all(&legacy_buffer)?;
        }

        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn resolve_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve_path(name).exists()
    }

    pub fn file_length(&self, name: &str) -> Result<u64> {
        Ok(std::fs::metadata(self.resolve_path(name))?.len())
    }

    /// Every name with a regular file directly under the cache root. Sparse Cached files and
    /// fully-present Buffered/Synced files are indistinguishable at this layer; the caller
    /// (`S3Directory`) already knows which is which from its own state maps.
    pub fn list_all(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.resolve_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        std::fs::rename(self.resolve_path(from), self.resolve_path(to))?;
        Ok(())
    }

    /// Open-for-write a Buffered name, overwriting any previous content.
    pub fn create_output(&self, name: &str) -> Result<CacheOutput> {
        let path = self.resolve_path(name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(CacheOutput { file, written: 0 })
    }

    /// Open-for-write a fresh name of the form `<prefix>_<counter><suffix>tmp`, retrying on a
    /// name collision.
    pub fn create_temp_output(&self, prefix: &str, suffix: &str) -> Result<(String, CacheOutput)> {
        loop {
            let counter = self.temp_counter.fetch_add(1, Ordering::SeqCst);
            let name = format!("{prefix}_{counter}{suffix}{TEMP_SUFFIX}");
            let path = self.resolve_path(&name);
            match OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)
            {
                Ok(file) => return Ok((name, CacheOutput { file, written: 0 })),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Open a fully-present local file for reading (Buffered/Synced names).
    pub fn open_input(&self, name: &str) -> Result<CacheInput> {
        let path = self.resolve_path(name);
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(CacheInput::new(file, 0, len))
    }

    /// Open (creating if absent) a read-write sparse file for a Cached name, sized to
    /// `remote_len`. If the on-disk length doesn't match, the last byte is written to grow the
    /// file to the right size without marking any block present: this creates the hole pattern a
    /// sparse file needs.
    pub fn open_or_create_sparse(&self, name: &str, remote_len: u64) -> Result<CacheInput> {
        let path = self.resolve_path(name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let current_len = file.metadata()?.len();
        if current_len != remote_len {
            if remote_len == 0 {
                file.set_len(0)?;
            } else {
                // Writing a single byte at the last offset grows the file to `remote_len` and
                // leaves everything before it an unwritten hole on filesystems that support
                // sparse files. We deliberately do NOT record this block as present here —
                // that's left to the pre-populator or to on-demand fetch.
                file.write_at(&[0u8], remote_len - 1)?;
            }
            warn!(%name, current_len, remote_len, "resized sparse cache file to match remote length");
        }

        Ok(CacheInput::new(file, 0, remote_len))
    }

    pub fn obtain_lock(&self, name: &str) -> Result<FileLock> {
        let path = self.resolve_path(name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        FileLock::acquire(file, &path)
    }

    pub fn close(&self) {
        // No persistent cross-process state to release; names on disk remain as a best-effort
        // warm cache for the next open.
    }
}

/// An advisory exclusive `flock` held on a local file, used by `S3Directory::obtain_lock`.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    fn acquire(file: File, path: &Utf8Path) -> Result<Self> {
        use std::os::unix::io::AsRawFd;
        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|errno| {
            DirectoryError::InvalidState(format!("failed to lock {path}: {errno}"))
        })?;
        Ok(Self { _file: file })
    }
}
// Dropping `_file` closes the fd, which releases the flock.

/// Append-only local writer; the file underlying a Buffered name's output handle. CRC
/// accumulation lives one layer up, in `S3IndexOutput`, which wraps this.
pub struct CacheOutput {
    file: File,
    written: u64,
}

impl CacheOutput {
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl std::io::Write for CacheOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write_at(buf, self.written)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// A random-access reader over a local file, used both for whole-file Buffered/Synced reads and,
/// wrapped by `S3IndexInput`, for the sparse cache files behind Cached reads.
///
/// Uses positional `pread`/`pwrite` (`FileExt::read_at`/`write_at`) rather than `seek` + `read`,
/// so there's no shared position to race on: concurrent slices reading disjoint ranges of the
/// same file need no additional synchronization beyond what's already required for the
/// block-presence map.
pub struct CacheInput {
    file: Arc<File>,
    /// Offset within `file` where this view begins. Independent per slice: slices share the
    /// parent's file handle but each has its own seek position.
    base: u64,
    len: u64,
    pos: AtomicU64,
}

impl CacheInput {
    fn new(file: File, base: u64, len: u64) -> Self {
        Self {
            file: Arc::new(file),
            base,
            len,
            pos: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos.load(Ordering::Relaxed)
    }

    pub fn seek(&self, pos: u64) {
        self.pos.store(pos, Ordering::Relaxed);
    }

    /// Read `buf.len()` bytes starting at the current position, advancing it. Does not itself
    /// trigger any remote fetch — callers (`S3IndexInput`) are responsible for ensuring the
    /// backing bytes are resident first.
    pub fn read_bytes(&self, buf: &mut [u8]) -> Result<()> {
        let pos = self.pos.fetch_add(buf.len() as u64, Ordering::Relaxed);
        self.read_at(buf, pos)
    }

    /// Read `buf.len()` bytes at an absolute, view-relative offset, without touching the shared
    /// position.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.read_exact_at(buf, self.base + offset)?;
        Ok(())
    }

    /// Write `buf` at a whole-file absolute offset, ignoring this view's `base`. Block fetches
    /// target the sparse file shared by the whole file (and every sibling slice), not just the
    /// byte range a given slice exposes — a block touched near a slice's edge can start before
    /// the slice's own window. Safe to call concurrently for disjoint (or even identical) offsets:
    /// each call is a single positional syscall.
    pub fn write_at_absolute(&self, buf: &[u8], absolute_offset: u64) -> Result<()> {
        self.file.write_at(buf, absolute_offset)?;
        Ok(())
    }

    /// A child view with its own seek position, sharing this view's file handle.
    pub fn slice(&self, offset: u64, length: u64) -> CacheInput {
        CacheInput {
            file: Arc::clone(&self.file),
            base: self.base + offset,
            len: length,
            pos: AtomicU64::new(0),
        }
    }
}

pub(crate) fn is_temp_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn create_output_and_open_input_roundtrip() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cache = FSCache::new(dir.path().to_path_buf()).unwrap();

        let mut out = cache.create_output("seg.fdt").unwrap();
        out.write_all(b"hello").unwrap();
        assert_eq!(out.bytes_written(), 5);
        drop(out);

        let input = cache.open_input("seg.fdt").unwrap();
        assert_eq!(input.len(), 5);
        let mut buf = [0u8; 5];
        input.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn temp_output_names_end_in_tmp_and_never_collide() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cache = FSCache::new(dir.path().to_path_buf()).unwrap();

        let (name1, _) = cache.create_temp_output("pending_segments", ".seg").unwrap();
        let (name2, _) = cache.create_temp_output("pending_segments", ".seg").unwrap();
        assert!(name1.ends_with(TEMP_SUFFIX));
        assert!(name2.ends_with(TEMP_SUFFIX));
        assert_ne!(name1, name2);
    }

    #[test]
    fn sparse_file_length_matches_remote_length() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cache = FSCache::new(dir.path().to_path_buf()).unwrap();

        let input = cache.open_or_create_sparse("big.bin", 10_000).unwrap();
        assert_eq!(input.len(), 10_000);
        assert_eq!(cache.file_length("big.bin").unwrap(), 10_000);
    }

    #[test]
    fn slice_shares_file_but_not_position() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cache = FSCache::new(dir.path().to_path_buf()).unwrap();

        let mut out = cache.create_output("f").unwrap();
        out.write_all(b"0123456789").unwrap();
        drop(out);

        let parent = cache.open_input("f").unwrap();
        parent.seek(2);
        let slice = parent.slice(5, 5);

        let mut buf = [0u8; 3];
        slice.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"567");
        // Parent's own position is untouched by reading through the slice.
        assert_eq!(parent.position(), 2);
    }
}
