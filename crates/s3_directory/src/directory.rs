//! The file-namespace facade consumed by the search engine: owns the four per-name state maps,
//! routes every directory operation to the right tier, and drives the sync/rename/syncMetaData
//! commit protocol.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::{DashMap, DashSet};
use object_store::{GenericObjectStore, ObjectName};
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block_map::BlockPresenceMap;
use crate::config::S3DirectoryConfig;
use crate::error::{DirectoryError, Result};
use crate::fs_cache::{is_temp_name, FSCache, FileLock};
use crate::index_input::S3IndexInput;
use crate::index_output::S3IndexOutput;
use crate::metrics::DirectoryMetrics;
use crate::prepopulate;

/// A reader returned by [`S3Directory::open_input`]: either a plain local read over a fully
/// present Buffered/Synced file, or a block-cached read over a Cached/Remote-only one. Presented
/// as one type so callers don't need to know which tier served a given name.
pub enum S3Reader {
    Local(crate::fs_cache::CacheInput),
    Remote(S3IndexInput),
}

impl S3Reader {
    pub fn length(&self) -> u64 {
        match self {
            Self::Local(r) => r.len(),
            Self::Remote(r) => r.length(),
        }
    }

    pub fn file_pointer(&self) -> u64 {
        match self {
            Self::Local(r) => r.position(),
            Self::Remote(r) => r.file_pointer(),
        }
    }

    pub fn seek(&self, pos: u64) {
        match self {
            Self::Local(r) => r.seek(pos),
            Self::Remote(r) => r.seek(pos),
        }
    }

    pub fn read_byte(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_bytes(&self, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::Local(r) => r.read_bytes(buf),
            Self::Remote(r) => r.read_bytes(buf),
        }
    }

    /// Window view with its own seek position over the same underlying bytes.
    pub fn slice(&self, offset: u64, length: u64) -> Self {
        match self {
            Self::Local(r) => Self::Local(r.slice(offset, length)),
            Self::Remote(r) => Self::Remote(r.slice(offset, length)),
        }
    }

    pub fn close(&self) {
        if let Self::Remote(r) = self {
            r.close();
        }
    }
}

/// How this directory came by its tokio runtime: either handed one by the caller (who keeps
/// driving it), or a dedicated one this directory owns and must keep alive for its own lifetime.
enum RuntimeOwnership {
    Borrowed,
    Owned(Runtime),
}

pub struct S3Directory {
    object_store: GenericObjectStore,
    cache: FSCache,
    handle: Handle,
    _runtime: RuntimeOwnership,
    block_size: u64,

    buffered: DashSet<String>,
    synced: Mutex<HashSet<String>>,
    cached: DashMap<String, Arc<BlockPresenceMap>>,
    renamed: Mutex<HashSet<String>>,
    metrics: Arc<DirectoryMetrics>,
    is_open: AtomicBool,
}

impl S3Directory {
    /// Opens (or creates) the directory against `config`, running pre-population before
    /// returning. If `runtime` is `None`, spins up a dedicated multi-thread tokio runtime owned
    /// by this directory for the rest of its lifetime.
    pub fn open(config: S3DirectoryConfig, runtime: Option<Handle>) -> anyhow::Result<Self> {
        let (handle, owned) = match runtime {
            Some(h) => (h, RuntimeOwnership::Borrowed),
            None => {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?;
                let handle = rt.handle().clone();
                (handle, RuntimeOwnership::Owned(rt))
            }
        };

        let object_store = handle.block_on(GenericObjectStore::from_config(&config.object_store))?;
        let cache = FSCache::new(config.local_cache_path.clone())?;

        let cached = match prepopulate::prepopulate(
            &handle,
            &object_store,
            &cache,
            config.block_size,
            config.prepopulate_concurrency,
        ) {
            Ok(maps) => maps.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "pre-population pass failed entirely; all reads will be on-demand");
                DashMap::new()
            }
        };

        info!(
            block_size = config.block_size,
            cached = cached.len(),
            "opened S3Directory"
        );

        Ok(Self {
            object_store,
            cache,
            handle,
            _runtime: owned,
            block_size: config.block_size,
            buffered: DashSet::new(),
            synced: Mutex::new(HashSet::new()),
            cached,
            renamed: Mutex::new(HashSet::new()),
            metrics: Arc::new(DirectoryMetrics::default()),
            is_open: AtomicBool::new(true),
        })
    }

    pub fn metrics(&self) -> &DirectoryMetrics {
        &self.metrics
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::InvalidState("directory is closed".to_string()))
        }
    }

    /// Union of (ObjectStore list) and Buffered names, deduplicated, sorted by UTF-16 code-unit
    /// order.
    pub fn list_all(&self) -> Result<Vec<String>> {
        self.check_open()?;
        let cancel = CancellationToken::new();
        let listing = self.handle.block_on(self.object_store.list(&cancel))?;

        let mut names: HashSet<String> = listing
            .keys
            .into_iter()
            .map(|(name, _)| name.as_str().to_owned())
            .collect();
        for name in self.buffered.iter() {
            names.insert(name.clone());
        }

        let mut names: Vec<String> = names.into_iter().collect();
        names.sort_by_key(|n| n.encode_utf16().collect::<Vec<u16>>());
        Ok(names)
    }

    /// For names in any local state, the local file's length (for Cached names, the sparse
    /// file's logical length, which always equals the remote length); otherwise, an ObjectStore
    /// `head`.
    pub fn file_length(&self, name: &str) -> Result<u64> {
        self.check_open()?;
        if self.buffered.contains(name)
            || self.synced.lock().unwrap().contains(name)
            || self.cached.contains_key(name)
        {
            return Ok(self.cache.file_length(name)?);
        }
        let cancel = CancellationToken::new();
        let object_name = ObjectName::new(name.to_owned());
        Ok(self.handle.block_on(self.object_store.head(&object_name, &cancel))?)
    }

    /// Opens a Buffered writer for `name`, inserting it into the Buffered set.
    pub fn create_output(&self, name: &str) -> Result<S3IndexOutput> {
        self.check_open()?;
        let out = self.cache.create_output(name)?;
        self.buffered.insert(name.to_owned());
        Ok(S3IndexOutput::new(name.to_owned(), out))
    }

    /// Opens a Buffered writer under a fresh name of the form `<prefix>_<counter><suffix>tmp`,
    /// retrying on collision.
    pub fn create_temp_output(&self, prefix: &str, suffix: &str) -> Result<S3IndexOutput> {
        self.check_open()?;
        let (name, out) = self.cache.create_temp_output(prefix, suffix)?;
        self.buffered.insert(name.clone());
        Ok(S3IndexOutput::new(name, out))
    }

    /// Buffered/Synced names get a direct local read; everything else transitions (on first
    /// open) to Cached and is served by an [`S3IndexInput`].
    pub fn open_input(&self, name: &str) -> Result<S3Reader> {
        self.check_open()?;
        if self.buffered.contains(name) || self.synced.lock().unwrap().contains(name) {
            return Ok(S3Reader::Local(self.cache.open_input(name)?));
        }

        let presence = self
            .cached
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(BlockPresenceMap::new()))
            .clone();

        let input = S3IndexInput::open(
            name.to_owned(),
            self.object_store.clone(),
            &self.cache,
            presence,
            Arc::clone(&self.metrics),
            self.block_size,
            self.handle.clone(),
        )?;
        Ok(S3Reader::Remote(input))
    }

    /// Durability for the named Buffered files: uploads each (skipping temp files, which are
    /// never uploaded) and transitions it Buffered → Synced atomically per name.
    pub fn sync(&self, names: &[String]) -> Result<()> {
        self.check_open()?;
        let mut to_upload = Vec::new();
        for name in names {
            if is_temp_name(name) {
                continue;
            }
            if self.buffered.contains(name) {
                let path = self.cache.resolve_path(name).into_std_path_buf();
                let size = self.cache.file_length(name)?;
                to_upload.push((ObjectName::new(name.clone()), path, size));
            }
        }
        if to_upload.is_empty() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        self.handle
            .block_on(self.object_store.bulk_upload(&to_upload, &cancel))?;

        for (name, _, _) in to_upload {
            let name = name.as_str().to_owned();
            self.buffered.remove(&name);
            self.synced.lock().unwrap().insert(name);
        }
        Ok(())
    }

    /// Relocates `from` to `to`, preserving whatever state `from` was in, and marks `to` as
    /// touched by a rename. Synced/Cached/remote-only renames are `copy + delete` against the
    /// object store, since S3-style stores have no native rename.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_open()?;
        let cancel = CancellationToken::new();
        let from_name = ObjectName::new(from.to_owned());
        let to_name = ObjectName::new(to.to_owned());

        if self.buffered.remove(from).is_some() {
            self.cache.rename(from, to)?;
            self.buffered.insert(to.to_owned());
        } else if self.synced.lock().unwrap().remove(from) {
            self.cache.rename(from, to)?;
            self.handle
                .block_on(self.object_store.copy(&from_name, &to_name, &cancel))?;
            self.handle
                .block_on(self.object_store.delete(&from_name, &cancel))?;
            self.synced.lock().unwrap().insert(to.to_owned());
        } else if let Some((_, presence)) = self.cached.remove(from) {
            self.cache.rename(from, to)?;
            self.handle
                .block_on(self.object_store.copy(&from_name, &to_name, &cancel))?;
            self.handle
                .block_on(self.object_store.delete(&from_name, &cancel))?;
            self.cached.insert(to.to_owned(), presence);
        } else {
            self.handle
                .block_on(self.object_store.copy(&from_name, &to_name, &cancel))?;
            self.handle
                .block_on(self.object_store.delete(&from_name, &cancel))?;
        }

        self.renamed.lock().unwrap().insert(to.to_owned());
        Ok(())
    }

    /// Uploads anything still Buffered that was renamed since the last flush, then clears the
    /// Renamed set — the commit-sequence visibility barrier the engine relies on ("write files →
    /// sync-data → rename → sync-metadata").
    pub fn sync_metadata(&self) -> Result<()> {
        self.check_open()?;
        let pending: Vec<String> = {
            let mut guard = self.renamed.lock().unwrap();
            let names: Vec<String> = guard.iter().cloned().collect();
            guard.clear();
            names
        };
        let still_buffered: Vec<String> = pending
            .into_iter()
            .filter(|name| self.buffered.contains(name))
            .collect();
        self.sync(&still_buffered)
    }

    /// Removes `name` from whichever local set owns it and deletes remotely if it ever touched
    /// the remote store. Buffered-only names have no remote footprint to clean up.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        self.check_open()?;
        let was_buffered = self.buffered.remove(name).is_some();
        self.synced.lock().unwrap().remove(name);
        self.cached.remove(name);
        self.cache.delete(name)?;

        if !was_buffered {
            let cancel = CancellationToken::new();
            let object_name = ObjectName::new(name.to_owned());
            self.handle
                .block_on(self.object_store.delete(&object_name, &cancel))?;
        }
        Ok(())
    }

    /// Advisory exclusive lock on `name` under the local cache root.
    pub fn obtain_lock(&self, name: &str) -> Result<FileLock> {
        self.check_open()?;
        Ok(self.cache.obtain_lock(name)?)
    }

    /// Always empty: this implementation defers no deletions.
    pub fn pending_deletions(&self) -> impl Iterator<Item = String> {
        std::iter::empty()
    }

    /// Clears every in-memory set and closes the local cache. After this returns, every
    /// operation fails with `InvalidState` — close establishes a total order against every other
    /// operation.
    pub fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
        self.buffered.clear();
        self.synced.lock().unwrap().clear();
        self.cached.clear();
        self.renamed.lock().unwrap().clear();
        self.cache.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::ObjectStoreConfig;
    use std::io::Write as _;

    fn open_test_directory(remote_path: &camino::Utf8Path, cache_path: &camino::Utf8Path) -> S3Directory {
        let config = S3DirectoryConfig {
            object_store: ObjectStoreConfig::LocalFs {
                local_path: remote_path.to_path_buf(),
            },
            local_cache_path: cache_path.to_path_buf(),
            block_size: 1024,
            prepopulate_concurrency: 8,
        };
        S3Directory::open(config, None).unwrap()
    }

    #[test]
    fn write_commit_cycle() {
        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();
        let directory = open_test_directory(remote_dir.path(), cache_dir.path());

        let mut out = directory.create_output("seg.fdt").unwrap();
        let pattern: Vec<u8> = (0..256u32).map(|i| i as u8).collect();
        for _ in 0..10 {
            out.write_all(&pattern).unwrap();
        }
        drop(out);

        directory.sync(&["seg.fdt".to_string()]).unwrap();

        assert_eq!(directory.list_all().unwrap(), vec!["seg.fdt".to_string()]);
        assert_eq!(directory.file_length("seg.fdt").unwrap(), 2560);
        let uploaded = std::fs::read(remote_dir.path().join("seg.fdt")).unwrap();
        assert_eq!(uploaded.len(), 2560);
    }

    #[test]
    fn cold_random_read() {
        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();

        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(remote_dir.path().join("big.bin"), &data).unwrap();

        let directory = open_test_directory(remote_dir.path(), cache_dir.path());

        let reader = directory.open_input("big.bin").unwrap();
        reader.seek(5000);
        let mut buf = [0u8; 100];
        reader.read_bytes(&mut buf).unwrap();
        for (k, b) in buf.iter().enumerate() {
            assert_eq!(*b, ((5000 + k) % 251) as u8);
        }

        assert_eq!(directory.metrics().block_cache_misses(), 1);

        reader.seek(5000);
        reader.read_bytes(&mut buf).unwrap();
        assert_eq!(directory.metrics().block_cache_hits(), 1);
    }

    #[test]
    fn rename_visibility() {
        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();
        let directory = open_test_directory(remote_dir.path(), cache_dir.path());

        let mut out = directory.create_output("pending.seg").unwrap();
        out.write_all(&[0xAAu8; 100]).unwrap();
        drop(out);
        directory.sync(&["pending.seg".to_string()]).unwrap();

        directory.rename("pending.seg", "segments_1").unwrap();
        directory.sync_metadata().unwrap();

        let names = directory.list_all().unwrap();
        assert!(names.contains(&"segments_1".to_string()));
        assert!(!names.contains(&"pending.seg".to_string()));

        let reader = directory.open_input("segments_1").unwrap();
        assert_eq!(reader.length(), 100);
        let mut buf = [0u8; 100];
        reader.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [0xAAu8; 100]);
    }

    #[test]
    fn delete_of_cached_is_fully_removed() {
        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();
        std::fs::write(remote_dir.path().join("x"), vec![1u8; 5000]).unwrap();

        let directory = open_test_directory(remote_dir.path(), cache_dir.path());
        let reader = directory.open_input("x").unwrap();
        reader.seek(0);
        let mut buf = [0u8; 10];
        reader.read_bytes(&mut buf).unwrap();
        drop(reader);

        directory.delete_file("x").unwrap();

        assert!(!remote_dir.path().join("x").exists());
        assert!(directory.open_input("x").is_err());
    }

    #[test]
    fn operations_fail_after_close() {
        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();
        let directory = open_test_directory(remote_dir.path(), cache_dir.path());
        directory.close();
        assert!(directory.list_all().is_err());
        assert!(directory.create_output("x").is_err());
    }

    #[test]
    fn temp_files_are_excluded_from_sync() {
        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();
        let directory = open_test_directory(remote_dir.path(), cache_dir.path());

        let (temp_name, mut out) = {
            let out = directory.create_temp_output("pending_segments", ".seg").unwrap();
            (out.name().to_string(), out)
        };
        out.write_bytes(b"discarded").unwrap();
        drop(out);

        directory.sync(&[temp_name.clone()]).unwrap();
        assert!(!remote_dir.path().join(&temp_name).exists());
    }
}
