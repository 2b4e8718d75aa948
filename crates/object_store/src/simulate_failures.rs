use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use camino::Utf8Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{DownloadError, DownloadStream, GenericObjectStore, Listing, ObjectName, ObjectStore, VersionId};

/// Wraps a [`GenericObjectStore`] and fails the first `attempts_to_fail` calls to each method with
/// a transport-style error, then lets the rest through. Used in tests to exercise retry paths
/// without a real flaky network.
pub struct UnreliableWrapper {
    inner: GenericObjectStore,
    attempts_to_fail: u64,
    attempts: AtomicU64,
}

impl UnreliableWrapper {
    pub fn new(inner: GenericObjectStore, attempts_to_fail: u64) -> Self {
        assert!(attempts_to_fail > 0, "attempts_to_fail must be at least 1");
        Self {
            inner,
            attempts_to_fail,
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns `Err` for the first `attempts_to_fail` calls (tagged by `op`), `Ok(())` after that.
    fn maybe_fail(&self, op: &str) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.attempts_to_fail {
            info!(op, attempt, total = self.attempts_to_fail, "simulating a transient failure");
            anyhow::bail!("simulated failure on {op}, attempt {attempt}/{}", self.attempts_to_fail);
        }
        Ok(())
    }
}

impl ObjectStore for UnreliableWrapper {
    async fn list(&self, cancel: &CancellationToken) -> Result<Listing, DownloadError> {
        self.maybe_fail("list")?;
        self.inner.list(cancel).await
    }

    async fn head(&self, name: &ObjectName, cancel: &CancellationToken) -> Result<u64, DownloadError> {
        self.maybe_fail("head")?;
        self.inner.head(name, cancel).await
    }

    async fn get_range(
        &self,
        name: &ObjectName,
        offset: u64,
        length: u64,
        version: Option<&VersionId>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        self.maybe_fail("get_range")?;
        self.inner.get_range(name, offset, length, version, cancel).await
    }

    async fn get(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<DownloadStream, DownloadError> {
        self.maybe_fail("get")?;
        self.inner.get(name, cancel).await
    }

    async fn list_object_versions(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionId>, DownloadError> {
        self.maybe_fail("list_object_versions")?;
        self.inner.list_object_versions(name, cancel).await
    }

    async fn put(
        &self,
        name: &ObjectName,
        local_path: &Utf8Path,
        size_bytes: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.maybe_fail("put")?;
        self.inner.put(name, local_path, size_bytes, cancel).await
    }

    async fn copy(
        &self,
        from: &ObjectName,
        to: &ObjectName,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.maybe_fail("copy")?;
        self.inner.copy(from, to, cancel).await
    }

    async fn delete(&self, name: &ObjectName, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.maybe_fail("delete")?;
        self.inner.delete(name, cancel).await
    }
}
