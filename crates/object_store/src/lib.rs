//! A generic storage abstraction for the S3-style remote object store that backs
//! [`s3_directory`](../s3_directory/index.html).
//!
//! [`ObjectStore`] is a CRUD-like trait for adapting external object stores, with two
//! implementations:
//!   * [`local_fs`] allows using a local filesystem directory as a stand-in object store
//!     (used by tests and by callers who don't have a bucket handy)
//!   * [`s3_bucket`] uses an AWS S3 bucket as the backing store
//!
//! Everything above this crate should go through [`GenericObjectStore`] rather than depend on a
//! concrete backend.
#![deny(unsafe_code)]

mod config;
mod error;
mod local_fs;
mod metrics;
mod s3_bucket;
mod simulate_failures;

use std::sync::Arc;

use bytes::Bytes;
use camino::Utf8Path;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::{ObjectStoreConfig, S3Config};
pub use error::DownloadError;
pub use local_fs::LocalFs;
pub use metrics::{Metrics, RequestKind};
pub use s3_bucket::S3Bucket;
pub use simulate_failures::UnreliableWrapper;

/// The name of an object, relative to the store's configured prefix. Flat namespace: any `/`
/// that appears is a literal character of the name, not a path separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectName(String);

impl ObjectName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ObjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The result of [`ObjectStore::list`]: `(name, size)` pairs with the store's prefix already
/// stripped off, and the bare prefix entry (if the store returns one) filtered out.
#[derive(Debug, Default, Clone)]
pub struct Listing {
    pub keys: Vec<(ObjectName, u64)>,
}

/// An identifier for a specific version of an object, used by the versioned-retry path to pin a
/// read to the version that existed just before an overwrite or delete.
pub type VersionId = String;

/// A streamed download of a whole object.
pub type DownloadStream = std::pin::Pin<
    Box<dyn futures::Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static>,
>;

/// Thin typed interface over a remote object store: list, head, ranged/full get, put, copy,
/// delete.
///
/// An `async_fn_in_trait` trait, not a `dyn`-safe one. Callers dispatch through
/// [`GenericObjectStore`] instead of a trait object.
#[allow(async_fn_in_trait)]
pub trait ObjectStore: Send + Sync + 'static {
    /// List every object under the store's prefix. Bulk, not paginated at this layer: the
    /// directory's namespace is expected to stay in the thousands-of-files range that a search
    /// index segment set occupies, not an unbounded bucket.
    async fn list(&self, cancel: &CancellationToken) -> Result<Listing, DownloadError>;

    /// Size of a single object, in bytes.
    async fn head(&self, name: &ObjectName, cancel: &CancellationToken) -> Result<u64, DownloadError>;

    /// Fetch exactly `length` bytes starting at `offset`. If `version` is given, pins the read to
    /// that specific version id (see [`ObjectStore::list_object_versions`]).
    async fn get_range(
        &self,
        name: &ObjectName,
        offset: u64,
        length: u64,
        version: Option<&VersionId>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError>;

    /// Fetch the whole object as a stream.
    async fn get(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<DownloadStream, DownloadError>;

    /// List the versions of a single key, most recent first. Used only by the versioned-retry
    /// path; backends with no real versioning (e.g. [`LocalFs`]) may return a single synthetic
    /// version id.
    async fn list_object_versions(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionId>, DownloadError>;

    /// Upload the file at `local_path` (exactly `size_bytes` long) to `name`.
    async fn put(
        &self,
        name: &ObjectName,
        local_path: &Utf8Path,
        size_bytes: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;

    /// Server-side copy.
    async fn copy(
        &self,
        from: &ObjectName,
        to: &ObjectName,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;

    /// Delete a single object. Deleting a missing object is not an error (idempotent).
    async fn delete(&self, name: &ObjectName, cancel: &CancellationToken) -> anyhow::Result<()>;
}

/// Every object store backend this crate supports. Serves as a way to pass [`ObjectStore`] around
/// without generics bleeding into every caller.
#[derive(Clone)]
// Require Clone for `Other` due to https://github.com/rust-lang/rust/issues/26925
pub enum GenericObjectStore<Other: Clone = Arc<UnreliableWrapper>> {
    LocalFs(LocalFs),
    AwsS3(Arc<S3Bucket>),
    Unreliable(Other),
}

impl<Other: ObjectStore> GenericObjectStore<Arc<Other>> {
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Listing, DownloadError> {
        match self {
            Self::LocalFs(s) => s.list(cancel).await,
            Self::AwsS3(s) => s.list(cancel).await,
            Self::Unreliable(s) => s.list(cancel).await,
        }
    }

    pub async fn head(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        match self {
            Self::LocalFs(s) => s.head(name, cancel).await,
            Self::AwsS3(s) => s.head(name, cancel).await,
            Self::Unreliable(s) => s.head(name, cancel).await,
        }
    }

    pub async fn get_range(
        &self,
        name: &ObjectName,
        offset: u64,
        length: u64,
        version: Option<&VersionId>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        match self {
            Self::LocalFs(s) => s.get_range(name, offset, length, version, cancel).await,
            Self::AwsS3(s) => s.get_range(name, offset, length, version, cancel).await,
            Self::Unreliable(s) => s.get_range(name, offset, length, version, cancel).await,
        }
    }

    pub async fn get(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<DownloadStream, DownloadError> {
        match self {
            Self::LocalFs(s) => s.get(name, cancel).await,
            Self::AwsS3(s) => s.get(name, cancel).await,
            Self::Unreliable(s) => s.get(name, cancel).await,
        }
    }

    pub async fn list_object_versions(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionId>, DownloadError> {
        match self {
            Self::LocalFs(s) => s.list_object_versions(name, cancel).await,
            Self::AwsS3(s) => s.list_object_versions(name, cancel).await,
            Self::Unreliable(s) => s.list_object_versions(name, cancel).await,
        }
    }

    pub async fn put(
        &self,
        name: &ObjectName,
        local_path: &Utf8Path,
        size_bytes: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match self {
            Self::LocalFs(s) => s.put(name, local_path, size_bytes, cancel).await,
            Self::AwsS3(s) => s.put(name, local_path, size_bytes, cancel).await,
            Self::Unreliable(s) => s.put(name, local_path, size_bytes, cancel).await,
        }
    }

    pub async fn copy(
        &self,
        from: &ObjectName,
        to: &ObjectName,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match self {
            Self::LocalFs(s) => s.copy(from, to, cancel).await,
            Self::AwsS3(s) => s.copy(from, to, cancel).await,
            Self::Unreliable(s) => s.copy(from, to, cancel).await,
        }
    }

    pub async fn delete(&self, name: &ObjectName, cancel: &CancellationToken) -> anyhow::Result<()> {
        match self {
            Self::LocalFs(s) => s.delete(name, cancel).await,
            Self::AwsS3(s) => s.delete(name, cancel).await,
            Self::Unreliable(s) => s.delete(name, cancel).await,
        }
    }

    /// Parallel upload of many local files, used by `S3Directory::sync`. Bounded by the same
    /// concurrency limiter each backend already applies per-request; we just fire the requests
    /// concurrently and join.
    pub async fn bulk_upload(
        &self,
        items: &[(ObjectName, std::path::PathBuf, u64)],
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let uploads = items.iter().map(|(name, path, size)| async move {
            let path = camino::Utf8Path::from_path(path)
                .ok_or_else(|| anyhow::anyhow!("non-utf8 local path: {path:?}"))?;
            self.put(name, path, *size, cancel).await
        });
        futures::future::try_join_all(uploads).await?;
        Ok(())
    }

    /// Parallel download of many objects to local paths, used by the pre-populator and by warm-up
    /// tooling.
    pub async fn bulk_download(
        &self,
        items: &[(ObjectName, u64)],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Bytes>> {
        let downloads = items.iter().map(|(name, len)| async move {
            self.get_range(name, 0, *len, None, cancel)
                .await
                .map_err(anyhow::Error::from)
        });
        futures::future::try_join_all(downloads).await
    }

    /// Fetch a byte range, transparently retrying against the most recent object version if the
    /// first attempt fails with `NotFound`. Masks the window between a rename's `copy` completing
    /// and its `delete` propagating on a store with eventually-consistent metadata.
    pub async fn get_range_with_retry(
        &self,
        name: &ObjectName,
        offset: u64,
        length: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        match self.get_range(name, offset, length, None, cancel).await {
            Err(DownloadError::NotFound) => {
                info!(%name, "range GET returned NotFound, retrying against most recent object version");
                let versions = self.list_object_versions(name, cancel).await?;
                let latest = versions.into_iter().next().ok_or(DownloadError::NotFound)?;
                self.get_range(name, offset, length, Some(&latest), cancel)
                    .await
            }
            other => other,
        }
    }
}

impl GenericObjectStore {
    pub async fn from_config(config: &ObjectStoreConfig) -> anyhow::Result<Self> {
        Ok(match config {
            ObjectStoreConfig::LocalFs { local_path } => {
                info!(%local_path, "using local filesystem as the remote object store");
                Self::LocalFs(LocalFs::new(local_path.clone())?)
            }
            ObjectStoreConfig::S3(s3_config) => {
                info!(
                    bucket = %s3_config.bucket_name,
                    region = %s3_config.bucket_region,
                    prefix = %s3_config.prefix_in_bucket,
                    "using an S3 bucket as the remote object store"
                );
                Self::AwsS3(Arc::new(S3Bucket::new(s3_config).await?))
            }
        })
    }

    pub fn unreliable_wrapper(s: Self, fail_first: u64) -> Self {
        Self::Unreliable(Arc::new(UnreliableWrapper::new(s, fail_first)))
    }
}

/// Bounds the number of concurrent requests issued to the backing store, split by read/write so
/// a burst of uploads can't starve readers (or vice versa).
pub(crate) struct ConcurrencyLimiter {
    write: Arc<Semaphore>,
    read: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            read: Arc::new(Semaphore::new(limit)),
            write: Arc::new(Semaphore::new(limit)),
        }
    }

    fn for_kind(&self, kind: RequestKind) -> &Arc<Semaphore> {
        match kind {
            RequestKind::Get | RequestKind::List | RequestKind::ListVersions => &self.read,
            RequestKind::Put | RequestKind::Delete | RequestKind::Copy => &self.write,
        }
    }

    pub(crate) async fn acquire(
        &self,
        kind: RequestKind,
    ) -> Result<tokio::sync::SemaphorePermit<'_>, tokio::sync::AcquireError> {
        self.for_kind(kind).acquire().await
    }
}
