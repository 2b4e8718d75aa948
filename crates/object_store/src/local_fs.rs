use std::path::PathBuf;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{DownloadError, DownloadStream, Listing, ObjectName, ObjectStore, VersionId};

/// A local filesystem directory, used as a stand-in [`ObjectStore`] backend: every "object" is
/// just a regular file under `root`.
///
/// Since a local filesystem has no real object versioning, [`ObjectStore::list_object_versions`]
/// always returns a single synthetic version id ("current"): reads against a plain directory are
/// always consistent, so the versioned-retry path never actually needs to pick between multiple
/// candidates here. Tests that want to exercise that retry path stub [`ObjectStore`] directly
/// instead (see `tests/versioned_retry.rs`).
#[derive(Clone)]
pub struct LocalFs {
    root: Utf8PathBuf,
}

const CURRENT_VERSION: &str = "current";

impl LocalFs {
    pub fn new(root: Utf8PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, name: &ObjectName) -> Utf8PathBuf {
        self.root.join(name.as_str())
    }
}

impl ObjectStore for LocalFs {
    async fn list(&self, _cancel: &CancellationToken) -> Result<Listing, DownloadError> {
        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8Path::from_path(entry.path())
                .ok_or_else(|| anyhow::anyhow!("non-utf8 path in local object store"))?;
            let rel = path
                .strip_prefix(&self.root)
                .map_err(|e| anyhow::anyhow!(e))?;
            let size = entry.metadata().map_err(anyhow::Error::from)?.len();
            keys.push((ObjectName::new(rel.as_str()), size));
        }
        keys.sort();
        Ok(Listing { keys })
    }

    async fn head(&self, name: &ObjectName, _cancel: &CancellationToken) -> Result<u64, DownloadError> {
        let path = self.object_path(name);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| DownloadError::NotFound)?;
        Ok(meta.len())
    }

    async fn get_range(
        &self,
        name: &ObjectName,
        offset: u64,
        length: u64,
        _version: Option<&VersionId>,
        _cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let path = self.object_path(name);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|_| DownloadError::NotFound)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| DownloadError::Other(e.into()))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| DownloadError::Other(e.into()))?;
        trace!(%name, offset, length, "local_fs get_range");
        Ok(Bytes::from(buf))
    }

    async fn get(
        &self,
        name: &ObjectName,
        _cancel: &CancellationToken,
    ) -> Result<DownloadStream, DownloadError> {
        let path = self.object_path(name);
        let bytes = tokio::fs::read(&path).await.map_err(|_| DownloadError::NotFound)?;
        let stream = futures::stream::once(async move { Ok(Bytes::from(bytes)) });
        Ok(Box::pin(stream))
    }

    async fn list_object_versions(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionId>, DownloadError> {
        // Only report a version if the object currently exists; an absent object has no
        // versions to retry against.
        match self.head(name, cancel).await {
            Ok(_) => Ok(vec![CURRENT_VERSION.to_string()]),
            Err(DownloadError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn put(
        &self,
        name: &ObjectName,
        local_path: &Utf8Path,
        _size_bytes: u64,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let dest = self.object_path(name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &dest).await?;
        Ok(())
    }

    async fn copy(
        &self,
        from: &ObjectName,
        to: &ObjectName,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let src = self.object_path(from);
        let dest = self.object_path(to);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, &dest).await?;
        Ok(())
    }

    async fn delete(&self, name: &ObjectName, _cancel: &CancellationToken) -> anyhow::Result<()> {
        let path: PathBuf = self.object_path(name).into_std_path_buf();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
