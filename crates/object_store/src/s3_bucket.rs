use std::time::SystemTime;

use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use camino::Utf8Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::{Metrics, RequestKind};
use crate::{
    ConcurrencyLimiter, DownloadError, DownloadStream, Listing, ObjectName, ObjectStore, S3Config,
    VersionId,
};

/// An S3 bucket, accessed with a configured key prefix. Keys are `prefix + name`, where `prefix`
/// is normalized to end in exactly one `/`.
pub struct S3Bucket {
    client: Client,
    bucket_name: String,
    prefix_in_bucket: String,
    concurrency_limiter: ConcurrencyLimiter,
    metrics: Metrics,
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

impl S3Bucket {
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.bucket_region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let client = Client::new(&sdk_config);

        Ok(Self {
            client,
            bucket_name: config.bucket_name.clone(),
            prefix_in_bucket: normalize_prefix(&config.prefix_in_bucket),
            concurrency_limiter: ConcurrencyLimiter::new(config.concurrency_limit),
            metrics: Metrics::default(),
        })
    }

    fn key(&self, name: &ObjectName) -> String {
        format!("{}{}", self.prefix_in_bucket, name.as_str())
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.prefix_in_bucket)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl ObjectStore for S3Bucket {
    async fn list(&self, cancel: &CancellationToken) -> Result<Listing, DownloadError> {
        let _permit = self.concurrency_limiter.acquire(RequestKind::List).await;
        self.metrics.record_request(RequestKind::List);

        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(&self.prefix_in_bucket);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| DownloadError::Other(anyhow::Error::new(e)))?;

            for obj in resp.contents() {
                let Some(full_key) = obj.key() else { continue };
                let Some(rel_key) = self.strip_prefix(full_key) else { continue };
                // The bare prefix entry (an empty relative key, e.g. a directory marker) is
                // filtered out.
                if rel_key.is_empty() {
                    continue;
                }
                let size = obj.size().unwrap_or(0).max(0) as u64;
                keys.push((ObjectName::new(rel_key), size));
            }

            if resp.is_truncated().unwrap_or(false) {
                continuation_token = resp.next_continuation_token().map(str::to_owned);
            } else {
                break;
            }
        }

        keys.sort();
        Ok(Listing { keys })
    }

    async fn head(&self, name: &ObjectName, cancel: &CancellationToken) -> Result<u64, DownloadError> {
        let _permit = self.concurrency_limiter.acquire(RequestKind::Get).await;
        self.metrics.record_request(RequestKind::Get);
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket_name)
            .key(self.key(name))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(resp.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn get_range(
        &self,
        name: &ObjectName,
        offset: u64,
        length: u64,
        version: Option<&VersionId>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let _permit = self.concurrency_limiter.acquire(RequestKind::Get).await;
        self.metrics.record_request(RequestKind::Get);
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        // HTTP Range: bytes=<start>-<end-inclusive>.
        let end_inclusive = offset + length.saturating_sub(1);
        let range = format!("bytes={offset}-{end_inclusive}");

        let mut req = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(self.key(name))
            .range(range);
        if let Some(version_id) = version {
            req = req.version_id(version_id.clone());
        }

        let resp = req.send().await.map_err(map_sdk_error)?;

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| DownloadError::Other(anyhow::Error::new(e)))?
            .into_bytes();

        if body.len() as u64 != length {
            warn!(%name, expected = length, actual = body.len(), "range GET returned unexpected byte count");
            return Err(DownloadError::ByteCountMismatch {
                expected: length,
                actual: body.len() as u64,
            });
        }

        self.metrics.record_bytes_fetched(body.len() as u64);
        Ok(body)
    }

    async fn get(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<DownloadStream, DownloadError> {
        let _permit = self.concurrency_limiter.acquire(RequestKind::Get).await;
        self.metrics.record_request(RequestKind::Get);
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(self.key(name))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let stream = resp
            .body
            .map(|res| res.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        Ok(Box::pin(stream))
    }

    async fn list_object_versions(
        &self,
        name: &ObjectName,
        cancel: &CancellationToken,
    ) -> Result<Vec<VersionId>, DownloadError> {
        let _permit = self
            .concurrency_limiter
            .acquire(RequestKind::ListVersions)
            .await;
        self.metrics.record_request(RequestKind::ListVersions);
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let resp = self
            .client
            .list_object_versions()
            .bucket(&self.bucket_name)
            .prefix(self.key(name))
            .send()
            .await
            .map_err(|e| DownloadError::Other(anyhow::Error::new(e)))?;

        let mut versions: Vec<(SystemTime, VersionId)> = resp
            .versions()
            .iter()
            .filter(|v| v.key() == Some(self.key(name).as_str()))
            .filter_map(|v| {
                let id = v.version_id()?.to_string();
                let modified = v
                    .last_modified()
                    .and_then(|t| t.to_chrono_utc().ok())
                    .map(|t| SystemTime::from(t))
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, id))
            })
            .collect();
        versions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(versions.into_iter().map(|(_, id)| id).collect())
    }

    async fn put(
        &self,
        name: &ObjectName,
        local_path: &Utf8Path,
        size_bytes: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let _permit = self.concurrency_limiter.acquire(RequestKind::Put).await;
        self.metrics.record_request(RequestKind::Put);
        anyhow::ensure!(!cancel.is_cancelled(), "cancelled before upload started");

        let body = ByteStream::from_path(local_path).await?;
        info!(%name, size_bytes, "uploading to s3");
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(self.key(name))
            .content_length(size_bytes as i64)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn copy(
        &self,
        from: &ObjectName,
        to: &ObjectName,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let _permit = self.concurrency_limiter.acquire(RequestKind::Copy).await;
        self.metrics.record_request(RequestKind::Copy);
        anyhow::ensure!(!cancel.is_cancelled(), "cancelled before copy started");

        let copy_source = format!("{}/{}", self.bucket_name, self.key(from));
        self.client
            .copy_object()
            .bucket(&self.bucket_name)
            .copy_source(copy_source)
            .key(self.key(to))
            .send()
            .await?;
        Ok(())
    }

    async fn delete(&self, name: &ObjectName, cancel: &CancellationToken) -> anyhow::Result<()> {
        let _permit = self.concurrency_limiter.acquire(RequestKind::Delete).await;
        self.metrics.record_request(RequestKind::Delete);
        anyhow::ensure!(!cancel.is_cancelled(), "cancelled before delete started");

        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(self.key(name))
            .send()
            .await?;
        Ok(())
    }
}

/// Translate an SDK-level error into our [`DownloadError`] taxonomy, recognizing "no such key"
/// responses so the versioned-retry path in `GenericObjectStore::get_range_with_retry` can react
/// to them.
fn map_sdk_error<E, R>(err: SdkError<E, R>) -> DownloadError
where
    E: IsNotFound + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match err.as_service_error() {
        Some(e) if e.is_not_found() => DownloadError::NotFound,
        _ => DownloadError::Other(anyhow::Error::new(err)),
    }
}

trait IsNotFound {
    fn is_not_found(&self) -> bool;
}

impl IsNotFound for GetObjectError {
    fn is_not_found(&self) -> bool {
        matches!(self, GetObjectError::NoSuchKey(_))
    }
}

impl IsNotFound for HeadObjectError {
    fn is_not_found(&self) -> bool {
        matches!(self, HeadObjectError::NotFound(_))
    }
}
