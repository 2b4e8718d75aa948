use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Configuration for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket_name: String,
    pub bucket_region: String,
    /// Key prefix applied to every object this store reads or writes. Normalized to end in
    /// exactly one `/` by [`crate::S3Bucket::new`].
    pub prefix_in_bucket: String,
    /// Override for non-AWS S3-compatible endpoints (MinIO, etc).
    pub endpoint: Option<String>,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

fn default_concurrency_limit() -> usize {
    crate::metrics::DEFAULT_S3_CONCURRENCY_LIMIT
}

/// Top-level, TOML-deserializable configuration for [`crate::GenericObjectStore::from_config`].
/// S3 and local-filesystem backends only; no Azure Blob variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ObjectStoreConfig {
    LocalFs { local_path: Utf8PathBuf },
    S3(S3Config),
}
