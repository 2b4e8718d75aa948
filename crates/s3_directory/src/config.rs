use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Default block size: 1 MiB. Historical variants used 4 KiB, 128 KiB, or 256 KiB; callers that
/// need one of those pass `block_size` explicitly.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Construction parameters for [`crate::S3Directory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3DirectoryConfig {
    pub object_store: object_store::ObjectStoreConfig,
    /// Where buffered/synced/cached files live on local disk.
    pub local_cache_path: Utf8PathBuf,
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Bound on concurrent range-GETs issued by the pre-populator.
    #[serde(default = "default_prepopulate_concurrency")]
    pub prepopulate_concurrency: usize,
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_prepopulate_concurrency() -> usize {
    32
}
