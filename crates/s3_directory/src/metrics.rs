use std::sync::atomic::{AtomicU64, Ordering};

/// Dependency-free counters for the directory's block cache (see DESIGN.md for why this doesn't
/// pull in an external metrics crate).
#[derive(Default)]
pub struct DirectoryMetrics {
    block_cache_hits: AtomicU64,
    block_cache_misses: AtomicU64,
    blocks_fetched: AtomicU64,
    bytes_fetched: AtomicU64,
}

impl DirectoryMetrics {
    pub fn record_block_hit(&self) {
        self.block_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_miss(&self, bytes: u64) {
        self.block_cache_misses.fetch_add(1, Ordering::Relaxed);
        self.blocks_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn block_cache_hits(&self) -> u64 {
        self.block_cache_hits.load(Ordering::Relaxed)
    }

    pub fn block_cache_misses(&self) -> u64 {
        self.block_cache_misses.load(Ordering::Relaxed)
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }
}
