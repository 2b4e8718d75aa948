use std::collections::HashSet;
use std::sync::Mutex;

/// A fixed-size window into a logical file. Block `i` covers absolute bytes
/// `[i*block_size, min((i+1)*block_size, length))` — the last block may be short.
pub fn block_index(offset: u64, block_size: u64) -> u64 {
    offset / block_size
}

pub fn block_start(index: u64, block_size: u64) -> u64 {
    index * block_size
}

/// Length of block `index` in a file of `file_len` bytes.
pub fn block_len(index: u64, block_size: u64, file_len: u64) -> u64 {
    let start = block_start(index, block_size);
    block_size.min(file_len.saturating_sub(start))
}

pub fn block_count(file_len: u64, block_size: u64) -> u64 {
    file_len.div_ceil(block_size)
}

/// Every block index touched by the half-open byte range `[offset, offset + length)`.
pub fn blocks_touched(offset: u64, length: u64, block_size: u64) -> impl Iterator<Item = u64> {
    let first = block_index(offset, block_size);
    let last = if length == 0 {
        first
    } else {
        block_index(offset + length - 1, block_size)
    };
    first..=last
}

/// In-memory set of block indices present on disk for a single Cached file. Never stores absent
/// entries; inserts happen only after a successful fetch, and consistency failures must never
/// insert.
///
/// Shared between a root [`crate::S3IndexInput`] and every slice taken from it: a
/// `Mutex<HashSet<u64>>` is enough since presence checks and inserts are cheap and
/// never held across I/O.
#[derive(Default)]
pub struct BlockPresenceMap {
    present: Mutex<HashSet<u64>>,
}

impl BlockPresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the map with a known set of present blocks, e.g. from the pre-populator.
    pub fn with_blocks(blocks: impl IntoIterator<Item = u64>) -> Self {
        Self {
            present: Mutex::new(blocks.into_iter().collect()),
        }
    }

    pub fn contains(&self, index: u64) -> bool {
        self.present.lock().unwrap().contains(&index)
    }

    /// Idempotent: inserting an already-present block is a no-op, safe under concurrent racing
    /// fetches of the same block.
    pub fn insert(&self, index: u64) {
        self.present.lock().unwrap().insert(index);
    }

    pub fn snapshot(&self) -> HashSet<u64> {
        self.present.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.present.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
