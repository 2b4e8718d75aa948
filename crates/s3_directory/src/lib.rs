//! A POSIX-ish file directory over a remote object store, for an immutable segment-based search
//! index engine. See `directory::S3Directory` for the entry point.
//!
//! Three tiers do the work: a write-through local buffer for newly created files, a
//! block-addressable sparse-file read cache for everything else, and the pre-populator that
//! warms the first/last block of every remote object on open.
#![deny(unsafe_code)]

mod block_map;
mod config;
mod directory;
mod error;
mod fs_cache;
mod index_input;
mod index_output;
mod metrics;
mod prepopulate;

pub use config::{S3DirectoryConfig, DEFAULT_BLOCK_SIZE};
pub use directory::{S3Directory, S3Reader};
pub use error::{DirectoryError, Result};
pub use fs_cache::FileLock;
pub use index_input::S3IndexInput;
pub use index_output::S3IndexOutput;
pub use metrics::DirectoryMetrics;
