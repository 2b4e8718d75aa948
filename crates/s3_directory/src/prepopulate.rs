//! Eager warm-up of first/last blocks for every remote object, run once on directory construction.
//! First and last blocks hold an index segment's header/footer metadata, so an initial read
//! touches them almost always; fetching them up front in parallel amortizes the per-block
//! round-trip latency the on-demand path would otherwise pay one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::{GenericObjectStore, ObjectName};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block_map::{block_count, block_len, BlockPresenceMap};
use crate::fs_cache::FSCache;

/// Runs the pre-population pass against every object `ObjectStore::list` currently reports,
/// bounded to `concurrency` simultaneous range-GETs. Returns one seeded [`BlockPresenceMap`] per
/// name, ready to hand to `S3Directory`'s Cached map.
pub(crate) fn prepopulate(
    rt: &Handle,
    object_store: &GenericObjectStore,
    cache: &FSCache,
    block_size: u64,
    concurrency: usize,
) -> anyhow::Result<HashMap<String, Arc<BlockPresenceMap>>> {
    rt.block_on(prepopulate_async(
        object_store,
        cache,
        block_size,
        concurrency,
    ))
}

async fn prepopulate_async(
    object_store: &GenericObjectStore,
    cache: &FSCache,
    block_size: u64,
    concurrency: usize,
) -> anyhow::Result<HashMap<String, Arc<BlockPresenceMap>>> {
    let cancel = CancellationToken::new();
    let listing = object_store.list(&cancel).await?;
    info!(objects = listing.keys.len(), "pre-populating first/last blocks");

    let limiter = Arc::new(Semaphore::new(concurrency.max(1)));
    let fetches = listing.keys.iter().map(|(name, size)| {
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        async move {
            let _permit = limiter.acquire().await.expect("semaphore never closed");
            match fetch_edge_blocks(object_store, cache, name, *size, block_size, &cancel).await {
                Ok(map) => Some((name.as_str().to_owned(), Arc::new(map))),
                Err(e) => {
                    warn!(%name, error = %e, "pre-population failed for object, leaving it on-demand");
                    None
                }
            }
        }
    });

    let results = futures::future::join_all(fetches).await;
    Ok(results.into_iter().flatten().collect())
}

async fn fetch_edge_blocks(
    object_store: &GenericObjectStore,
    cache: &FSCache,
    name: &ObjectName,
    size: u64,
    block_size: u64,
    cancel: &CancellationToken,
) -> anyhow::Result<BlockPresenceMap> {
    let reader = cache.open_or_create_sparse(name.as_str(), size)?;
    let map = BlockPresenceMap::new();

    if size == 0 {
        return Ok(map);
    }

    let last_block = block_count(size, block_size) - 1;
    let blocks_to_fetch = if last_block == 0 {
        vec![0]
    } else {
        vec![0, last_block]
    };

    for block_idx in blocks_to_fetch {
        let start = block_idx * block_size;
        let len = block_len(block_idx, block_size, size);
        let bytes = object_store
            .get_range(name, start, len, None, cancel)
            .await?;
        anyhow::ensure!(
            bytes.len() as u64 == len,
            "short range read for {name}: expected {len}, got {}",
            bytes.len()
        );
        reader.write_at_absolute(&bytes, start)?;
        map.insert(block_idx);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::ObjectStoreConfig;

    #[test]
    fn prepopulate_seeds_first_and_last_blocks_only() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();

        let data = vec![7u8; 10_000];
        std::fs::write(remote_dir.path().join("seg.fdt"), &data).unwrap();

        let object_store = rt
            .block_on(GenericObjectStore::from_config(&ObjectStoreConfig::LocalFs {
                local_path: remote_dir.path().to_path_buf(),
            }))
            .unwrap();
        let cache = FSCache::new(cache_dir.path().to_path_buf()).unwrap();

        let maps = prepopulate(rt.handle(), &object_store, &cache, 1024, 8).unwrap();
        let presence = maps.get("seg.fdt").expect("seg.fdt was pre-populated");

        // 10_000 bytes / 1024 = blocks 0..=9, last block index 9.
        assert!(presence.contains(0));
        assert!(presence.contains(9));
        assert_eq!(presence.len(), 2);
    }

    #[test]
    fn prepopulate_handles_single_block_objects() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        let remote_dir = camino_tempfile::tempdir().unwrap();
        let cache_dir = camino_tempfile::tempdir().unwrap();
        std::fs::write(remote_dir.path().join("seg.si"), vec![1u8; 100]).unwrap();

        let object_store = rt
            .block_on(GenericObjectStore::from_config(&ObjectStoreConfig::LocalFs {
                local_path: remote_dir.path().to_path_buf(),
            }))
            .unwrap();
        let cache = FSCache::new(cache_dir.path().to_path_buf()).unwrap();

        let maps = prepopulate(rt.handle(), &object_store, &cache, 1024, 8).unwrap();
        let presence = maps.get("seg.si").unwrap();
        assert_eq!(presence.len(), 1);
        assert!(presence.contains(0));
    }
}
