//! Black-box coverage of `S3Directory` through its public surface only: listing order, slice
//! correctness, and pre-population effectiveness.

use object_store::ObjectStoreConfig;
use s3_directory::{S3Directory, S3DirectoryConfig};
use std::io::Write;

fn open_directory(remote: &camino::Utf8Path, cache: &camino::Utf8Path, block_size: u64) -> S3Directory {
    let config = S3DirectoryConfig {
        object_store: ObjectStoreConfig::LocalFs {
            local_path: remote.to_path_buf(),
        },
        local_cache_path: cache.to_path_buf(),
        block_size,
        prepopulate_concurrency: 8,
    };
    S3Directory::open(config, None).unwrap()
}

#[test]
fn list_all_is_sorted_and_deduplicated() {
    let remote_dir = camino_tempfile::tempdir().unwrap();
    let cache_dir = camino_tempfile::tempdir().unwrap();

    for name in ["zeta.si", "alpha.fdt", "Beta.fnm"] {
        std::fs::write(remote_dir.path().join(name), b"x").unwrap();
    }

    let directory = open_directory(remote_dir.path(), cache_dir.path(), 1024);

    // One of the remote names is also opened as a Buffered writer under the same name; listAll
    // must still report it exactly once.
    let mut out = directory.create_output("new_buffered.seg").unwrap();
    out.write_all(b"fresh").unwrap();
    drop(out);

    let names = directory.list_all().unwrap();
    let mut expected: Vec<&str> = vec!["zeta.si", "alpha.fdt", "Beta.fnm", "new_buffered.seg"];
    expected.sort_by_key(|n| n.encode_utf16().collect::<Vec<u16>>());
    assert_eq!(names, expected);
}

#[test]
fn slice_correctness() {
    let remote_dir = camino_tempfile::tempdir().unwrap();
    let cache_dir = camino_tempfile::tempdir().unwrap();

    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(remote_dir.path().join("big.bin"), &data).unwrap();

    let directory = open_directory(remote_dir.path(), cache_dir.path(), 1024);

    let parent = directory.open_input("big.bin").unwrap();
    parent.seek(123);

    let slice = parent.slice(2000, 4000);
    slice.seek(0);
    let mut buf = vec![0u8; 4000];
    slice.read_bytes(&mut buf).unwrap();
    assert_eq!(buf, data[2000..6000]);

    // The parent reader's own position is untouched by reading through the slice.
    assert_eq!(parent.file_pointer(), 123);
}

#[test]
fn pre_population_seeds_first_and_last_blocks() {
    let remote_dir = camino_tempfile::tempdir().unwrap();
    let cache_dir = camino_tempfile::tempdir().unwrap();

    // 3 blocks at block_size=1024: first, middle, last.
    std::fs::write(remote_dir.path().join("small.si"), vec![3u8; 2500]).unwrap();

    let directory = open_directory(remote_dir.path(), cache_dir.path(), 1024);

    let reader = directory.open_input("small.si").unwrap();
    // Reading only within the pre-populated first block must not touch the object store again;
    // there is no way to observe that directly through the public API, but a correct read is a
    // necessary condition.
    reader.seek(0);
    let mut buf = [0u8; 100];
    reader.read_bytes(&mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 3));

    reader.seek(2400);
    let mut tail = [0u8; 100];
    reader.read_bytes(&mut tail).unwrap();
    assert!(tail.iter().all(|&b| b == 3));
}
