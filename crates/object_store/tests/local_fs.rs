use camino_tempfile::tempdir;
use object_store::{LocalFs, ObjectName, ObjectStore};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn put_list_get_delete_roundtrip() {
    let dir = tempdir().unwrap();
    let store = LocalFs::new(dir.path().to_path_buf()).unwrap();
    let cancel = CancellationToken::new();

    let local = tempdir().unwrap();
    let local_file = local.path().join("payload");
    std::fs::write(&local_file, b"hello object store").unwrap();

    let name = ObjectName::new("segments/seg.fdt");
    store
        .put(&name, &local_file, 19, &cancel)
        .await
        .expect("put should succeed");

    let listing = store.list(&cancel).await.unwrap();
    assert_eq!(listing.keys.len(), 1);
    assert_eq!(listing.keys[0].0, name);
    assert_eq!(listing.keys[0].1, 19);

    assert_eq!(store.head(&name, &cancel).await.unwrap(), 19);

    let bytes = store.get_range(&name, 6, 6, None, &cancel).await.unwrap();
    assert_eq!(bytes.as_ref(), b"object");

    store.delete(&name, &cancel).await.unwrap();
    assert!(store.list(&cancel).await.unwrap().keys.is_empty());
}

#[tokio::test]
async fn missing_key_is_not_found() {
    let dir = tempdir().unwrap();
    let store = LocalFs::new(dir.path().to_path_buf()).unwrap();
    let cancel = CancellationToken::new();

    let err = store
        .head(&ObjectName::new("nope"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, object_store::DownloadError::NotFound));
}

#[tokio::test]
async fn delete_of_missing_key_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = LocalFs::new(dir.path().to_path_buf()).unwrap();
    let cancel = CancellationToken::new();

    store.delete(&ObjectName::new("nope"), &cancel).await.unwrap();
}
