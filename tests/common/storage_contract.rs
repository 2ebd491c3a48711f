//! Shared storage contract test helpers.
//!
//! Each helper takes a handle with full permissions on an empty bucket and a
//! prefix of its own, so memory and container-backed tests share the logic.

use bytes::Bytes;

use s3_permcheck::domain::handle::{sha256_hex, StorageHandle, EXPIRES_AT_METADATA};
use s3_permcheck::domain::storage::ErrorKind;

#[allow(dead_code)]
pub async fn run_round_trip(handle: &StorageHandle, prefix: &str) {
  let key = format!("{}/hello.txt", prefix);
  let data = Bytes::from_static(b"Hello, permission check!");

  let err = handle.download(&key).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound, "missing object: {}", err);

  handle
    .upload(&key, data.clone(), "text/plain")
    .await
    .expect("Failed to upload");

  assert_eq!(handle.download(&key).await.expect("Failed to download"), data);
  assert_eq!(
    handle.get_content(&key).await.expect("Failed to get content"),
    "Hello, permission check!"
  );

  let info = handle.get_info(&key).await.expect("Failed to get info");
  assert_eq!(info.size, data.len() as u64);
  assert_eq!(info.content_type.as_deref(), Some("text/plain"));

  let listed = handle.list_objects(prefix).await.expect("Failed to list");
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0].key, key);

  handle.delete_object(&key).await.expect("Failed to delete");
  let err = handle.get_info(&key).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound, "deleted object: {}", err);
}

#[allow(dead_code)]
pub async fn run_overwrite_and_metadata(handle: &StorageHandle, prefix: &str) {
  let key = format!("{}/doc.txt", prefix);
  let metadata = [("owner".to_string(), "permcheck".to_string())]
    .into_iter()
    .collect();

  handle
    .upload_with_metadata(&key, Bytes::from_static(b"v1"), "text/plain", metadata)
    .await
    .expect("Failed to upload");
  let stored = handle.get_metadata(&key).await.expect("Failed to get metadata");
  assert_eq!(stored.get("owner").map(String::as_str), Some("permcheck"));
  assert!(!stored.contains_key(EXPIRES_AT_METADATA));

  handle
    .overwrite(&key, Bytes::from_static(b"version two"), "text/plain")
    .await
    .expect("Failed to overwrite");
  assert_eq!(
    handle.get_content(&key).await.expect("Failed to get content"),
    "version two"
  );
}

#[allow(dead_code)]
pub async fn run_move(handle: &StorageHandle, prefix: &str) {
  let src = format!("{}/src.txt", prefix);
  let dst = format!("{}/dst.txt", prefix);

  handle
    .upload(&src, Bytes::from_static(b"moving"), "text/plain")
    .await
    .expect("Failed to upload");
  handle.move_object(&src, &dst).await.expect("Failed to move");

  assert_eq!(
    handle.get_info(&src).await.unwrap_err().kind(),
    ErrorKind::NotFound
  );
  assert_eq!(
    handle.download(&dst).await.expect("Failed to download"),
    Bytes::from_static(b"moving")
  );
}

/// Payload well above the handle's multipart threshold
#[allow(dead_code)]
pub async fn run_large_upload(handle: &StorageHandle, prefix: &str) {
  let key = format!("{}/large.bin", prefix);
  let size = handle.options().multipart_threshold * 3 + 7;
  let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
  let expected = sha256_hex(&data);

  handle
    .upload_large(&key, Bytes::from(data), "application/octet-stream")
    .await
    .expect("Failed to upload large object");

  let dir = tempfile::tempdir().unwrap();
  let summary = handle
    .download_to_file(&key, &dir.path().join("large.bin"))
    .await
    .expect("Failed to download large object");
  assert_eq!(summary.bytes, size as u64);
  assert_eq!(summary.sha256, expected);
}

#[allow(dead_code)]
pub async fn run_folder_lifecycle(handle: &StorageHandle, prefix: &str) {
  let folder = format!("{}/folder", prefix);

  assert!(!handle.folder_exists(&folder).await.expect("Failed to check folder"));
  handle
    .create_folder(&folder)
    .await
    .expect("Failed to create folder");
  assert!(handle.folder_exists(&folder).await.expect("Failed to check folder"));

  for name in ["a.txt", "b.txt"] {
    handle
      .upload(&format!("{}/{}", folder, name), Bytes::from_static(b"x"), "text/plain")
      .await
      .expect("Failed to upload");
  }

  let removed = handle
    .delete_folder(&folder)
    .await
    .expect("Failed to delete folder");
  assert_eq!(removed, 3, "marker and two files");
  assert!(!handle.folder_exists(&folder).await.expect("Failed to check folder"));

  handle
    .upload(&format!("{}/left.txt", prefix), Bytes::from_static(b"x"), "text/plain")
    .await
    .expect("Failed to upload");
  assert_eq!(handle.clean_bucket(prefix).await.expect("Failed to clean"), 1);
  assert!(handle.list_objects(prefix).await.expect("Failed to list").is_empty());
}
