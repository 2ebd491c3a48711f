//! Permission-gated storage client.
//!
//! A [`StorageHandle`] binds one bucket identity and one declared permission
//! set to a backend. Every call checks the declared permission first and only
//! then talks to the service; remote failures come back classified as
//! [`StorageError`].

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;

use crate::domain::identity::BucketIdentity;
use crate::domain::operation::Operation;
use crate::domain::permission::PermissionSet;
use crate::domain::storage::{
  classify, CompletedPartRef, ObjectBackend, ObjectInfo, ObjectSummary, PutOptions, RemoteError,
  StorageError,
};

pub const FOLDER_CONTENT_TYPE: &str = "application/x-directory";
pub const EXPIRES_AT_METADATA: &str = "expires-at";

const MIB: usize = 1024 * 1024;

/// Where declared permissions are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Enforcement {
  /// Refuse disallowed calls locally, before any network traffic
  #[default]
  Local,
  /// Send every call and let the service decide
  RemoteOnly,
}

#[derive(Debug, Clone)]
pub struct HandleOptions {
  pub enforcement: Enforcement,
  /// Payloads of at least this many bytes go through multipart upload
  pub multipart_threshold: usize,
  pub part_size: usize,
  /// Stamped on uploads as `expires-at` metadata
  pub ttl: Option<Duration>,
}

impl Default for HandleOptions {
  fn default() -> Self {
    Self {
      enforcement: Enforcement::Local,
      multipart_threshold: 8 * MIB,
      part_size: 5 * MIB,
      ttl: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
  pub bytes: u64,
  pub sha256: String,
}

/// Normalise a folder prefix to `name/`.
pub fn folder_key(prefix: &str) -> String {
  format!("{}/", prefix.trim_end_matches('/'))
}

pub fn sha256_hex(data: &[u8]) -> String {
  format!("{:x}", Sha256::digest(data))
}

#[derive(Clone)]
pub struct StorageHandle {
  identity: BucketIdentity,
  permissions: PermissionSet,
  backend: Arc<dyn ObjectBackend>,
  options: HandleOptions,
}

impl std::fmt::Debug for StorageHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StorageHandle")
      .field("identity", &self.identity)
      .field("permissions", &self.permissions)
      .field("bucket", &self.backend.bucket())
      .field("options", &self.options)
      .finish()
  }
}

impl StorageHandle {
  pub fn new(
    identity: BucketIdentity,
    permissions: PermissionSet,
    backend: Arc<dyn ObjectBackend>,
    options: HandleOptions,
  ) -> Self {
    Self {
      identity,
      permissions,
      backend,
      options,
    }
  }

  pub fn identity(&self) -> &BucketIdentity {
    &self.identity
  }

  pub fn permissions(&self) -> PermissionSet {
    self.permissions
  }

  pub fn options(&self) -> &HandleOptions {
    &self.options
  }

  /// Whether this handle would attempt `operation` locally.
  pub fn may(&self, operation: Operation) -> bool {
    self.options.enforcement == Enforcement::RemoteOnly
      || self.permissions.contains(&operation.required())
  }

  fn authorize(&self, operation: Operation, key: &str) -> Result<(), StorageError> {
    if self.may(operation) {
      tracing::debug!(
        "{} '{}' in bucket '{}'",
        operation,
        key,
        self.backend.bucket()
      );
      return Ok(());
    }
    let missing = self.permissions.missing(&operation.required());
    tracing::debug!(
      "Refusing {} on '{}' for '{}': missing {:?}",
      operation,
      key,
      self.identity.name,
      missing
    );
    Err(StorageError::AccessDenied {
      operation,
      key: key.to_string(),
    })
  }

  fn fail(&self, operation: Operation, key: &str, err: RemoteError) -> StorageError {
    let classified = classify(operation, key, err);
    match &classified {
      StorageError::OperationFailed { .. } => {
        tracing::error!("'{}': {}", self.identity.name, classified)
      },
      StorageError::AccessDenied { .. } => {
        tracing::warn!("'{}': {}", self.identity.name, classified)
      },
      _ => tracing::debug!("'{}': {}", self.identity.name, classified),
    }
    classified
  }

  fn put_options(&self, content_type: &str, metadata: HashMap<String, String>) -> PutOptions {
    let mut metadata = metadata;
    if let Some(ttl) = self.options.ttl {
      let expires_at = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl));
      if let Some(expires_at) = expires_at {
        metadata.insert(EXPIRES_AT_METADATA.to_string(), expires_at.to_rfc3339());
      }
    }
    PutOptions {
      content_type: Some(content_type.to_string()),
      metadata,
    }
  }

  async fn put(
    &self,
    operation: Operation,
    key: &str,
    content: Bytes,
    options: PutOptions,
  ) -> Result<(), StorageError> {
    if !content.is_empty() && content.len() >= self.options.multipart_threshold {
      let total = content.len() as u64;
      return self
        .multipart_upload(operation, key, std::io::Cursor::new(content), total, options)
        .await;
    }
    self
      .backend
      .put_object(key, content, &options)
      .await
      .map_err(|e| self.fail(operation, key, e))
  }

  pub async fn upload(&self, key: &str, content: Bytes, content_type: &str) -> Result<(), StorageError> {
    self
      .upload_with_metadata(key, content, content_type, HashMap::new())
      .await
  }

  pub async fn upload_with_metadata(
    &self,
    key: &str,
    content: Bytes,
    content_type: &str,
    metadata: HashMap<String, String>,
  ) -> Result<(), StorageError> {
    self.authorize(Operation::Upload, key)?;
    let options = self.put_options(content_type, metadata);
    self.put(Operation::Upload, key, content, options).await
  }

  /// Upload through the multipart path regardless of size
  pub async fn upload_large(
    &self,
    key: &str,
    content: Bytes,
    content_type: &str,
  ) -> Result<(), StorageError> {
    self.authorize(Operation::LargeUpload, key)?;
    let options = self.put_options(content_type, HashMap::new());
    if content.is_empty() {
      return self
        .backend
        .put_object(key, content, &options)
        .await
        .map_err(|e| self.fail(Operation::LargeUpload, key, e));
    }
    let total = content.len() as u64;
    self
      .multipart_upload(
        Operation::LargeUpload,
        key,
        std::io::Cursor::new(content),
        total,
        options,
      )
      .await
  }

  /// Upload a local file, splitting it into parts when its size calls for it
  pub async fn upload_file(
    &self,
    key: &str,
    path: &Path,
    content_type: &str,
  ) -> Result<(), StorageError> {
    let size = tokio::fs::metadata(path).await?.len();
    let large = size > 0 && size >= self.options.multipart_threshold as u64;
    let operation = if large {
      Operation::LargeUpload
    } else {
      Operation::Upload
    };
    self.authorize(operation, key)?;
    let options = self.put_options(content_type, HashMap::new());

    if large {
      let file = tokio::fs::File::open(path).await?;
      return self
        .multipart_upload(operation, key, file, size, options)
        .await;
    }
    let content = Bytes::from(tokio::fs::read(path).await?);
    self
      .backend
      .put_object(key, content, &options)
      .await
      .map_err(|e| self.fail(operation, key, e))
  }

  async fn multipart_upload<R>(
    &self,
    operation: Operation,
    key: &str,
    reader: R,
    total: u64,
    options: PutOptions,
  ) -> Result<(), StorageError>
  where
    R: AsyncRead + Send + Unpin,
  {
    let upload_id = self
      .backend
      .create_multipart_upload(key, &options)
      .await
      .map_err(|e| self.fail(operation, key, e))?;

    let parts = match self
      .upload_parts(operation, key, &upload_id, reader, total)
      .await
    {
      Ok(parts) => parts,
      Err(err) => {
        self.abort_upload(key, &upload_id).await;
        return Err(err);
      },
    };

    tracing::debug!(
      "Completing multipart upload of '{}' ({} parts, {} bytes)",
      key,
      parts.len(),
      total
    );
    if let Err(e) = self
      .backend
      .complete_multipart_upload(key, &upload_id, parts)
      .await
    {
      self.abort_upload(key, &upload_id).await;
      return Err(self.fail(operation, key, e));
    }
    Ok(())
  }

  async fn upload_parts<R>(
    &self,
    operation: Operation,
    key: &str,
    upload_id: &str,
    mut reader: R,
    total: u64,
  ) -> Result<Vec<CompletedPartRef>, StorageError>
  where
    R: AsyncRead + Send + Unpin,
  {
    let part_size = self.options.part_size.max(1) as u64;
    let mut parts = Vec::new();
    let mut remaining = total;
    let mut part_number = 1;

    while remaining > 0 {
      let length = remaining.min(part_size) as usize;
      let mut buffer = vec![0u8; length];
      reader.read_exact(&mut buffer).await?;

      let e_tag = self
        .backend
        .upload_part(key, upload_id, part_number, Bytes::from(buffer))
        .await
        .map_err(|e| self.fail(operation, key, e))?;
      parts.push(CompletedPartRef { part_number, e_tag });

      remaining -= length as u64;
      part_number += 1;
    }
    Ok(parts)
  }

  async fn abort_upload(&self, key: &str, upload_id: &str) {
    if let Err(e) = self.backend.abort_multipart_upload(key, upload_id).await {
      tracing::warn!(
        "Failed to abort multipart upload {} of '{}': {}",
        upload_id,
        key,
        e
      );
    }
  }

  pub async fn create_folder(&self, prefix: &str) -> Result<(), StorageError> {
    let key = folder_key(prefix);
    self.authorize(Operation::CreateFolder, &key)?;
    let options = self.put_options(FOLDER_CONTENT_TYPE, HashMap::new());
    self
      .backend
      .put_object(&key, Bytes::new(), &options)
      .await
      .map_err(|e| self.fail(Operation::CreateFolder, &key, e))
  }

  /// Replace an object's content entirely
  pub async fn overwrite(
    &self,
    key: &str,
    content: Bytes,
    content_type: &str,
  ) -> Result<(), StorageError> {
    self.authorize(Operation::Overwrite, key)?;
    let options = self.put_options(content_type, HashMap::new());
    self.put(Operation::Overwrite, key, content, options).await
  }

  async fn read_object(&self, operation: Operation, key: &str) -> Result<Bytes, StorageError> {
    let mut reader = self
      .backend
      .get_object(key)
      .await
      .map_err(|e| self.fail(operation, key, e))?;

    let mut content = Vec::new();
    // a broken body stream is a transport problem, not a local one
    reader
      .read_to_end(&mut content)
      .await
      .map_err(|e| self.fail(operation, key, RemoteError::transport(e.to_string())))?;
    Ok(Bytes::from(content))
  }

  pub async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
    self.authorize(Operation::Download, key)?;
    self.read_object(Operation::Download, key).await
  }

  /// Stream an object into a local file, hashing it on the way
  pub async fn download_to_file(
    &self,
    key: &str,
    path: &Path,
  ) -> Result<DownloadSummary, StorageError> {
    self.authorize(Operation::Download, key)?;
    let reader = self
      .backend
      .get_object(key)
      .await
      .map_err(|e| self.fail(Operation::Download, key, e))?;

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = ReaderStream::new(reader);
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;

    while let Some(chunk) = stream.next().await {
      let chunk = chunk.map_err(|e| {
        self.fail(Operation::Download, key, RemoteError::transport(e.to_string()))
      })?;
      hasher.update(&chunk);
      file.write_all(&chunk).await?;
      bytes += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(DownloadSummary {
      bytes,
      sha256: format!("{:x}", hasher.finalize()),
    })
  }

  /// Object body as text, lossily decoded
  pub async fn get_content(&self, key: &str) -> Result<String, StorageError> {
    self.authorize(Operation::GetContent, key)?;
    let content = self.read_object(Operation::GetContent, key).await?;
    Ok(String::from_utf8_lossy(&content).into_owned())
  }

  pub async fn get_info(&self, key: &str) -> Result<ObjectInfo, StorageError> {
    self.authorize(Operation::GetInfo, key)?;
    self
      .backend
      .head_object(key)
      .await
      .map_err(|e| self.fail(Operation::GetInfo, key, e))
  }

  pub async fn get_metadata(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
    self.authorize(Operation::GetMetadata, key)?;
    self
      .backend
      .head_object(key)
      .await
      .map(|info| info.metadata)
      .map_err(|e| self.fail(Operation::GetMetadata, key, e))
  }

  pub async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StorageError> {
    self.authorize(Operation::List, prefix)?;
    self
      .backend
      .list_objects(prefix, None)
      .await
      .map_err(|e| self.fail(Operation::List, prefix, e))
  }

  pub async fn folder_exists(&self, prefix: &str) -> Result<bool, StorageError> {
    let key = folder_key(prefix);
    self.authorize(Operation::CheckFolderExists, &key)?;
    self
      .backend
      .list_objects(&key, Some(1))
      .await
      .map(|objects| !objects.is_empty())
      .map_err(|e| self.fail(Operation::CheckFolderExists, &key, e))
  }

  pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
    self.authorize(Operation::DeleteObject, key)?;
    self
      .backend
      .delete_object(key)
      .await
      .map_err(|e| self.fail(Operation::DeleteObject, key, e))
  }

  /// Enumerate everything under `prefix`, then delete it.
  /// Nothing is deleted unless the listing succeeds.
  async fn delete_all(&self, operation: Operation, prefix: &str) -> Result<usize, StorageError> {
    let objects = self
      .backend
      .list_objects(prefix, None)
      .await
      .map_err(|e| self.fail(operation, prefix, e))?;

    for object in &objects {
      self
        .backend
        .delete_object(&object.key)
        .await
        .map_err(|e| self.fail(operation, &object.key, e))?;
    }
    tracing::debug!("{} removed {} object(s) under '{}'", operation, objects.len(), prefix);
    Ok(objects.len())
  }

  /// Delete a folder marker and everything below it. Returns the number of
  /// objects removed.
  pub async fn delete_folder(&self, prefix: &str) -> Result<usize, StorageError> {
    let key = folder_key(prefix);
    self.authorize(Operation::DeleteFolder, &key)?;
    self.delete_all(Operation::DeleteFolder, &key).await
  }

  /// Copy then delete the source. A failed delete removes the copy again.
  pub async fn move_object(&self, src_key: &str, dst_key: &str) -> Result<(), StorageError> {
    self.authorize(Operation::Move, src_key)?;
    self
      .backend
      .copy_object(src_key, dst_key)
      .await
      .map_err(|e| self.fail(Operation::Move, src_key, e))?;

    if let Err(e) = self.backend.delete_object(src_key).await {
      if let Err(undo) = self.backend.delete_object(dst_key).await {
        tracing::warn!(
          "Move of '{}' left a copy at '{}': {}",
          src_key,
          dst_key,
          undo
        );
      }
      return Err(self.fail(Operation::Move, src_key, e));
    }
    Ok(())
  }

  /// Remove every object under `prefix`; an empty prefix empties the bucket.
  pub async fn clean_bucket(&self, prefix: &str) -> Result<usize, StorageError> {
    self.authorize(Operation::CleanBucket, prefix)?;
    self.delete_all(Operation::CleanBucket, prefix).await
  }
}
