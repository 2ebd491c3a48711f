use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::domain::identity::BucketIdentity;
use crate::domain::operation::Operation;

/// Normalised error kinds compared by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
  AccessDenied,
  NotFound,
  OperationFailed,
  Unknown,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::AccessDenied => "AccessDenied",
      ErrorKind::NotFound => "NotFound",
      ErrorKind::OperationFailed => "OperationFailed",
      ErrorKind::Unknown => "Unknown",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("Access denied: {operation} on '{key}'")]
  AccessDenied { operation: Operation, key: String },
  #[error("Object '{key}' not found.")]
  NotFound { key: String },
  #[error("{operation} failed: {message}")]
  OperationFailed {
    operation: Operation,
    code: Option<String>,
    message: String,
  },
  #[error("Local fixture error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Storage client setup failed: {0}")]
  Setup(String),
}

/// Remote codes that mean the service account ran out of room or money.
/// Failures with these codes say nothing about permission semantics.
const INFRASTRUCTURE_CODES: &[&str] = &[
  "QuotaExceeded",
  "InsufficientBalance",
  "AccountProblem",
  "XMinioStorageFull",
];

const TRANSIENT_CODES: &[&str] = &[
  "SlowDown",
  "ServiceUnavailable",
  "InternalError",
  "RequestTimeout",
  "Throttling",
];

impl StorageError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      StorageError::AccessDenied { .. } => ErrorKind::AccessDenied,
      StorageError::NotFound { .. } => ErrorKind::NotFound,
      StorageError::OperationFailed { .. } => ErrorKind::OperationFailed,
      StorageError::Io(_) | StorageError::Setup(_) => ErrorKind::Unknown,
    }
  }

  pub fn code(&self) -> Option<&str> {
    match self {
      StorageError::OperationFailed { code, .. } => code.as_deref(),
      _ => None,
    }
  }

  /// Worth another attempt by the caller. Permission outcomes never are.
  pub fn is_transient(&self) -> bool {
    match self {
      StorageError::OperationFailed { code: None, .. } => true,
      StorageError::OperationFailed {
        code: Some(code), ..
      } => TRANSIENT_CODES.contains(&code.as_str()),
      _ => false,
    }
  }

  pub fn is_infrastructure(&self) -> bool {
    self
      .code()
      .map(|code| INFRASTRUCTURE_CODES.contains(&code))
      .unwrap_or(false)
  }

  pub(crate) fn timed_out(operation: Operation, timeout: std::time::Duration) -> Self {
    StorageError::OperationFailed {
      operation,
      code: Some("RequestTimeout".to_string()),
      message: format!("timed out after {}ms", timeout.as_millis()),
    }
  }
}

/// Raw failure reported by a backend before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
  pub code: Option<String>,
  pub status: Option<u16>,
  pub message: String,
}

impl RemoteError {
  pub fn new(code: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
    Self {
      code: Some(code.into()),
      status: Some(status),
      message: message.into(),
    }
  }

  pub fn access_denied(message: impl Into<String>) -> Self {
    Self::new("AccessDenied", 403, message)
  }

  pub fn no_such_key(key: &str) -> Self {
    Self::new("NoSuchKey", 404, format!("The specified key does not exist: {}", key))
  }

  /// Failure below the protocol layer: no code and no status.
  pub fn transport(message: impl Into<String>) -> Self {
    Self {
      code: None,
      status: None,
      message: message.into(),
    }
  }
}

/// Map a remote failure onto the normalised taxonomy.
pub fn classify(operation: Operation, key: &str, err: RemoteError) -> StorageError {
  let code = err.code.as_deref();
  let not_found = matches!(
    code,
    Some("NoSuchKey" | "NotFound" | "NoSuchBucket" | "NoSuchUpload")
  ) || (code.is_none() && err.status == Some(404));
  let denied = matches!(code, Some("AccessDenied" | "Forbidden" | "AllAccessDisabled"))
    || (code.is_none() && err.status == Some(403));

  if not_found {
    return StorageError::NotFound {
      key: key.to_string(),
    };
  }
  if denied {
    return StorageError::AccessDenied {
      operation,
      key: key.to_string(),
    };
  }

  let code = match (err.code, err.status) {
    (Some(code), _) => Some(code),
    // 5xx without a code body is still worth retrying
    (None, Some(status)) if status >= 500 => Some("ServiceUnavailable".to_string()),
    (None, Some(status)) => Some(format!("Http{}", status)),
    (None, None) => None,
  };
  StorageError::OperationFailed {
    operation,
    code,
    message: err.message,
  }
}

/// HEAD-level view of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
  pub key: String,
  pub size: u64,
  pub content_type: Option<String>,
  pub e_tag: Option<String>,
  /// Seconds since the Unix epoch
  pub last_modified: Option<i64>,
  pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
  pub key: String,
  pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
  pub content_type: Option<String>,
  pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartRef {
  pub part_number: i32,
  pub e_tag: String,
}

/// Low-level object store bound to one bucket and one credential set.
///
/// Implementations report raw failures; classification and permission checks
/// happen in [`crate::domain::handle::StorageHandle`].
#[async_trait]
pub trait ObjectBackend: Send + Sync + 'static {
  fn bucket(&self) -> &str;

  async fn put_object(&self, key: &str, body: Bytes, options: &PutOptions)
    -> Result<(), RemoteError>;

  /// Retrieve object as a stream
  async fn get_object(&self, key: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, RemoteError>;

  async fn head_object(&self, key: &str) -> Result<ObjectInfo, RemoteError>;

  /// List every object under `prefix`, following pagination.
  /// `max_keys` stops after the first page of that size.
  async fn list_objects(
    &self,
    prefix: &str,
    max_keys: Option<i32>,
  ) -> Result<Vec<ObjectSummary>, RemoteError>;

  async fn delete_object(&self, key: &str) -> Result<(), RemoteError>;

  async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<(), RemoteError>;

  /// Returns the upload id
  async fn create_multipart_upload(
    &self,
    key: &str,
    options: &PutOptions,
  ) -> Result<String, RemoteError>;

  /// Returns the part's ETag
  async fn upload_part(
    &self,
    key: &str,
    upload_id: &str,
    part_number: i32,
    body: Bytes,
  ) -> Result<String, RemoteError>;

  async fn complete_multipart_upload(
    &self,
    key: &str,
    upload_id: &str,
    parts: Vec<CompletedPartRef>,
  ) -> Result<(), RemoteError>;

  async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), RemoteError>;
}

/// Builds a backend for a bucket identity.
#[async_trait]
pub trait BackendConnector: Send + Sync {
  async fn connect(&self, identity: &BucketIdentity)
    -> Result<Arc<dyn ObjectBackend>, StorageError>;
}
