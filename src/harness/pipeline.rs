//! One parameterised procedure for every operation:
//! setup → act → verify → cleanup, with cleanup on every exit path.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tempfile::TempDir;

use crate::domain::handle::{folder_key, sha256_hex, StorageHandle};
use crate::domain::operation::Operation;
use crate::domain::outcome::{
  Expectation, OperationOutcome, TestVerdict, VerdictStatus, Verification,
};
use crate::domain::permission::{Permission, PermissionSet};
use crate::domain::reconciler::{describe, expectation, reconcile};
use crate::domain::storage::{ErrorKind, ObjectInfo, ObjectSummary, StorageError};
use crate::harness::matrix::TestCase;
use crate::harness::retry::RetryPolicy;

pub const CASE_METADATA: &str = "permcheck-case";

/// Handles and policy shared by every case of one bucket.
pub struct CaseContext<'a> {
  /// Holds the declared permissions under test
  pub subject: &'a StorageHandle,
  /// Full access; seeds fixtures, inspects state and cleans up
  pub admin: Option<&'a StorageHandle>,
  pub retry: RetryPolicy,
  pub run_prefix: &'a str,
}

impl CaseContext<'_> {
  /// Whoever can see the real state: the admin when configured
  pub fn observer(&self) -> &StorageHandle {
    self.admin.unwrap_or(self.subject)
  }

  /// Unique per case and run: `{run_prefix}/{id}-{millis}`
  pub fn namespace(&self, id: &str) -> String {
    format!(
      "{}/{}-{}",
      self.run_prefix,
      id,
      chrono::Utc::now().timestamp_millis()
    )
  }

  /// Remove everything under `namespace`. Never affects a verdict.
  pub async fn cleanup(&self, namespace: &str) {
    let cleaner = self.observer();
    if !cleaner.may(Operation::CleanBucket) {
      tracing::warn!(
        "No credential may clean up '{}'; fixtures left behind",
        namespace
      );
      return;
    }
    let prefix = folder_key(namespace);
    let (result, _) = self
      .retry
      .run(Operation::CleanBucket, || cleaner.clean_bucket(&prefix))
      .await;
    match result {
      Ok(removed) => tracing::debug!("Cleaned up {} object(s) under '{}'", removed, namespace),
      Err(e) => tracing::warn!("Cleanup of '{}' failed: {}", namespace, e),
    }
  }
}

/// Keys and payloads one case works with.
struct Fixture {
  case_id: String,
  key: String,
  folder: String,
  target: String,
  content: Bytes,
  replacement: Bytes,
  seeded: Vec<String>,
  upload: Option<LocalFile>,
}

/// Generated source file for large uploads; removed with the case.
struct LocalFile {
  dir: TempDir,
  path: PathBuf,
  size: u64,
  sha256: String,
}

enum ActOutput {
  Done,
  Content(Bytes),
  Text(String),
  Info(ObjectInfo),
  Metadata(HashMap<String, String>),
  Listing(Vec<ObjectSummary>),
  Exists(bool),
  Removed(usize),
}

pub async fn run_case(case: &TestCase, ctx: &CaseContext<'_>) -> TestVerdict {
  let started = Instant::now();
  let namespace = ctx.namespace(&case.id);
  let expected = expectation(&case.permissions, case.operation);
  tracing::debug!("{}: {} under '{}'", case.id, case.operation, namespace);

  let verdict = match setup(case, ctx, &namespace).await {
    Ok(fixture) => {
      let (result, attempts) = ctx
        .retry
        .run(case.operation, || act(case.operation, ctx.subject, &fixture))
        .await;
      let actual = OperationOutcome::from_result(&result);
      let verification = verify(case.operation, ctx, &fixture, &result).await;
      build_verdict(
        &case.id,
        case.operation,
        case.permissions,
        expected,
        actual,
        verification,
        attempts,
        started,
      )
    },
    Err(err) => {
      tracing::warn!("{}: fixture setup failed: {}", case.id, err);
      skipped_verdict(
        &case.id,
        case.operation,
        case.permissions,
        expected,
        OperationOutcome::failure(&err),
        format!("fixture setup failed: {}", err),
        started,
      )
    },
  };

  ctx.cleanup(&namespace).await;
  verdict
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn build_verdict(
  test_id: &str,
  operation: Operation,
  permissions: PermissionSet,
  expected: Expectation,
  actual: OperationOutcome,
  verification: Verification,
  attempts: u32,
  started: Instant,
) -> TestVerdict {
  let status = reconcile(expected, &actual, &verification);
  TestVerdict {
    test_id: test_id.to_string(),
    description: describe(expected, &actual, &verification, &status),
    operation: operation.to_string(),
    permissions: permissions.label(),
    expected,
    actual,
    status,
    verification,
    attempts,
    duration_ms: started.elapsed().as_millis() as u64,
  }
}

pub(crate) fn skipped_verdict(
  test_id: &str,
  operation: Operation,
  permissions: PermissionSet,
  expected: Expectation,
  actual: OperationOutcome,
  reason: String,
  started: Instant,
) -> TestVerdict {
  TestVerdict {
    test_id: test_id.to_string(),
    description: reason.clone(),
    operation: operation.to_string(),
    permissions: permissions.label(),
    expected,
    actual,
    status: VerdictStatus::Skipped { reason },
    verification: Verification::NotRequired,
    attempts: 0,
    duration_ms: started.elapsed().as_millis() as u64,
  }
}

async fn setup(
  case: &TestCase,
  ctx: &CaseContext<'_>,
  namespace: &str,
) -> Result<Fixture, StorageError> {
  let key = format!("{}/object.txt", namespace);
  let folder = match case.operation {
    Operation::CleanBucket => format!("{}/clean", namespace),
    _ => format!("{}/folder", namespace),
  };
  let mut fixture = Fixture {
    case_id: case.id.clone(),
    target: format!("{}/moved.txt", namespace),
    content: Bytes::from(format!("permcheck fixture for {}", case.id)),
    replacement: Bytes::from(format!("replacement for {}", case.id)),
    seeded: Vec::new(),
    upload: None,
    key,
    folder,
  };

  let seeds: Vec<String> = match case.operation {
    Operation::Upload | Operation::CreateFolder => Vec::new(),
    Operation::LargeUpload => {
      fixture.upload = Some(generate_file(ctx.subject).await?);
      Vec::new()
    },
    Operation::Overwrite
    | Operation::Download
    | Operation::GetInfo
    | Operation::GetMetadata
    | Operation::GetContent
    | Operation::DeleteObject
    | Operation::Move => vec![fixture.key.clone()],
    Operation::List | Operation::CheckFolderExists | Operation::DeleteFolder => vec![
      folder_key(&fixture.folder),
      format!("{}/a.txt", fixture.folder),
      format!("{}/b.txt", fixture.folder),
    ],
    Operation::CleanBucket => vec![
      format!("{}/a.txt", fixture.folder),
      format!("{}/b.txt", fixture.folder),
    ],
  };

  let seeder = ctx.observer();
  for key in &seeds {
    let content = if key.ends_with('/') {
      Bytes::new()
    } else {
      fixture.content.clone()
    };
    let metadata = HashMap::from([(CASE_METADATA.to_string(), case.id.clone())]);
    let (result, _) = ctx
      .retry
      .run(Operation::Upload, || {
        seeder.upload_with_metadata(key, content.clone(), "text/plain", metadata.clone())
      })
      .await;
    result?;
  }
  fixture.seeded = seeds;
  Ok(fixture)
}

/// A file just big enough to take the multipart path
async fn generate_file(subject: &StorageHandle) -> Result<LocalFile, StorageError> {
  let options = subject.options();
  let size = options.multipart_threshold + options.part_size / 2 + 1;
  let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
  let sha256 = sha256_hex(&data);

  let dir = tempfile::tempdir()?;
  let path = dir.path().join("large-upload.bin");
  tokio::fs::write(&path, &data).await?;

  Ok(LocalFile {
    dir,
    path,
    size: size as u64,
    sha256,
  })
}

async fn act(
  operation: Operation,
  subject: &StorageHandle,
  fixture: &Fixture,
) -> Result<ActOutput, StorageError> {
  let key = fixture.key.as_str();
  match operation {
    Operation::Upload => subject
      .upload(key, fixture.content.clone(), "text/plain")
      .await
      .map(|_| ActOutput::Done),
    Operation::LargeUpload => match &fixture.upload {
      Some(file) => subject
        .upload_file(key, &file.path, "application/octet-stream")
        .await
        .map(|_| ActOutput::Done),
      None => Err(StorageError::Setup("large upload source missing".to_string())),
    },
    Operation::CreateFolder => subject
      .create_folder(&fixture.folder)
      .await
      .map(|_| ActOutput::Done),
    Operation::Overwrite => subject
      .overwrite(key, fixture.replacement.clone(), "text/plain")
      .await
      .map(|_| ActOutput::Done),
    Operation::Download => subject.download(key).await.map(ActOutput::Content),
    Operation::GetInfo => subject.get_info(key).await.map(ActOutput::Info),
    Operation::GetMetadata => subject.get_metadata(key).await.map(ActOutput::Metadata),
    Operation::GetContent => subject.get_content(key).await.map(ActOutput::Text),
    Operation::List => subject
      .list_objects(&folder_key(&fixture.folder))
      .await
      .map(ActOutput::Listing),
    Operation::CheckFolderExists => subject
      .folder_exists(&fixture.folder)
      .await
      .map(ActOutput::Exists),
    Operation::DeleteObject => subject.delete_object(key).await.map(|_| ActOutput::Done),
    Operation::DeleteFolder => subject
      .delete_folder(&fixture.folder)
      .await
      .map(ActOutput::Removed),
    Operation::Move => subject
      .move_object(key, &fixture.target)
      .await
      .map(|_| ActOutput::Done),
    Operation::CleanBucket => subject
      .clean_bucket(&folder_key(&fixture.folder))
      .await
      .map(ActOutput::Removed),
  }
}

async fn verify(
  operation: Operation,
  ctx: &CaseContext<'_>,
  fixture: &Fixture,
  result: &Result<ActOutput, StorageError>,
) -> Verification {
  let checked = match result {
    Ok(output) => verify_success(operation, ctx.observer(), fixture, output).await,
    // refused before any request left the process
    Err(err) if err.kind() == ErrorKind::AccessDenied && !ctx.subject.may(operation) => {
      Ok(Verification::NotRequired)
    },
    Err(err) if err.kind() == ErrorKind::AccessDenied && operation.is_mutating() => {
      verify_unchanged(operation, ctx.observer(), ctx.subject.permissions(), fixture).await
    },
    Err(_) => Ok(Verification::NotRequired),
  };
  checked.unwrap_or_else(|verification| verification)
}

/// Post-condition of a reported success. `Err` carries an `Unverifiable`.
async fn verify_success(
  operation: Operation,
  observer: &StorageHandle,
  fixture: &Fixture,
  output: &ActOutput,
) -> Result<Verification, Verification> {
  let verdict = match (operation, output) {
    (Operation::Upload, _) => {
      expect_content(observer, &fixture.key, &fixture.content, "uploaded").await?
    },
    (Operation::LargeUpload, _) => match &fixture.upload {
      Some(file) => expect_file(observer, &fixture.key, file).await?,
      None => Verification::NotRequired,
    },
    (Operation::CreateFolder, _) => {
      let marker = folder_key(&fixture.folder);
      match object_state(observer, &marker).await? {
        Some(_) => Verification::Verified,
        None => Verification::Mismatch(format!("folder marker '{}' missing", marker)),
      }
    },
    (Operation::Overwrite, _) => {
      expect_content(observer, &fixture.key, &fixture.replacement, "overwritten").await?
    },
    (Operation::Download, ActOutput::Content(content)) => {
      compare(content == &fixture.content, "downloaded bytes differ from fixture")
    },
    (Operation::GetContent, ActOutput::Text(text)) => compare(
      text.as_bytes() == fixture.content.as_ref(),
      "content differs from fixture",
    ),
    (Operation::GetInfo, ActOutput::Info(info)) => compare(
      info.size == fixture.content.len() as u64,
      &format!(
        "size {} differs from fixture size {}",
        info.size,
        fixture.content.len()
      ),
    ),
    (Operation::GetMetadata, ActOutput::Metadata(metadata)) => compare(
      metadata.contains_key(CASE_METADATA),
      &format!("'{}' metadata missing", CASE_METADATA),
    ),
    (Operation::List, ActOutput::Listing(objects)) => {
      let missing: Vec<&String> = fixture
        .seeded
        .iter()
        .filter(|key| !objects.iter().any(|o| &o.key == *key))
        .collect();
      compare(
        missing.is_empty(),
        &format!("listing is missing {:?}", missing),
      )
    },
    (Operation::CheckFolderExists, ActOutput::Exists(exists)) => {
      compare(*exists, "existing folder reported as absent")
    },
    (Operation::DeleteObject, _) => match object_state(observer, &fixture.key).await? {
      Some(_) => Verification::Mismatch("object still present after delete".to_string()),
      None => Verification::Verified,
    },
    (Operation::DeleteFolder, _) | (Operation::CleanBucket, _) => {
      let present = present_keys(observer, &fixture.seeded).await?;
      compare(
        present.is_empty(),
        &format!("objects still present: {:?}", present),
      )
    },
    (Operation::Move, _) => {
      let source = object_state(observer, &fixture.key).await?;
      let target = object_state(observer, &fixture.target).await?;
      match (source, target) {
        (None, Some(content)) if content == fixture.content => {
          let info = observer
            .get_info(&fixture.target)
            .await
            .map_err(unverifiable)?;
          compare(
            info.metadata.get(CASE_METADATA) == Some(&fixture.case_id),
            &format!("'{}' metadata lost in move", CASE_METADATA),
          )
        },
        (Some(_), _) => Verification::Mismatch("source still present after move".to_string()),
        (None, Some(_)) => Verification::Mismatch("moved content differs".to_string()),
        (None, None) => Verification::Mismatch("move target missing".to_string()),
      }
    },
    _ => Verification::NotRequired,
  };
  Ok(verdict)
}

/// A denied mutation must leave no observable trace
async fn verify_unchanged(
  operation: Operation,
  observer: &StorageHandle,
  permissions: PermissionSet,
  fixture: &Fixture,
) -> Result<Verification, Verification> {
  let verdict = match operation {
    Operation::Upload | Operation::LargeUpload => {
      match object_state(observer, &fixture.key).await? {
        Some(_) => Verification::Mismatch("object written despite denial".to_string()),
        None => Verification::Verified,
      }
    },
    Operation::CreateFolder => {
      match object_state(observer, &folder_key(&fixture.folder)).await? {
        Some(_) => Verification::Mismatch("folder created despite denial".to_string()),
        None => Verification::Verified,
      }
    },
    Operation::Overwrite => {
      expect_content(observer, &fixture.key, &fixture.content, "original").await?
    },
    Operation::DeleteObject | Operation::DeleteFolder | Operation::CleanBucket => {
      let present = present_keys(observer, &fixture.seeded).await?;
      let gone: Vec<&String> = fixture
        .seeded
        .iter()
        .filter(|key| !present.contains(*key))
        .collect();
      compare(
        gone.is_empty(),
        &format!("objects removed despite denial: {:?}", gone),
      )
    },
    Operation::Move => {
      let source = object_state(observer, &fixture.key).await?;
      let target = object_state(observer, &fixture.target).await?;
      match (source, target) {
        (None, _) => Verification::Mismatch("source removed despite denial".to_string()),
        // the copy half of a move only needs write
        (Some(_), Some(_)) if !permissions.allows(Permission::Write) => {
          Verification::Mismatch("copy written despite denial".to_string())
        },
        (Some(_), _) => Verification::Verified,
      }
    },
    _ => Verification::NotRequired,
  };
  Ok(verdict)
}

fn compare(holds: bool, mismatch: &str) -> Verification {
  if holds {
    Verification::Verified
  } else {
    Verification::Mismatch(mismatch.to_string())
  }
}

fn unverifiable(err: StorageError) -> Verification {
  match err.kind() {
    ErrorKind::AccessDenied => {
      Verification::Unverifiable(format!("no credential may check state: {}", err))
    },
    _ => Verification::Unverifiable(format!("state check failed: {}", err)),
  }
}

/// `Some(content)` if the object exists, `None` if it does not
async fn object_state(
  observer: &StorageHandle,
  key: &str,
) -> Result<Option<Bytes>, Verification> {
  match observer.download(key).await {
    Ok(content) => Ok(Some(content)),
    Err(StorageError::NotFound { .. }) => Ok(None),
    Err(err) => Err(unverifiable(err)),
  }
}

async fn present_keys(
  observer: &StorageHandle,
  keys: &[String],
) -> Result<Vec<String>, Verification> {
  let mut present = Vec::new();
  for key in keys {
    if object_state(observer, key).await?.is_some() {
      present.push(key.clone());
    }
  }
  Ok(present)
}

async fn expect_content(
  observer: &StorageHandle,
  key: &str,
  expected: &Bytes,
  label: &str,
) -> Result<Verification, Verification> {
  Ok(match object_state(observer, key).await? {
    Some(content) if &content == expected => Verification::Verified,
    Some(_) => Verification::Mismatch(format!("stored content is not the {} content", label)),
    None => Verification::Mismatch(format!("'{}' missing", key)),
  })
}

async fn expect_file(
  observer: &StorageHandle,
  key: &str,
  file: &LocalFile,
) -> Result<Verification, Verification> {
  let path = file.dir.path().join("download.bin");
  match observer.download_to_file(key, &path).await {
    Ok(summary) if summary.sha256 == file.sha256 => Ok(Verification::Verified),
    Ok(summary) => Ok(Verification::Mismatch(format!(
      "downloaded {} bytes with sha256 {}, uploaded {} bytes with sha256 {}",
      summary.bytes, summary.sha256, file.size, file.sha256
    ))),
    Err(StorageError::NotFound { .. }) => {
      Ok(Verification::Mismatch(format!("'{}' missing", key)))
    },
    Err(err) => Err(unverifiable(err)),
  }
}
