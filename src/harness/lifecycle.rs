//! End-to-end scenario for full-access buckets: create a folder, fill it,
//! read it back, then take it apart again.

use bytes::Bytes;
use std::time::Instant;

use crate::domain::handle::{folder_key, StorageHandle};
use crate::domain::operation::Operation;
use crate::domain::outcome::{OperationOutcome, TestVerdict, Verification};
use crate::domain::reconciler::expectation;
use crate::domain::storage::StorageError;
use crate::harness::pipeline::{build_verdict, skipped_verdict, CaseContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
  CreateFolder,
  Upload,
  ListPopulated,
  Download,
  DeleteObject,
  DeleteFolder,
  ListEmpty,
}

const STEPS: [Step; 7] = [
  Step::CreateFolder,
  Step::Upload,
  Step::ListPopulated,
  Step::Download,
  Step::DeleteObject,
  Step::DeleteFolder,
  Step::ListEmpty,
];

impl Step {
  fn operation(&self) -> Operation {
    match self {
      Step::CreateFolder => Operation::CreateFolder,
      Step::Upload => Operation::Upload,
      Step::ListPopulated | Step::ListEmpty => Operation::List,
      Step::Download => Operation::Download,
      Step::DeleteObject => Operation::DeleteObject,
      Step::DeleteFolder => Operation::DeleteFolder,
    }
  }
}

struct Plan {
  folder: String,
  key: String,
  content: Bytes,
}

pub async fn run_lifecycle(bucket: &str, ctx: &CaseContext<'_>) -> Vec<TestVerdict> {
  let permissions = ctx.subject.permissions();
  let id = |index: usize, step: Step| {
    format!(
      "{}-lifecycle-{:02}-{}",
      bucket,
      index + 1,
      step.operation().slug()
    )
  };

  if !permissions.is_full() {
    let started = Instant::now();
    return vec![skipped_verdict(
      &format!("{}-lifecycle", bucket),
      Operation::CreateFolder,
      permissions,
      expectation(&permissions, Operation::CreateFolder),
      OperationOutcome::success(),
      format!("lifecycle needs full access, bucket grants {}", permissions),
      started,
    )];
  }

  let namespace = ctx.namespace(&format!("{}-lifecycle", bucket));
  let folder = format!("{}/docs", namespace);
  let plan = Plan {
    key: format!("{}/report.txt", folder),
    content: Bytes::from(format!("lifecycle payload for {}", bucket)),
    folder,
  };

  let mut verdicts = Vec::with_capacity(STEPS.len());
  let mut broken = None;

  for (index, step) in STEPS.into_iter().enumerate() {
    let started = Instant::now();
    let operation = step.operation();
    let expected = expectation(&permissions, operation);

    if let Some(failed_at) = &broken {
      verdicts.push(skipped_verdict(
        &id(index, step),
        operation,
        permissions,
        expected,
        OperationOutcome::success(),
        format!("earlier lifecycle step {} failed", failed_at),
        started,
      ));
      continue;
    }

    let (result, attempts) = ctx
      .retry
      .run(operation, || perform(step, ctx.subject, &plan))
      .await;
    let actual = OperationOutcome::from_result(&result);
    let verification = result.unwrap_or(Verification::NotRequired);
    let verdict = build_verdict(
      &id(index, step),
      operation,
      permissions,
      expected,
      actual,
      verification,
      attempts,
      started,
    );

    if !verdict.passed() {
      broken = Some(verdict.test_id.clone());
    }
    verdicts.push(verdict);
  }

  ctx.cleanup(&namespace).await;
  verdicts
}

/// Run one step and check what it returned
async fn perform(
  step: Step,
  subject: &StorageHandle,
  plan: &Plan,
) -> Result<Verification, StorageError> {
  let marker = folder_key(&plan.folder);
  let verification = match step {
    Step::CreateFolder => {
      subject.create_folder(&plan.folder).await?;
      Verification::NotRequired
    },
    Step::Upload => {
      subject
        .upload(&plan.key, plan.content.clone(), "text/plain")
        .await?;
      Verification::NotRequired
    },
    Step::ListPopulated => {
      let keys: Vec<String> = subject
        .list_objects(&marker)
        .await?
        .into_iter()
        .map(|o| o.key)
        .collect();
      if keys.contains(&marker) && keys.contains(&plan.key) {
        Verification::Verified
      } else {
        Verification::Mismatch(format!("listing shows {:?}", keys))
      }
    },
    Step::Download => {
      if subject.download(&plan.key).await? == plan.content {
        Verification::Verified
      } else {
        Verification::Mismatch("downloaded bytes differ from upload".to_string())
      }
    },
    Step::DeleteObject => {
      subject.delete_object(&plan.key).await?;
      Verification::NotRequired
    },
    Step::DeleteFolder => {
      let removed = subject.delete_folder(&plan.folder).await?;
      if removed >= 1 {
        Verification::Verified
      } else {
        Verification::Mismatch("folder marker was not removed".to_string())
      }
    },
    Step::ListEmpty => {
      let remaining = subject.list_objects(&marker).await?;
      if remaining.is_empty() {
        Verification::Verified
      } else {
        Verification::Mismatch(format!("{} object(s) remain", remaining.len()))
      }
    },
  };
  Ok(verification)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::handle::HandleOptions;
  use crate::domain::identity::BucketIdentity;
  use crate::domain::permission::{Permission, PermissionSet};
  use crate::harness::retry::RetryPolicy;
  use crate::infra::memory::MemoryStore;
  use std::sync::Arc;
  use std::time::Duration;

  fn context_for<'a>(subject: &'a StorageHandle) -> CaseContext<'a> {
    CaseContext {
      subject,
      admin: None,
      retry: RetryPolicy::new(0, Duration::from_secs(5), Duration::from_millis(1)),
      run_prefix: "run",
    }
  }

  fn handle(store: &MemoryStore, permissions: PermissionSet) -> StorageHandle {
    StorageHandle::new(
      BucketIdentity::new("public", store.bucket_name()),
      permissions,
      Arc::new(store.backend(permissions)),
      HandleOptions::default(),
    )
  }

  #[tokio::test]
  async fn test_full_access_lifecycle_passes() {
    let store = MemoryStore::new("bucket");
    let subject = handle(&store, PermissionSet::all());

    let verdicts = run_lifecycle("public", &context_for(&subject)).await;

    assert_eq!(verdicts.len(), 7);
    for verdict in &verdicts {
      assert!(verdict.passed(), "{}: {}", verdict.test_id, verdict.description);
    }
    assert_eq!(verdicts[0].test_id, "public-lifecycle-01-createFolder");
    assert_eq!(verdicts[6].verification, Verification::Verified);
    assert!(store.keys().is_empty());
  }

  #[tokio::test]
  async fn test_limited_bucket_skips_lifecycle() {
    let store = MemoryStore::new("bucket");
    let subject = handle(&store, PermissionSet::none().with(Permission::Read));

    let verdicts = run_lifecycle("ro", &context_for(&subject)).await;
    assert_eq!(verdicts.len(), 1);
    assert!(verdicts[0].is_skipped());
    assert_eq!(store.request_count(), 0);
  }

  #[tokio::test]
  async fn test_later_steps_skip_after_failure() {
    let store = MemoryStore::new("bucket");
    let subject = handle(&store, PermissionSet::all());
    // create folder and upload succeed, the listing fails for good
    store.fail_after(
      2,
      crate::domain::storage::RemoteError::new("InvalidRequest", 400, "broken listing"),
    );

    let verdicts = run_lifecycle("public", &context_for(&subject)).await;
    assert!(verdicts[0].passed());
    assert!(verdicts[1].passed());
    assert!(!verdicts[2].passed());
    assert!(verdicts[3..].iter().all(|v| v.is_skipped()));
  }
}
