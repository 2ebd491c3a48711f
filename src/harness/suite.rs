use futures_util::StreamExt as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReadDirStream;

use crate::domain::handle::{Enforcement, StorageHandle};
use crate::domain::permission::PermissionSet;
use crate::domain::storage::{BackendConnector, StorageError};
use crate::domain::yaml_config::{ResolvedBucket, ResolvedSuite, SuiteConfig};
use crate::error::AppError;
use crate::harness::lifecycle::run_lifecycle;
use crate::harness::matrix::cases_for_bucket;
use crate::harness::pipeline::{run_case, CaseContext};
use crate::harness::retry::RetryPolicy;
use crate::harness::{HarnessSettings, RunContext};

/// Picks the service a suite talks to
pub type ConnectorFactory = dyn Fn(&ResolvedSuite) -> Arc<dyn BackendConnector> + Send + Sync;

/// Outcome of one suite file
#[derive(Debug)]
pub struct SuiteRun {
  pub path: PathBuf,
  pub name: String,
  pub outcome: Result<RunContext, AppError>,
}

/// Run every bucket of `suite` in declaration order. A bucket that cannot be
/// connected is recorded on the context and the remaining buckets still run.
pub async fn run_suite(
  suite: &ResolvedSuite,
  connector: &dyn BackendConnector,
  settings: &HarnessSettings,
) -> RunContext {
  tracing::info!(
    "Running suite '{}' ({} bucket(s), {} operation(s))",
    suite.name,
    suite.buckets.len(),
    suite.operations.len()
  );

  let mut context = RunContext::new();
  for bucket in &suite.buckets {
    if let Err(e) = run_bucket(suite, bucket, connector, settings, &mut context).await {
      context.record_bucket_error(&bucket.name, &e);
    }
  }

  let summary = context.summary();
  tracing::info!(
    "Suite '{}' finished: {}/{} passed, {} failed, {} skipped, {} bucket(s) unreachable",
    suite.name,
    summary.passed,
    summary.total,
    summary.failed,
    summary.skipped,
    context.bucket_errors().len()
  );
  context
}

async fn run_bucket(
  suite: &ResolvedSuite,
  bucket: &ResolvedBucket,
  connector: &dyn BackendConnector,
  settings: &HarnessSettings,
  context: &mut RunContext,
) -> Result<(), StorageError> {
  let identity = settings.identity(&bucket.name, bucket, bucket.credentials.clone());
  let backend = connector.connect(&identity).await?;
  let subject = StorageHandle::new(
    identity,
    bucket.tier.permissions(),
    backend,
    settings.handle_options(),
  );

  let admin = match &bucket.admin {
    Some(credentials) => {
      let identity = settings.identity(
        &format!("{}-admin", bucket.name),
        bucket,
        Some(credentials.clone()),
      );
      let backend = connector.connect(&identity).await?;
      let mut options = settings.handle_options();
      options.enforcement = Enforcement::Local;
      Some(StorageHandle::new(
        identity,
        PermissionSet::all(),
        backend,
        options,
      ))
    },
    None => None,
  };

  let ctx = CaseContext {
    subject: &subject,
    admin: admin.as_ref(),
    retry: RetryPolicy::new(
      suite.retries,
      Duration::from_secs(bucket.timeout_secs),
      Duration::from_millis(suite.backoff_ms),
    ),
    run_prefix: &suite.run_prefix,
  };

  tracing::info!(
    "Bucket '{}' ({}, {}): {} case(s){}",
    bucket.name,
    bucket.bucket_name,
    bucket.tier.label(),
    suite.operations.len(),
    if admin.is_some() { ", admin checks on" } else { "" }
  );

  for case in cases_for_bucket(bucket, &suite.operations) {
    context.record(run_case(&case, &ctx).await);
  }

  if bucket.lifecycle {
    for verdict in run_lifecycle(&bucket.name, &ctx).await {
      context.record(verdict);
    }
  }
  Ok(())
}

/// Suite files in `dir` whose name ends with `pattern`, sorted by path
pub async fn discover_suites(dir: &Path, pattern: &str) -> std::io::Result<Vec<PathBuf>> {
  let entries = tokio::fs::read_dir(dir).await?;
  let mut stream = ReadDirStream::new(entries);
  let mut found = Vec::new();

  while let Some(entry) = stream.next().await {
    let entry = entry?;
    if !entry.file_type().await?.is_file() {
      continue;
    }
    let path = entry.path();
    let matches = path
      .file_name()
      .and_then(|name| name.to_str())
      .is_some_and(|name| name.ends_with(pattern));
    if matches {
      found.push(path);
    }
  }

  found.sort();
  tracing::debug!("Found {} suite file(s) in {}", found.len(), dir.display());
  Ok(found)
}

pub fn load_suite(path: &Path) -> Result<ResolvedSuite, AppError> {
  SuiteConfig::from_file(path)
    .and_then(|suite| suite.resolve_env_vars())
    .map_err(|e| AppError::suite(path, e))
}

pub async fn run_file(
  path: PathBuf,
  connectors: &ConnectorFactory,
  settings: &HarnessSettings,
) -> SuiteRun {
  let suite = match load_suite(&path) {
    Ok(suite) => suite,
    Err(e) => {
      tracing::error!("{}", e);
      return SuiteRun {
        name: path.display().to_string(),
        path,
        outcome: Err(e),
      };
    },
  };

  let connector = connectors(&suite);
  let context = run_suite(&suite, connector.as_ref(), settings).await;

  SuiteRun {
    path,
    name: suite.name,
    outcome: Ok(context),
  }
}

/// Run suite files with at most `workers` in flight. Cases within a file stay
/// sequential. Results come back sorted by path.
pub async fn run_files(
  paths: Vec<PathBuf>,
  connectors: &ConnectorFactory,
  settings: &HarnessSettings,
  workers: usize,
) -> Vec<SuiteRun> {
  let mut runs: Vec<SuiteRun> = futures_util::stream::iter(paths)
    .map(|path| run_file(path, connectors, settings))
    .buffer_unordered(workers.max(1))
    .collect()
    .await;

  runs.sort_by(|a, b| a.path.cmp(&b.path));
  runs
}
