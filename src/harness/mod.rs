pub mod lifecycle;
pub mod matrix;
pub mod pipeline;
pub mod retry;
pub mod suite;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::config::HarnessConfig;
use crate::domain::handle::{Enforcement, HandleOptions};
use crate::domain::identity::{BucketIdentity, CredentialPair};
use crate::domain::outcome::{FailureClass, TestVerdict};
use crate::domain::storage::StorageError;
use crate::domain::yaml_config::ResolvedBucket;

/// Invocation-wide knobs applied to every handle the harness builds.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
  pub enforcement: Enforcement,
  pub ttl: Option<Duration>,
  pub endpoint_url: Option<String>,
  pub region: Option<String>,
  pub force_path_style: bool,
  pub multipart_threshold: usize,
  pub part_size: usize,
}

impl Default for HarnessSettings {
  fn default() -> Self {
    let options = HandleOptions::default();
    Self {
      enforcement: options.enforcement,
      ttl: options.ttl,
      endpoint_url: None,
      region: None,
      force_path_style: false,
      multipart_threshold: options.multipart_threshold,
      part_size: options.part_size,
    }
  }
}

impl From<&HarnessConfig> for HarnessSettings {
  fn from(config: &HarnessConfig) -> Self {
    Self {
      enforcement: config.enforcement(),
      ttl: config.ttl(),
      endpoint_url: config.endpoint_url.clone(),
      region: config.region.clone(),
      force_path_style: config.force_path_style,
      ..Self::default()
    }
  }
}

impl HarnessSettings {
  pub fn handle_options(&self) -> HandleOptions {
    HandleOptions {
      enforcement: self.enforcement,
      multipart_threshold: self.multipart_threshold,
      part_size: self.part_size,
      ttl: self.ttl,
    }
  }

  /// Identity for `bucket`, with invocation-wide fallbacks filled in
  pub fn identity(
    &self,
    name: &str,
    bucket: &ResolvedBucket,
    credentials: Option<CredentialPair>,
  ) -> BucketIdentity {
    BucketIdentity {
      name: name.to_string(),
      bucket_name: bucket.bucket_name.clone(),
      region: bucket.region.clone().or_else(|| self.region.clone()),
      endpoint_url: bucket
        .endpoint_url
        .clone()
        .or_else(|| self.endpoint_url.clone()),
      credentials,
      force_path_style: bucket.force_path_style.unwrap_or(self.force_path_style),
      timeout_secs: bucket.timeout_secs,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
  pub total: usize,
  pub passed: usize,
  pub failed: usize,
  pub skipped: usize,
  /// Passed, but the post-condition could not be checked
  pub unverifiable: usize,
  pub permission_violations: usize,
  pub service_malfunctions: usize,
  pub wrong_error_kinds: usize,
  pub verification_mismatches: usize,
}

impl RunSummary {
  pub fn add(&mut self, verdict: &TestVerdict) {
    self.total += 1;
    if verdict.passed() {
      self.passed += 1;
      if verdict.verification.is_unverifiable() {
        self.unverifiable += 1;
      }
    } else if verdict.is_skipped() {
      self.skipped += 1;
    }

    if let Some(class) = verdict.failure_class() {
      self.failed += 1;
      match class {
        FailureClass::PermissionViolation => self.permission_violations += 1,
        FailureClass::ServiceMalfunction => self.service_malfunctions += 1,
        FailureClass::WrongErrorKind => self.wrong_error_kinds += 1,
        FailureClass::VerificationMismatch => self.verification_mismatches += 1,
      }
    }
  }

  pub fn merge(&mut self, other: &RunSummary) {
    self.total += other.total;
    self.passed += other.passed;
    self.failed += other.failed;
    self.skipped += other.skipped;
    self.unverifiable += other.unverifiable;
    self.permission_violations += other.permission_violations;
    self.service_malfunctions += other.service_malfunctions;
    self.wrong_error_kinds += other.wrong_error_kinds;
    self.verification_mismatches += other.verification_mismatches;
  }

  pub fn all_passed(&self) -> bool {
    self.failed == 0
  }
}

/// A bucket whose cases never ran because no client could be built for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketError {
  pub bucket: String,
  pub message: String,
}

/// Verdicts of one suite run, in execution order.
#[derive(Debug, Default)]
pub struct RunContext {
  verdicts: Vec<TestVerdict>,
  summary: RunSummary,
  bucket_errors: Vec<BucketError>,
}

impl RunContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, verdict: TestVerdict) {
    if let Some(class) = verdict.failure_class() {
      tracing::warn!("{} {}: {}", verdict.test_id, class, verdict.description);
    } else {
      tracing::debug!("{} {:?}", verdict.test_id, verdict.status);
    }
    self.summary.add(&verdict);
    self.verdicts.push(verdict);
  }

  pub fn record_bucket_error(&mut self, bucket: &str, err: &StorageError) {
    tracing::error!("Bucket '{}' skipped: {}", bucket, err);
    self.bucket_errors.push(BucketError {
      bucket: bucket.to_string(),
      message: err.to_string(),
    });
  }

  pub fn bucket_errors(&self) -> &[BucketError] {
    &self.bucket_errors
  }

  /// No failed verdict and every bucket reached
  pub fn all_passed(&self) -> bool {
    self.summary.all_passed() && self.bucket_errors.is_empty()
  }

  pub fn verdicts(&self) -> &[TestVerdict] {
    &self.verdicts
  }

  pub fn summary(&self) -> RunSummary {
    self.summary
  }

  pub fn find(&self, test_id: &str) -> Option<&TestVerdict> {
    self.verdicts.iter().find(|v| v.test_id == test_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::outcome::{Expectation, OperationOutcome, VerdictStatus, Verification};

  fn verdict(status: VerdictStatus, verification: Verification) -> TestVerdict {
    TestVerdict {
      test_id: "t".to_string(),
      description: String::new(),
      operation: "Upload".to_string(),
      permissions: "ALL".to_string(),
      expected: Expectation::Succeed,
      actual: OperationOutcome::success(),
      status,
      verification,
      attempts: 1,
      duration_ms: 0,
    }
  }

  #[test]
  fn test_summary_counts_each_class() {
    let mut context = RunContext::new();
    context.record(verdict(VerdictStatus::Passed, Verification::Verified));
    context.record(verdict(
      VerdictStatus::Passed,
      Verification::Unverifiable("needs read".to_string()),
    ));
    context.record(verdict(
      VerdictStatus::Failed {
        class: FailureClass::PermissionViolation,
      },
      Verification::NotRequired,
    ));
    context.record(verdict(
      VerdictStatus::Skipped {
        reason: "quota".to_string(),
      },
      Verification::NotRequired,
    ));

    let summary = context.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.unverifiable, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.permission_violations, 1);
    assert_eq!(summary.skipped, 1);
    assert!(!summary.all_passed());
  }

  #[test]
  fn test_bucket_error_fails_the_run() {
    let mut context = RunContext::new();
    context.record(verdict(VerdictStatus::Passed, Verification::Verified));
    assert!(context.all_passed());

    context.record_bucket_error("second", &StorageError::Setup("no region".to_string()));

    assert!(context.summary().all_passed());
    assert!(!context.all_passed());
    assert_eq!(context.bucket_errors()[0].bucket, "second");
    assert_eq!(context.verdicts().len(), 1);
  }

  #[test]
  fn test_identity_falls_back_to_invocation_settings() {
    let settings = HarnessSettings {
      region: Some("eu-central-1".to_string()),
      endpoint_url: Some("http://localhost:9000".to_string()),
      force_path_style: true,
      ..HarnessSettings::default()
    };
    let bucket = ResolvedBucket {
      name: "b".to_string(),
      bucket_name: "bucket".to_string(),
      region: Some("us-east-1".to_string()),
      endpoint_url: None,
      force_path_style: None,
      credentials: None,
      admin: None,
      tier: crate::domain::permission::PermissionTier::Public,
      lifecycle: true,
      timeout_secs: 12,
    };

    let identity = settings.identity("b", &bucket, None);
    assert_eq!(identity.region.as_deref(), Some("us-east-1"));
    assert_eq!(identity.endpoint_url.as_deref(), Some("http://localhost:9000"));
    assert!(identity.force_path_style);
    assert_eq!(identity.timeout_secs, 12);
  }
}
