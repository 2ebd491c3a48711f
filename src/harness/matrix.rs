//! Test case enumeration.

use crate::domain::identity::CredentialPair;
use crate::domain::operation::Operation;
use crate::domain::permission::{PermissionSet, PermissionTier};
use crate::domain::reconciler::expectation;
use crate::domain::yaml_config::{ResolvedBucket, ResolvedSuite};
use crate::infra::memory::MemoryConnector;

pub const SELF_CHECK_BUCKET: &str = "permcheck-self-check";
pub const SELF_CHECK_ADMIN_KEY: &str = "permcheck-admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
  pub id: String,
  pub bucket: String,
  pub operation: Operation,
  pub permissions: PermissionSet,
  pub description: String,
}

pub fn case_id(bucket: &str, tier: &PermissionTier, operation: Operation) -> String {
  format!("{}-{}-{}", bucket, tier.label(), operation.slug())
}

/// One case per operation, in the given order
pub fn cases_for_bucket(bucket: &ResolvedBucket, operations: &[Operation]) -> Vec<TestCase> {
  let permissions = bucket.tier.permissions();
  operations
    .iter()
    .map(|&operation| TestCase {
      id: case_id(&bucket.name, &bucket.tier, operation),
      bucket: bucket.name.clone(),
      operation,
      permissions,
      description: format!(
        "{} on {} bucket '{}' should give {}",
        operation,
        bucket.tier.label(),
        bucket.bucket_name,
        expectation(&permissions, operation)
      ),
    })
    .collect()
}

/// Every permission combination against every operation, on a conformant
/// in-memory service. Exercises the harness itself.
pub fn self_check_suite() -> (ResolvedSuite, MemoryConnector) {
  let buckets = PermissionSet::combinations()
    .into_iter()
    .map(|permissions| {
      let label = permissions.label().to_ascii_lowercase();
      ResolvedBucket {
        name: format!("self-{}", label),
        bucket_name: SELF_CHECK_BUCKET.to_string(),
        region: Some("us-east-1".to_string()),
        endpoint_url: None,
        force_path_style: None,
        credentials: Some(CredentialPair::new(format!("key-{}", label), "memory")),
        admin: Some(CredentialPair::new(SELF_CHECK_ADMIN_KEY, "memory")),
        tier: PermissionTier::Limited(permissions),
        lifecycle: permissions.is_full(),
        timeout_secs: 5,
      }
    })
    .collect();

  let suite = ResolvedSuite {
    name: "self-check".to_string(),
    run_prefix: "permcheck-self-check".to_string(),
    retries: 0,
    backoff_ms: 0,
    operations: Operation::ALL.to_vec(),
    buckets,
  };
  let connector = MemoryConnector::conformant(&suite);
  (suite, connector)
}
