//! Common test utilities for integration tests
//!
//! In-memory fixtures for the permission matrix, plus a MinIO testcontainer
//! wrapper for running the same checks against a real S3-compatible service.

pub mod storage_contract;

use std::sync::Arc;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, Config as S3Config};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::minio::MinIO;

use s3_permcheck::domain::handle::{Enforcement, HandleOptions, StorageHandle};
use s3_permcheck::domain::identity::{BucketIdentity, CredentialPair};
use s3_permcheck::domain::operation::Operation;
use s3_permcheck::domain::permission::{PermissionSet, PermissionTier};
use s3_permcheck::domain::yaml_config::{ResolvedBucket, ResolvedSuite};
use s3_permcheck::harness::HarnessSettings;
use s3_permcheck::infra::memory::MemoryStore;
use s3_permcheck::infra::s3::S3Backend;

pub const ADMIN_KEY: &str = "admin-key";

/// Handle options with tiny multipart thresholds so large uploads stay cheap
#[allow(dead_code)]
pub fn small_options(enforcement: Enforcement) -> HandleOptions {
  HandleOptions {
    enforcement,
    multipart_threshold: 64,
    part_size: 16,
    ttl: None,
  }
}

#[allow(dead_code)]
pub fn small_settings(enforcement: Enforcement) -> HarnessSettings {
  HarnessSettings {
    enforcement,
    multipart_threshold: 64,
    part_size: 16,
    ..HarnessSettings::default()
  }
}

/// A handle on `store` declaring `declared` while the service grants `granted`
#[allow(dead_code)]
pub fn memory_handle(
  store: &MemoryStore,
  declared: PermissionSet,
  granted: PermissionSet,
  enforcement: Enforcement,
) -> StorageHandle {
  StorageHandle::new(
    BucketIdentity::new(format!("mem-{}", declared.label()), store.bucket_name()),
    declared,
    Arc::new(store.backend(granted)),
    small_options(enforcement),
  )
}

/// Bucket with a limited tier, its own key, and an admin key
#[allow(dead_code)]
pub fn limited_bucket(name: &str, bucket_name: &str, permissions: PermissionSet) -> ResolvedBucket {
  ResolvedBucket {
    name: name.to_string(),
    bucket_name: bucket_name.to_string(),
    region: Some("us-east-1".to_string()),
    endpoint_url: None,
    force_path_style: None,
    credentials: Some(CredentialPair::new(format!("{}-key", name), "secret")),
    admin: Some(CredentialPair::new(ADMIN_KEY, "secret")),
    tier: PermissionTier::Limited(permissions),
    lifecycle: false,
    timeout_secs: 5,
  }
}

#[allow(dead_code)]
pub fn suite_of(name: &str, buckets: Vec<ResolvedBucket>) -> ResolvedSuite {
  ResolvedSuite {
    name: name.to_string(),
    run_prefix: "permcheck-test".to_string(),
    retries: 0,
    backoff_ms: 0,
    operations: Operation::ALL.to_vec(),
    buckets,
  }
}

/// MinIO test container wrapper with helper methods
#[allow(dead_code)]
pub struct MinioTestContainer {
  pub container: testcontainers::ContainerAsync<MinIO>,
  pub host_port: u16,
  pub access_key: String,
  pub secret_key: String,
}

#[allow(dead_code)]
impl MinioTestContainer {
  /// Start a new MinIO container with default credentials
  pub async fn start() -> Self {
    let container = MinIO::default()
      .start()
      .await
      .expect("Failed to start MinIO container");
    let host_port = container
      .get_host_port_ipv4(9000)
      .await
      .expect("Failed to get MinIO port");

    Self {
      container,
      host_port,
      access_key: "minioadmin".to_string(),
      secret_key: "minioadmin".to_string(),
    }
  }

  pub fn endpoint_url(&self) -> String {
    format!("http://localhost:{}", self.host_port)
  }

  pub fn credentials(&self) -> CredentialPair {
    CredentialPair::new(&self.access_key, &self.secret_key)
  }

  /// Plain SDK client for bucket management
  pub fn client(&self) -> Client {
    let config = S3Config::builder()
      .behavior_version(BehaviorVersion::latest())
      .region(Region::new("us-east-1"))
      .endpoint_url(self.endpoint_url())
      .credentials_provider(Credentials::new(
        &self.access_key,
        &self.secret_key,
        None,
        None,
        "minio-test",
      ))
      .force_path_style(true)
      .build();
    Client::from_conf(config)
  }

  pub async fn create_bucket(&self, bucket_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    // Wait a bit for MinIO to be fully ready
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
    self
      .client()
      .create_bucket()
      .bucket(bucket_name)
      .send()
      .await?;
    Ok(())
  }

  pub fn identity(&self, name: &str, bucket_name: &str) -> BucketIdentity {
    BucketIdentity::new(name, bucket_name)
      .with_region("us-east-1")
      .with_endpoint(self.endpoint_url())
      .with_credentials(self.credentials())
      .with_path_style(true)
  }

  /// Handle on `bucket_name` using the root credentials. Part sizes stay at
  /// their defaults; S3 rejects non-final parts under 5 MiB.
  pub async fn handle(
    &self,
    bucket_name: &str,
    declared: PermissionSet,
    enforcement: Enforcement,
  ) -> Result<StorageHandle, Box<dyn std::error::Error>> {
    let identity = self.identity(&format!("minio-{}", declared.label()), bucket_name);
    let backend = S3Backend::from_identity(&identity).await?;
    Ok(StorageHandle::new(
      identity,
      declared,
      Arc::new(backend),
      HandleOptions {
        enforcement,
        ..HandleOptions::default()
      },
    ))
  }
}

/// Helper to generate unique bucket names for tests
#[allow(dead_code)]
pub fn unique_bucket_name(prefix: &str) -> String {
  use std::time::{SystemTime, UNIX_EPOCH};
  let timestamp = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap()
    .as_millis();
  format!("{}-{}", prefix, timestamp)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unique_bucket_name() {
    let name1 = unique_bucket_name("test");
    // Sleep to ensure different timestamps
    std::thread::sleep(std::time::Duration::from_millis(2));
    let name2 = unique_bucket_name("test");
    assert_ne!(name1, name2, "Bucket names should be unique");
    assert!(name1.starts_with("test-"));
  }
}
