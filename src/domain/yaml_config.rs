use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::domain::identity::CredentialPair;
use crate::domain::operation::Operation;
use crate::domain::permission::{Permission, PermissionSet, PermissionTier};

#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
  #[error("Failed to read suite file: {0}")]
  FileRead(#[from] std::io::Error),
  #[error("Failed to parse YAML: {0}")]
  YamlParse(#[from] serde_yml::Error),
  #[error("Suite validation error: {0}")]
  Validation(String),
  #[error("Environment variable not found: {0}")]
  EnvVarNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
  Public,
  Private,
  Limited,
}

/// Credentials used to seed fixtures, inspect state and clean up
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCredentials {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub access_key_id: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub access_key_id_env: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub secret_access_key: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub secret_access_key_env: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_token: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
  /// Unique name for this bucket under test
  pub name: String,

  /// S3 bucket name
  pub bucket_name: String,

  /// AWS Access Key ID (optional - auto-discovered if not provided)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub access_key_id: Option<String>,

  /// Environment variable name holding the AWS Access Key ID
  #[serde(skip_serializing_if = "Option::is_none")]
  pub access_key_id_env: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub secret_access_key: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub secret_access_key_env: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_token: Option<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_token_env: Option<String>,

  /// AWS Region (optional - falls back to AWS_REGION)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub region: Option<String>,

  /// Custom S3 endpoint URL (falls back to S3_ENDPOINT_URL)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub endpoint_url: Option<String>,

  /// Force path-style addressing; unset defers to S3_FORCE_PATH_STYLE
  #[serde(skip_serializing_if = "Option::is_none")]
  pub force_path_style: Option<bool>,

  pub tier: TierName,

  /// Granted permissions, only meaningful for the limited tier
  #[serde(default)]
  pub permissions: Vec<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub admin: Option<AdminCredentials>,

  /// Run the end-to-end lifecycle scenario (default: on for public/private)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lifecycle: Option<bool>,

  /// Per-attempt timeout override in seconds
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteDefaults {
  /// Seconds per attempt
  #[serde(default = "default_timeout")]
  pub timeout: u64,

  /// Extra attempts for timed-out or transient failures
  #[serde(default = "default_retries")]
  pub retries: u32,

  /// Base backoff between attempts, multiplied by the attempt number
  #[serde(default = "default_backoff_ms")]
  pub backoff_ms: u64,

  /// Operations to exercise; all of them when omitted
  #[serde(default)]
  pub operations: Vec<String>,
}

impl Default for SuiteDefaults {
  fn default() -> Self {
    Self {
      timeout: default_timeout(),
      retries: default_retries(),
      backoff_ms: default_backoff_ms(),
      operations: Vec::new(),
    }
  }
}

fn default_timeout() -> u64 {
  30
}

fn default_retries() -> u32 {
  2
}

fn default_backoff_ms() -> u64 {
  500
}

fn default_run_prefix() -> String {
  "permcheck".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteConfig {
  pub name: String,

  /// Root prefix for every fixture key this suite creates
  #[serde(default = "default_run_prefix")]
  pub run_prefix: String,

  #[serde(default)]
  pub defaults: SuiteDefaults,

  pub buckets: Vec<BucketConfig>,
}

impl SuiteConfig {
  /// Load a suite from a YAML file
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SuiteError> {
    let content = fs::read_to_string(path)?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self, SuiteError> {
    let suite: SuiteConfig = serde_yml::from_str(content)?;
    suite.validate()?;
    Ok(suite)
  }

  pub fn validate(&self) -> Result<(), SuiteError> {
    if self.name.trim().is_empty() {
      return Err(SuiteError::Validation(
        "Suite name cannot be empty".to_string(),
      ));
    }

    if Self::normalize_prefix(&self.run_prefix).is_empty() {
      return Err(SuiteError::Validation(
        "runPrefix cannot be empty".to_string(),
      ));
    }

    if self.defaults.timeout == 0 {
      return Err(SuiteError::Validation(
        "defaults.timeout must be greater than 0".to_string(),
      ));
    }

    Self::parse_operations(&self.defaults.operations)?;

    if self.buckets.is_empty() {
      return Err(SuiteError::Validation(
        "At least one bucket must be configured".to_string(),
      ));
    }

    let mut bucket_names = HashSet::new();
    for bucket in &self.buckets {
      if bucket.name.is_empty() {
        return Err(SuiteError::Validation(
          "Bucket name cannot be empty".to_string(),
        ));
      }
      if bucket.bucket_name.is_empty() {
        return Err(SuiteError::Validation(format!(
          "Bucket '{}' must have a bucketName",
          bucket.name
        )));
      }
      if !bucket_names.insert(&bucket.name) {
        return Err(SuiteError::Validation(format!(
          "Duplicate bucket name: {}",
          bucket.name
        )));
      }
      if bucket.timeout == Some(0) {
        return Err(SuiteError::Validation(format!(
          "Bucket '{}': timeout must be greater than 0",
          bucket.name
        )));
      }

      match bucket.tier {
        TierName::Limited => {
          Self::parse_permissions(&bucket.name, &bucket.permissions)?;
        },
        TierName::Public | TierName::Private => {
          if !bucket.permissions.is_empty() {
            return Err(SuiteError::Validation(format!(
              "Bucket '{}': permissions only apply to the limited tier",
              bucket.name
            )));
          }
        },
      }

      if let Some(admin) = &bucket.admin {
        if admin.access_key_id.is_none() && admin.access_key_id_env.is_none() {
          return Err(SuiteError::Validation(format!(
            "Bucket '{}': admin must have either accessKeyId or accessKeyIdEnv",
            bucket.name
          )));
        }
        if admin.secret_access_key.is_none() && admin.secret_access_key_env.is_none() {
          return Err(SuiteError::Validation(format!(
            "Bucket '{}': admin must have either secretAccessKey or secretAccessKeyEnv",
            bucket.name
          )));
        }
      }
    }

    Ok(())
  }

  /// Resolve all environment variables and return a resolved suite
  pub fn resolve_env_vars(&self) -> Result<ResolvedSuite, SuiteError> {
    let mut buckets = Vec::new();

    for bucket in &self.buckets {
      let credentials = Self::resolve_pair(
        &bucket.name,
        Self::resolve_optional_env(&bucket.access_key_id, &bucket.access_key_id_env)?,
        Self::resolve_optional_env(&bucket.secret_access_key, &bucket.secret_access_key_env)?,
        Self::resolve_optional_env(&bucket.session_token, &bucket.session_token_env)?,
      )?;

      let admin = match &bucket.admin {
        Some(admin) => Some(CredentialPair {
          access_key_id: Self::resolve_required_env(
            &admin.access_key_id,
            &admin.access_key_id_env,
            &format!("Bucket '{}' admin accessKeyId", bucket.name),
          )?,
          secret_access_key: Self::resolve_required_env(
            &admin.secret_access_key,
            &admin.secret_access_key_env,
            &format!("Bucket '{}' admin secretAccessKey", bucket.name),
          )?,
          session_token: Self::resolve_optional_env(
            &admin.session_token,
            &admin.session_token_env,
          )?,
        }),
        None => None,
      };

      let tier = match bucket.tier {
        TierName::Public => PermissionTier::Public,
        TierName::Private => PermissionTier::Private,
        TierName::Limited => {
          PermissionTier::Limited(Self::parse_permissions(&bucket.name, &bucket.permissions)?)
        },
      };

      buckets.push(ResolvedBucket {
        name: bucket.name.clone(),
        bucket_name: bucket.bucket_name.clone(),
        region: bucket.region.clone(),
        endpoint_url: bucket.endpoint_url.clone(),
        force_path_style: bucket.force_path_style,
        credentials,
        admin,
        lifecycle: bucket
          .lifecycle
          .unwrap_or(!matches!(tier, PermissionTier::Limited(_))),
        tier,
        timeout_secs: bucket.timeout.unwrap_or(self.defaults.timeout),
      });
    }

    Ok(ResolvedSuite {
      name: self.name.clone(),
      run_prefix: Self::normalize_prefix(&self.run_prefix),
      retries: self.defaults.retries,
      backoff_ms: self.defaults.backoff_ms,
      operations: Self::parse_operations(&self.defaults.operations)?,
      buckets,
    })
  }

  fn resolve_pair(
    bucket: &str,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
  ) -> Result<Option<CredentialPair>, SuiteError> {
    match (access_key_id, secret_access_key) {
      (Some(access_key_id), Some(secret_access_key)) => Ok(Some(CredentialPair {
        access_key_id,
        secret_access_key,
        session_token,
      })),
      (Some(_), None) => Err(SuiteError::Validation(format!(
        "Bucket '{}': if accessKeyId is provided, secretAccessKey must also be provided",
        bucket
      ))),
      (None, Some(_)) => Err(SuiteError::Validation(format!(
        "Bucket '{}': if secretAccessKey is provided, accessKeyId must also be provided",
        bucket
      ))),
      (None, None) => Ok(None),
    }
  }

  fn parse_permissions(bucket: &str, raw: &[String]) -> Result<PermissionSet, SuiteError> {
    raw
      .iter()
      .map(|name| {
        Permission::from_str(name).map_err(|_| {
          SuiteError::Validation(format!(
            "Bucket '{}': unknown permission '{}'",
            bucket, name
          ))
        })
      })
      .collect()
  }

  fn parse_operations(raw: &[String]) -> Result<Vec<Operation>, SuiteError> {
    if raw.is_empty() {
      return Ok(Operation::ALL.to_vec());
    }
    let mut operations = Vec::new();
    for name in raw {
      let operation = Operation::from_str(name)
        .map_err(|_| SuiteError::Validation(format!("Unknown operation '{}'", name)))?;
      if !operations.contains(&operation) {
        operations.push(operation);
      }
    }
    Ok(operations)
  }

  /// Resolve an optional field that can be a value or env var reference
  fn resolve_optional_env(
    value: &Option<String>,
    env_var: &Option<String>,
  ) -> Result<Option<String>, SuiteError> {
    match (value, env_var) {
      (Some(v), _) => Ok(Some(v.clone())),
      (None, Some(env_name)) => match std::env::var(env_name) {
        Ok(v) => Ok(Some(v)),
        Err(_) => Ok(None), // Environment variable not set is OK for optional fields
      },
      (None, None) => Ok(None),
    }
  }

  /// Resolve a required field that must be a value or env var reference
  fn resolve_required_env(
    value: &Option<String>,
    env_var: &Option<String>,
    field_name: &str,
  ) -> Result<String, SuiteError> {
    match (value, env_var) {
      (Some(v), _) => Ok(v.clone()),
      (None, Some(env_name)) => std::env::var(env_name).map_err(|_| {
        SuiteError::EnvVarNotFound(format!(
          "{}: environment variable '{}' not found",
          field_name, env_name
        ))
      }),
      (None, None) => Err(SuiteError::Validation(format!(
        "{}: must be provided",
        field_name
      ))),
    }
  }

  /// Strip surrounding slashes and whitespace: fixture keys never start with `/`
  fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().trim_matches('/').to_string()
  }
}

/// Fully resolved suite with all environment variables loaded
#[derive(Debug, Clone)]
pub struct ResolvedSuite {
  pub name: String,
  pub run_prefix: String,
  pub retries: u32,
  pub backoff_ms: u64,
  pub operations: Vec<Operation>,
  pub buckets: Vec<ResolvedBucket>,
}

#[derive(Debug, Clone)]
pub struct ResolvedBucket {
  pub name: String,
  pub bucket_name: String,
  pub region: Option<String>,
  pub endpoint_url: Option<String>,
  pub force_path_style: Option<bool>,
  pub credentials: Option<CredentialPair>,
  pub admin: Option<CredentialPair>,
  pub tier: PermissionTier,
  pub lifecycle: bool,
  pub timeout_secs: u64,
}

impl ResolvedSuite {
  pub fn get_bucket(&self, name: &str) -> Option<&ResolvedBucket> {
    self.buckets.iter().find(|b| b.name == name)
  }
}
