use std::fmt;

/// Access key / secret key pair for one bucket and permission tier.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
  pub access_key_id: String,
  pub secret_access_key: String,
  pub session_token: Option<String>,
}

impl CredentialPair {
  pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
    Self {
      access_key_id: access_key_id.into(),
      secret_access_key: secret_access_key.into(),
      session_token: None,
    }
  }
}

impl fmt::Debug for CredentialPair {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CredentialPair")
      .field("access_key_id", &self.access_key_id)
      .field("secret_access_key", &"<redacted>")
      .field(
        "session_token",
        &self.session_token.as_ref().map(|_| "<redacted>"),
      )
      .finish()
  }
}

/// Where a bucket lives and which credentials address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketIdentity {
  /// Logical name used in test ids and reports
  pub name: String,
  /// Bucket name on the storage service
  pub bucket_name: String,
  pub region: Option<String>,
  pub endpoint_url: Option<String>,
  /// `None` falls back to the AWS default credential chain
  pub credentials: Option<CredentialPair>,
  pub force_path_style: bool,
  /// Per-operation timeout in seconds
  pub timeout_secs: u64,
}

impl BucketIdentity {
  pub fn new(name: impl Into<String>, bucket_name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      bucket_name: bucket_name.into(),
      region: None,
      endpoint_url: None,
      credentials: None,
      force_path_style: false,
      timeout_secs: 30,
    }
  }

  pub fn with_credentials(mut self, credentials: CredentialPair) -> Self {
    self.credentials = Some(credentials);
    self
  }

  pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
    self.endpoint_url = Some(endpoint_url.into());
    self
  }

  pub fn with_region(mut self, region: impl Into<String>) -> Self {
    self.region = Some(region.into());
    self
  }

  pub fn with_path_style(mut self, force_path_style: bool) -> Self {
    self.force_path_style = force_path_style;
    self
  }

  pub fn access_key_id(&self) -> Option<&str> {
    self.credentials.as_ref().map(|c| c.access_key_id.as_str())
  }
}
