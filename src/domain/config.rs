use clap::{Args, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::handle::Enforcement;

#[derive(Debug)]
pub enum ConfigError {
  MissingField(&'static str),
  Invalid(&'static str),
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::MissingField(field) => {
        writeln!(f)?;
        writeln!(f, "Configuration Error: Missing required field")?;
        writeln!(f)?;

        match *field {
          "SUITE_FILE" => {
            writeln!(f, "No suite files to run.")?;
            writeln!(f)?;
            writeln!(f, "Provide suites via:")?;
            writeln!(f, "  1. s3-permcheck run <file>")?;
            writeln!(f, "  2. --suite-dir or PERMCHECK_SUITE_DIR")?;
          },
          _ => {
            writeln!(f, "Field: {}", field)?;
            writeln!(f)?;
            writeln!(f, "Please provide this required configuration parameter.")?;
          },
        }
      },
      ConfigError::Invalid(msg) => {
        writeln!(f)?;
        writeln!(f, "Configuration Error: Invalid value")?;
        writeln!(f)?;
        writeln!(f, "{}", msg)?;
        writeln!(f)?;
      },
    }

    writeln!(f, "Run with --help for more information.")
  }
}

pub trait ConfigValidator {
  fn validate(&self) -> impl std::future::Future<Output = Result<(), ConfigError>>;
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
  /// A real S3-compatible service
  #[default]
  S3,
  /// Conformant in-memory service, for dry runs
  Memory,
}

/// Settings shared by every suite in one invocation.
#[derive(Args, Debug, Clone)]
pub struct HarnessConfig {
  #[arg(
    long,
    env = "S3_ENDPOINT_URL",
    help = "Endpoint for buckets that do not set endpointUrl"
  )]
  pub endpoint_url: Option<String>,

  #[arg(long, env = "AWS_REGION", help = "Region for buckets that do not set one")]
  pub region: Option<String>,

  #[arg(
    long,
    env = "S3_FORCE_PATH_STYLE",
    help = "Use path-style addressing unless a bucket says otherwise"
  )]
  pub force_path_style: bool,

  #[arg(
    long,
    env = "PERMCHECK_TTL_HOURS",
    help = "Stamp uploaded fixtures with an expires-at time this many hours ahead"
  )]
  pub ttl_hours: Option<u64>,

  #[arg(
    long,
    env = "PERMCHECK_REPORT_DIR",
    default_value = "reports",
    help = "Directory for JSON and HTML reports"
  )]
  pub report_dir: PathBuf,

  #[arg(
    long,
    env = "PERMCHECK_MAX_REPORTS",
    default_value = "20",
    help = "Number of reports of each format to keep"
  )]
  pub max_reports: usize,

  #[arg(
    long,
    env = "PERMCHECK_WORKERS",
    default_value = "4",
    help = "Suite files run in parallel"
  )]
  pub workers: usize,

  #[arg(
    long,
    help = "Skip local permission checks and let the service enforce them"
  )]
  pub probe_remote: bool,

  #[arg(long, value_enum, default_value_t = BackendKind::S3)]
  pub backend: BackendKind,

  #[arg(long, env = "DEBUG", help = "Enable debug logging")]
  pub debug: bool,
}

impl Default for HarnessConfig {
  fn default() -> Self {
    Self {
      endpoint_url: None,
      region: None,
      force_path_style: false,
      ttl_hours: None,
      report_dir: PathBuf::from("reports"),
      max_reports: 20,
      workers: 4,
      probe_remote: false,
      backend: BackendKind::S3,
      debug: false,
    }
  }
}

impl HarnessConfig {
  pub fn enforcement(&self) -> Enforcement {
    if self.probe_remote {
      Enforcement::RemoteOnly
    } else {
      Enforcement::Local
    }
  }

  /// `None` when unset or too large to express as a duration
  pub fn ttl(&self) -> Option<Duration> {
    self
      .ttl_hours
      .and_then(|hours| hours.checked_mul(3600))
      .map(Duration::from_secs)
  }
}

impl ConfigValidator for HarnessConfig {
  async fn validate(&self) -> Result<(), ConfigError> {
    if self.workers == 0 {
      return Err(ConfigError::Invalid("workers must be greater than 0"));
    }

    if self.max_reports == 0 {
      return Err(ConfigError::Invalid("max-reports must be greater than 0"));
    }

    if let Some(hours) = self.ttl_hours {
      if hours == 0 {
        return Err(ConfigError::Invalid("ttl-hours must be greater than 0"));
      }
      let expires_at = self
        .ttl()
        .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl));
      if expires_at.is_none() {
        return Err(ConfigError::Invalid("ttl-hours is too large"));
      }
    }

    if let Some(endpoint) = &self.endpoint_url {
      if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ConfigError::Invalid(
          "endpoint-url must start with http:// or https://",
        ));
      }
    }

    Ok(())
  }
}
