use crate::domain::{config::ConfigError, storage::StorageError, yaml_config::SuiteError};
use crate::report::ReportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
  #[error("Storage error: {0}")]
  Storage(#[from] StorageError),

  #[error("Configuration error: {0}")]
  Config(#[from] ConfigError),

  #[error("Suite error in {path}: {source}")]
  Suite {
    path: String,
    #[source]
    source: SuiteError,
  },

  #[error("Report error: {0}")]
  Report(#[from] ReportError),
}

impl AppError {
  pub fn suite(path: &std::path::Path, source: SuiteError) -> Self {
    AppError::Suite {
      path: path.display().to_string(),
      source,
    }
  }
}
