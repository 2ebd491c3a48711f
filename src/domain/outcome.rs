use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::storage::{ErrorKind, StorageError};

/// What actually happened when an operation was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
  pub succeeded: bool,
  pub error_kind: Option<ErrorKind>,
  pub detail: Option<String>,
  /// Remote error code, when the service supplied one
  #[serde(skip_serializing_if = "Option::is_none")]
  pub code: Option<String>,
  /// Quota/balance style failure unrelated to permissions
  #[serde(default)]
  pub infrastructure: bool,
}

impl OperationOutcome {
  pub fn success() -> Self {
    Self {
      succeeded: true,
      error_kind: None,
      detail: None,
      code: None,
      infrastructure: false,
    }
  }

  pub fn failure(err: &StorageError) -> Self {
    Self {
      succeeded: false,
      error_kind: Some(err.kind()),
      detail: Some(err.to_string()),
      code: err.code().map(str::to_string),
      infrastructure: err.is_infrastructure(),
    }
  }

  pub fn from_result<T>(result: &Result<T, StorageError>) -> Self {
    match result {
      Ok(_) => Self::success(),
      Err(err) => Self::failure(err),
    }
  }

  pub fn is_denied(&self) -> bool {
    self.error_kind == Some(ErrorKind::AccessDenied)
  }
}

impl fmt::Display for OperationOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.succeeded, self.error_kind) {
      (true, _) => f.write_str("success"),
      (false, Some(kind)) => write!(f, "failed ({})", kind),
      (false, None) => f.write_str("failed"),
    }
  }
}

/// Outcome the declared permissions imply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expectation {
  Succeed,
  Deny,
}

impl fmt::Display for Expectation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expectation::Succeed => f.write_str("success"),
      Expectation::Deny => f.write_str("access denied"),
    }
  }
}

/// Result of checking an operation's post-condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum Verification {
  NotRequired,
  Verified,
  Mismatch(String),
  /// The check needs a permission nobody available holds
  Unverifiable(String),
}

impl Verification {
  pub fn is_unverifiable(&self) -> bool {
    matches!(self, Verification::Unverifiable(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
  /// Succeeded (or changed state) although it should have been denied
  PermissionViolation,
  /// Failed although it should have succeeded
  ServiceMalfunction,
  /// Should have been denied but failed for another reason
  WrongErrorKind,
  /// Reported success but the post-condition does not hold
  VerificationMismatch,
}

impl fmt::Display for FailureClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      FailureClass::PermissionViolation => "PERMISSION VIOLATION",
      FailureClass::ServiceMalfunction => "service malfunction",
      FailureClass::WrongErrorKind => "wrong error kind",
      FailureClass::VerificationMismatch => "verification mismatch",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum VerdictStatus {
  Passed,
  Failed { class: FailureClass },
  Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestVerdict {
  pub test_id: String,
  pub description: String,
  pub operation: String,
  pub permissions: String,
  pub expected: Expectation,
  pub actual: OperationOutcome,
  pub status: VerdictStatus,
  pub verification: Verification,
  pub attempts: u32,
  pub duration_ms: u64,
}

impl TestVerdict {
  pub fn passed(&self) -> bool {
    self.status == VerdictStatus::Passed
  }

  pub fn failure_class(&self) -> Option<FailureClass> {
    match self.status {
      VerdictStatus::Failed { class } => Some(class),
      _ => None,
    }
  }

  pub fn is_skipped(&self) -> bool {
    matches!(self.status, VerdictStatus::Skipped { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::operation::Operation;

  #[test]
  fn test_outcome_from_error() {
    let err = StorageError::AccessDenied {
      operation: Operation::Upload,
      key: "test.txt".to_string(),
    };
    let outcome = OperationOutcome::failure(&err);
    assert!(!outcome.succeeded);
    assert!(outcome.is_denied());
    assert_eq!(
      outcome.detail.as_deref(),
      Some("Access denied: Upload on 'test.txt'")
    );
    assert_eq!(outcome.to_string(), "failed (AccessDenied)");
  }

  #[test]
  fn test_outcome_marks_infrastructure() {
    let err = StorageError::OperationFailed {
      operation: Operation::Upload,
      code: Some("InsufficientBalance".to_string()),
      message: "balance".to_string(),
    };
    let outcome = OperationOutcome::from_result::<()>(&Err(err));
    assert!(outcome.infrastructure);
    assert_eq!(outcome.code.as_deref(), Some("InsufficientBalance"));
  }

  #[test]
  fn test_verdict_status_serialization() {
    let status = VerdictStatus::Failed {
      class: FailureClass::PermissionViolation,
    };
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["class"], "permissionViolation");
  }
}
