//! Expected-vs-actual comparison shared by every test case.
//!
//! The reconciler is the only place where a storage error becomes a verdict.
//! It matches on [`ErrorKind`] and never lets an unanticipated error count as
//! an expected denial.

use crate::domain::operation::Operation;
use crate::domain::outcome::{
  Expectation, FailureClass, OperationOutcome, VerdictStatus, Verification,
};
use crate::domain::permission::PermissionSet;
use crate::domain::storage::ErrorKind;

/// `Succeed` iff the operation's required permissions are all granted.
pub fn expectation(permissions: &PermissionSet, operation: Operation) -> Expectation {
  if permissions.contains(&operation.required()) {
    Expectation::Succeed
  } else {
    Expectation::Deny
  }
}

pub fn reconcile(
  expected: Expectation,
  actual: &OperationOutcome,
  verification: &Verification,
) -> VerdictStatus {
  if !actual.succeeded && actual.infrastructure {
    return VerdictStatus::Skipped {
      reason: format!(
        "infrastructure failure: {}",
        actual.detail.as_deref().unwrap_or("unknown")
      ),
    };
  }

  match (expected, actual.succeeded) {
    (Expectation::Succeed, true) => match verification {
      Verification::Mismatch(_) => failed(FailureClass::VerificationMismatch),
      // Unverifiable counts as a pass; the marker stays on the verdict
      Verification::NotRequired | Verification::Verified | Verification::Unverifiable(_) => {
        VerdictStatus::Passed
      },
    },
    (Expectation::Succeed, false) => failed(FailureClass::ServiceMalfunction),
    (Expectation::Deny, true) => failed(FailureClass::PermissionViolation),
    (Expectation::Deny, false) => match (actual.error_kind, verification) {
      // denied, yet the remote state moved anyway
      (Some(ErrorKind::AccessDenied), Verification::Mismatch(_)) => {
        failed(FailureClass::PermissionViolation)
      },
      (Some(ErrorKind::AccessDenied), _) => VerdictStatus::Passed,
      _ => failed(FailureClass::WrongErrorKind),
    },
  }
}

fn failed(class: FailureClass) -> VerdictStatus {
  VerdictStatus::Failed { class }
}

/// One-line explanation of a verdict for reports.
pub fn describe(
  expected: Expectation,
  actual: &OperationOutcome,
  verification: &Verification,
  status: &VerdictStatus,
) -> String {
  let base = format!("expected {}, got {}", expected, actual);
  let detail = match (status, verification) {
    (_, Verification::Mismatch(why)) => Some(why.clone()),
    (VerdictStatus::Passed, Verification::Unverifiable(why)) => {
      Some(format!("not verified: {}", why))
    },
    _ => actual.detail.clone(),
  };
  match detail {
    Some(detail) => format!("{}: {}", base, detail),
    None => base,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::permission::Permission;
  use crate::domain::storage::StorageError;

  fn denied() -> OperationOutcome {
    OperationOutcome::failure(&StorageError::AccessDenied {
      operation: Operation::Upload,
      key: "k".to_string(),
    })
  }

  fn not_found() -> OperationOutcome {
    OperationOutcome::failure(&StorageError::NotFound {
      key: "k".to_string(),
    })
  }

  #[test]
  fn test_expectation_follows_required_permissions() {
    let read_only = PermissionSet::none().with(Permission::Read);
    assert_eq!(expectation(&read_only, Operation::Download), Expectation::Succeed);
    assert_eq!(expectation(&read_only, Operation::Upload), Expectation::Deny);

    let delete_only = PermissionSet::none().with(Permission::Delete);
    assert_eq!(expectation(&delete_only, Operation::DeleteObject), Expectation::Succeed);
    assert_eq!(expectation(&delete_only, Operation::DeleteFolder), Expectation::Deny);

    let write_delete = PermissionSet::from_permissions([Permission::Write, Permission::Delete]);
    assert_eq!(expectation(&write_delete, Operation::Move), Expectation::Succeed);
  }

  #[test]
  fn test_expectation_matrix_is_exhaustive() {
    for permissions in PermissionSet::combinations() {
      for op in Operation::ALL {
        let expected = expectation(&permissions, op);
        assert_eq!(
          expected == Expectation::Succeed,
          op.required().iter().all(|p| permissions.allows(p)),
          "{} / {}",
          permissions,
          op
        );
      }
    }
  }

  #[test]
  fn test_truth_table() {
    let ok = OperationOutcome::success();
    let none = Verification::NotRequired;

    assert_eq!(reconcile(Expectation::Succeed, &ok, &none), VerdictStatus::Passed);
    assert_eq!(reconcile(Expectation::Deny, &denied(), &none), VerdictStatus::Passed);
    assert_eq!(
      reconcile(Expectation::Succeed, &denied(), &none),
      failed(FailureClass::ServiceMalfunction)
    );
    assert_eq!(
      reconcile(Expectation::Deny, &ok, &none),
      failed(FailureClass::PermissionViolation)
    );
    assert_eq!(
      reconcile(Expectation::Deny, &not_found(), &none),
      failed(FailureClass::WrongErrorKind)
    );
  }

  #[test]
  fn test_unverifiable_success_passes() {
    let verdict = reconcile(
      Expectation::Succeed,
      &OperationOutcome::success(),
      &Verification::Unverifiable("needs list".to_string()),
    );
    assert_eq!(verdict, VerdictStatus::Passed);
  }

  #[test]
  fn test_mismatch_fails_success() {
    let verdict = reconcile(
      Expectation::Succeed,
      &OperationOutcome::success(),
      &Verification::Mismatch("content differs".to_string()),
    );
    assert_eq!(verdict, failed(FailureClass::VerificationMismatch));
  }

  #[test]
  fn test_denied_but_state_changed_is_violation() {
    let verdict = reconcile(
      Expectation::Deny,
      &denied(),
      &Verification::Mismatch("object was written".to_string()),
    );
    assert_eq!(verdict, failed(FailureClass::PermissionViolation));
  }

  #[test]
  fn test_infrastructure_failure_is_skipped() {
    let outcome = OperationOutcome::failure(&StorageError::OperationFailed {
      operation: Operation::Upload,
      code: Some("QuotaExceeded".to_string()),
      message: "quota".to_string(),
    });
    let verdict = reconcile(Expectation::Succeed, &outcome, &Verification::NotRequired);
    assert!(matches!(verdict, VerdictStatus::Skipped { .. }));
  }

  #[test]
  fn test_describe_mentions_unverifiable() {
    let ok = OperationOutcome::success();
    let verification = Verification::Unverifiable("folder listing needs list".to_string());
    let status = reconcile(Expectation::Succeed, &ok, &verification);
    let text = describe(Expectation::Succeed, &ok, &verification, &status);
    assert_eq!(
      text,
      "expected success, got success: not verified: folder listing needs list"
    );
  }
}
