use std::future::Future;
use std::time::Duration;

use crate::domain::operation::Operation;
use crate::domain::storage::StorageError;

/// Per-attempt timeout plus linear backoff for transient failures.
///
/// Lives in the pipeline, never in the storage client: a retried denial
/// would hide exactly what the harness is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub timeout: Duration,
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      timeout: Duration::from_secs(30),
      backoff: Duration::from_millis(500),
    }
  }
}

impl RetryPolicy {
  pub fn new(retries: u32, timeout: Duration, backoff: Duration) -> Self {
    Self {
      attempts: retries + 1,
      timeout,
      backoff,
    }
  }

  /// Run `call` until it succeeds, fails for good, or attempts run out.
  /// Returns the last result and the number of attempts made.
  pub async fn run<T, F, Fut>(&self, operation: Operation, mut call: F) -> (Result<T, StorageError>, u32)
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
  {
    let attempts = self.attempts.max(1);
    let mut attempt = 1;

    loop {
      let result = match tokio::time::timeout(self.timeout, call()).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::timed_out(operation, self.timeout)),
      };

      match result {
        Err(err) if err.is_transient() && attempt < attempts => {
          let delay = self.backoff * attempt;
          tracing::warn!(
            "{} attempt {}/{} failed: {}; retrying in {}ms",
            operation,
            attempt,
            attempts,
            err,
            delay.as_millis()
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        },
        result => return (result, attempt),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn policy(retries: u32) -> RetryPolicy {
    RetryPolicy::new(retries, Duration::from_millis(200), Duration::from_millis(1))
  }

  fn transient() -> StorageError {
    StorageError::OperationFailed {
      operation: Operation::Upload,
      code: Some("SlowDown".to_string()),
      message: "slow down".to_string(),
    }
  }

  #[tokio::test]
  async fn test_transient_failure_is_retried() {
    let calls = &AtomicU32::new(0);
    let (result, attempts) = policy(2)
      .run(Operation::Upload, move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
          Err(transient())
        } else {
          Ok(42)
        }
      })
      .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts, 2);
  }

  #[tokio::test]
  async fn test_denial_is_never_retried() {
    let calls = &AtomicU32::new(0);
    let (result, attempts) = policy(5)
      .run(Operation::Upload, move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(StorageError::AccessDenied {
          operation: Operation::Upload,
          key: "k".to_string(),
        })
      })
      .await;

    assert!(result.is_err());
    assert_eq!(attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_gives_up_after_last_attempt() {
    let (result, attempts) = policy(2)
      .run(Operation::List, || async { Err::<(), _>(transient()) })
      .await;

    assert_eq!(result.unwrap_err().code(), Some("SlowDown"));
    assert_eq!(attempts, 3);
  }

  #[tokio::test]
  async fn test_timeout_becomes_request_timeout() {
    let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(1));
    let (result, attempts) = policy
      .run(Operation::Download, || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
      })
      .await;

    let err = result.unwrap_err();
    assert_eq!(err.code(), Some("RequestTimeout"));
    assert_eq!(attempts, 1);
  }
}
