//! Cooperative cancellation for store and projector operations.

use std::future::Future;

use thiserror::Error;
pub use tokio_util::sync::CancellationToken;

/// Marker error for an operation aborted by its [`CancellationToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Runs `operation` unless `cancel` fires first.
///
/// A token that is already cancelled short-circuits before the operation is
/// polled. When the token fires mid-flight the operation future is dropped,
/// so any open database transaction is rolled back rather than committed.
pub async fn cancellable<T, E, F>(cancel: &CancellationToken, operation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Cancelled>,
{
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled.into()),
        result = operation => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Cancelled,
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let result: Result<i32, TestError> = cancellable(&token, async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_polls_operation() {
        let token = CancellationToken::new();
        token.cancel();

        let mut polled = false;
        let result: Result<(), TestError> = cancellable(&token, async {
            polled = true;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(TestError::Cancelled));
        assert!(!polled);
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_operation() {
        let token = CancellationToken::new();
        let child = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            child.cancel();
        });

        let result: Result<(), TestError> =
            cancellable(&token, std::future::pending::<Result<(), TestError>>()).await;
        assert_eq!(result, Err(TestError::Cancelled));
    }
}
