//! Cooperative cancellation for repository operations.

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::Notify;

use crate::error::{RepositoryError, RepositoryResult};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation signal shared between a caller and in-flight operations.
///
/// Clones observe the same signal. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiting operation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if the signal was raised.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is raised.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a concurrent `cancel` cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Fail with `Cancelled` if the signal is already raised.
    pub fn check(&self) -> RepositoryResult<()> {
        if self.is_cancelled() {
            Err(RepositoryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Await `fut` unless the signal is raised first.
    ///
    /// Work the store already committed before the signal is observed is not
    /// rolled back.
    pub async fn run<F, T, E>(&self, fut: F) -> RepositoryResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<RepositoryError>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(RepositoryError::Cancelled),
            result = fut => result.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_to_completion_when_not_cancelled() {
        let signal = CancellationSignal::new();
        let out = signal.run(async { Ok::<_, StorageError>(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn already_cancelled_signal_short_circuits() {
        let signal = CancellationSignal::new();
        signal.cancel();
        let err = signal
            .run(async { Ok::<_, StorageError>(()) })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_interrupts_a_pending_await() {
        let signal = CancellationSignal::new();
        let remote = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.cancel();
        });

        let err = signal
            .run(std::future::pending::<Result<(), StorageError>>())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn errors_pass_through_unchanged() {
        let signal = CancellationSignal::new();
        let err = signal
            .run(async { Err::<(), _>(StorageError::connection("refused")) })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Storage(StorageError::Connection(_))));
    }
}
