//! Cooperative cancellation for retry loops and page fetches.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// A cloneable cancellation flag. Every clone observes [`cancel`](Self::cancel)
/// from any other clone.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Fire the token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// `Err(Error::Canceled)` if the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token fires.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `delay`, aborting with [`Error::Canceled`] if the token fires
    /// first.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.check()?;
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = self.cancelled() => Err(Error::Canceled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_should_share_state_across_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check().unwrap_err().kind(), ErrorKind::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_abort_sleep_when_cancelled() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let started = tokio::time::Instant::now();
        let err = token.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_complete_sleep_without_cancel() {
        let token = CancellationToken::new();
        token.sleep(Duration::from_millis(50)).await.unwrap();
    }
}
