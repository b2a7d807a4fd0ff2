// Request-scoped cancellation.

use std::future::Future;

use tokio::sync::watch;

use crate::error::QueryError;

/// Cloneable cancellation flag for one request. Store round-trips race
/// against it; calculator dispatch checks it between rows.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any token, so this only errors if every
        // token is gone, in which case nobody is waiting.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless the token fires first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, QueryError>>,
    {
        if self.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(QueryError::Cancelled),
            out = fut => out,
        }
    }
}
