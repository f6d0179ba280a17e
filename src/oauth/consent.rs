//! Interactive consent collaborator.
//!
//! The browser/consent UI lives in the presentation shell. The engine
//! only needs something that takes an authorization URL, watches for
//! the redirect scheme, and hands back the redirect URL (or a
//! cancellation).

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConsentError {
    #[error("Authorization cancelled by user")]
    Cancelled,
    #[error("No callback received from authentication")]
    NoCallback,
}

/// Presents an authorization URL to the user and resolves with the
/// redirect URL carrying the provider's callback parameters.
#[async_trait]
pub trait AuthPresenter: Send + Sync {
    async fn present(&self, authorize_url: Url, callback_scheme: &str)
        -> Result<Url, ConsentError>;
}

/// Single-resolution bridge between the engine's awaiting future and
/// whatever context the presentation layer delivers its callback on.
///
/// The flow must resume exactly once; any resolution after the first is
/// a no-op, so a late cancel after a successful callback (or a double
/// callback delivery) cannot double-resume the awaiting flow.
pub struct ConsentBridge {
    slot: Mutex<Option<oneshot::Sender<Result<Url, ConsentError>>>>,
}

impl ConsentBridge {
    pub fn new() -> (Self, oneshot::Receiver<Result<Url, ConsentError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver the redirect URL. No-op if the bridge already resolved.
    pub fn complete(&self, redirect_url: Url) {
        self.resolve(Ok(redirect_url));
    }

    /// Deliver a user cancellation. No-op if the bridge already resolved.
    pub fn cancel(&self) {
        self.resolve(Err(ConsentError::Cancelled));
    }

    /// Deliver a missing-callback failure (e.g. the consent window was
    /// torn down without a redirect). No-op if already resolved.
    pub fn fail_no_callback(&self) {
        self.resolve(Err(ConsentError::NoCallback));
    }

    fn resolve(&self, outcome: Result<Url, ConsentError>) {
        if let Some(tx) = self.slot.lock().take() {
            // Receiver may already be gone; nothing to do then.
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bridge_resolves_once_with_first_outcome() {
        let (bridge, rx) = ConsentBridge::new();
        let url = Url::parse("workbar://oauth/callback?code=abc&state=s").unwrap();

        bridge.complete(url.clone());
        bridge.cancel(); // must be ignored
        bridge.complete(Url::parse("workbar://oauth/callback?code=other").unwrap());

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap(), url);
    }

    #[tokio::test]
    async fn bridge_cancellation_reaches_waiter() {
        let (bridge, rx) = ConsentBridge::new();
        bridge.cancel();
        assert_eq!(rx.await.unwrap(), Err(ConsentError::Cancelled));
    }

    #[tokio::test]
    async fn bridge_tolerates_dropped_receiver() {
        let (bridge, rx) = ConsentBridge::new();
        drop(rx);
        bridge.fail_no_callback();
    }
}
