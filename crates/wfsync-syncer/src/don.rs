//! DON assignment of the local node

use crate::error::{Result, SyncerError};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use wfsync_types::Don;

/// Resolves which DON the local node belongs to, blocking until it is known.
#[async_trait]
pub trait DonNotifier: Send + Sync {
    async fn wait_for_don(&self, cancel: &CancellationToken) -> Result<Don>;
}

/// [`DonNotifier`] fed by whoever learns the node's membership.
#[derive(Debug)]
pub struct WatchDonNotifier {
    tx: watch::Sender<Option<Don>>,
}

impl WatchDonNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish the node's DON; wakes every waiter.
    pub fn notify_don_set(&self, don: Don) {
        self.tx.send_replace(Some(don));
    }

    pub fn current(&self) -> Option<Don> {
        self.tx.borrow().clone()
    }
}

impl Default for WatchDonNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DonNotifier for WatchDonNotifier {
    async fn wait_for_don(&self, cancel: &CancellationToken) -> Result<Don> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(SyncerError::Cancelled),
            don = rx.wait_for(Option::is_some) => {
                let don = don.map_err(|e| SyncerError::DonUnavailable(e.to_string()))?;
                (*don).clone().ok_or_else(|| SyncerError::DonUnavailable("no DON published".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_publish() {
        let notifier = Arc::new(WatchDonNotifier::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let notifier = notifier.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { notifier.wait_for_don(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        notifier.notify_don_set(Don {
            id: 4,
            families: vec!["family-a".to_string()],
        });

        let don = waiter.await.unwrap().unwrap();
        assert_eq!(don.id, 4);
        assert_eq!(notifier.current(), Some(don));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_set() {
        let notifier = WatchDonNotifier::new();
        notifier.notify_don_set(Don::default());
        let don = notifier
            .wait_for_don(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(don, Don::default());
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let notifier = WatchDonNotifier::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = notifier.wait_for_don(&cancel).await.unwrap_err();
        assert!(matches!(err, SyncerError::Cancelled));
    }
}
