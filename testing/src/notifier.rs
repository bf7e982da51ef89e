//! Notification capture for tests.

use roomshare_core::notify::{NotificationKind, Notifier, NotifyError, PartyNotification};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Records every notification it is handed.
///
/// Notifications are dispatched on spawned tasks after commit, so assertions
/// should go through [`RecordingNotifier::wait_for`] rather than reading the
/// log immediately.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<PartyNotification>>>,
    arrived: Arc<Notify>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create a notifier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier that records, then reports a delivery failure.
    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<PartyNotification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded notifications of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: NotificationKind) -> Vec<PartyNotification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect()
    }

    /// Wait (up to two seconds) until at least `count` notifications arrived.
    ///
    /// Returns whatever was recorded when the wait ended.
    pub async fn wait_for(&self, count: usize) -> Vec<PartyNotification> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let arrived = self.arrived.notified();
            let current = self.notifications();
            if current.len() >= count {
                return current;
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return self.notifications();
            }
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        notification: PartyNotification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
            self.arrived.notify_waiters();

            if self.failing.load(Ordering::SeqCst) {
                Err(NotifyError::Delivery("recording notifier set to fail".to_string()))
            } else {
                Ok(())
            }
        })
    }
}
