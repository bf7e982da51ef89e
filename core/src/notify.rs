//! Outbound notifications for party lifecycle events.
//!
//! The party engine describes notifications as effects and hands them to a
//! [`Notifier`] only after the state change is committed. Delivery is
//! fire-and-forget: a failed notification is logged and never undoes the
//! transition that produced it.
//!
//! # Implementations
//!
//! - [`BroadcastNotifier`] - in-process fan-out over a `tokio` broadcast channel
//! - `RecordingNotifier` (testing crate) - captures notifications for assertions

use crate::types::{PartyId, RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::broadcast;

/// What happened to a party.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// A user applied; sent to the leader
    ApplicationReceived,
    /// An application was accepted; sent to the applicant
    ApplicationAccepted,
    /// An application was rejected; sent to the applicant
    ApplicationRejected,
    /// The party won the room; sent to its members
    WinnerSelected,
    /// The party lost the room to another; sent to its members
    PartyClosed,
}

impl NotificationKind {
    /// Stable name for logs and topics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ApplicationReceived => "application_received",
            Self::ApplicationAccepted => "application_accepted",
            Self::ApplicationRejected => "application_rejected",
            Self::WinnerSelected => "winner_selected",
            Self::PartyClosed => "party_closed",
        }
    }
}

/// Payload delivered to the broadcast collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyNotification {
    /// Event kind
    pub kind: NotificationKind,
    /// Room concerned
    pub room_id: RoomId,
    /// Party concerned
    pub party_id: PartyId,
    /// User the event is about (applicant), if any
    pub subject: Option<UserId>,
    /// Users who should receive it
    pub recipients: Vec<UserId>,
    /// When the transition happened
    pub occurred_at: DateTime<Utc>,
}

/// Errors that can occur while handing off a notification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Nobody is listening
    #[error("No subscribers for {0}")]
    NoSubscribers(&'static str),

    /// Transport failure
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Fire-and-forget outbound notification contract.
pub trait Notifier: Send + Sync {
    /// Hand a notification to the delivery mechanism.
    ///
    /// # Errors
    ///
    /// Returns error if the hand-off fails. Callers log and drop the error.
    fn notify(
        &self,
        notification: PartyNotification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// In-process fan-out of party notifications.
///
/// Chat and websocket layers call [`BroadcastNotifier::subscribe`] and forward
/// what they receive. Slow subscribers lag and lose old messages rather than
/// blocking the engine.
#[derive(Clone, Debug)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<PartyNotification>,
}

impl BroadcastNotifier {
    /// Create a notifier buffering up to `capacity` notifications per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all future notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PartyNotification> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(
        &self,
        notification: PartyNotification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            let kind = notification.kind.as_str();
            self.sender
                .send(notification)
                .map(|receivers| {
                    tracing::trace!(kind, receivers, "Notification broadcast");
                })
                .map_err(|_| NotifyError::NoSubscribers(kind))
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> PartyNotification {
        PartyNotification {
            kind: NotificationKind::ApplicationReceived,
            room_id: RoomId::new(),
            party_id: PartyId::new(),
            subject: Some(UserId::new()),
            recipients: vec![UserId::new()],
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut receiver = notifier.subscribe();
        let notification = sample();

        notifier
            .notify(notification.clone())
            .await
            .expect("subscriber is attached");

        assert_eq!(receiver.recv().await.ok(), Some(notification));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_reports_error() {
        let notifier = BroadcastNotifier::new(8);
        let result = notifier.notify(sample()).await;
        assert_eq!(
            result,
            Err(NotifyError::NoSubscribers("application_received"))
        );
    }

    #[test]
    fn notification_serializes_kind_by_name() {
        let json = serde_json::to_value(sample()).expect("serializable");
        assert_eq!(json["kind"], "ApplicationReceived");
    }
}
