//! Room detail reads: entitlement gate, view counter and projector in one call.

use crate::entitlement::EntitlementGate;
use crate::projector::{self, RoomView};
use roomshare_core::store::{AccountDirectory, RoomStore};
use roomshare_core::types::{RoomId, UserId};
use roomshare_core::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A projected room plus the paywall flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDetail {
    /// What the viewer may see
    pub view: RoomView,
    /// Set when a free viewer ran out of views; `view` is then restricted
    pub quota_exceeded: bool,
}

/// Serves room detail fetches.
#[derive(Clone)]
pub struct RoomViewer {
    rooms: Arc<dyn RoomStore>,
    accounts: Arc<dyn AccountDirectory>,
    gate: EntitlementGate,
}

impl RoomViewer {
    /// Creates a viewer over the given stores.
    #[must_use]
    pub fn new(
        rooms: Arc<dyn RoomStore>,
        accounts: Arc<dyn AccountDirectory>,
        gate: EntitlementGate,
    ) -> Self {
        Self {
            rooms,
            accounts,
            gate,
        }
    }

    /// Fetch a room as `viewer` may see it.
    ///
    /// Counts exactly one view for every fetch that renders, whatever the
    /// tier. A free viewer out of quota still gets a restricted view with
    /// `quota_exceeded` set instead of an error.
    ///
    /// The free-view spend is the last fallible step, so a fetch that fails
    /// never costs the viewer quota.
    ///
    /// # Errors
    ///
    /// - [`MarketError::RoomNotFound`] if the room does not exist
    /// - [`MarketError::UserNotFound`] if the viewer has no account
    /// - [`MarketError::Unavailable`] if a store fails
    pub async fn view_room(&self, viewer: Option<UserId>, room_id: RoomId) -> Result<RoomDetail> {
        let mut aggregate = self
            .rooms
            .load_room(room_id)
            .await?
            .ok_or(MarketError::RoomNotFound(room_id))?;

        let account = match viewer {
            Some(user) => {
                let account = self.accounts.load_account(user).await?;
                if account.is_none() && user != aggregate.room.owner {
                    return Err(MarketError::UserNotFound(user));
                }
                account
            },
            None => None,
        };

        let views = self
            .rooms
            .record_view(room_id)
            .await?
            .ok_or(MarketError::RoomNotFound(room_id))?;
        aggregate.room.view_count = views;
        metrics::counter!("roomshare.room.views").increment(1);

        let tier = match self.gate.resolve_tier(viewer, &aggregate.room).await {
            Ok(tier) => Some(tier),
            Err(MarketError::QuotaExceeded { .. }) => None,
            Err(error) => return Err(error),
        };

        let view = match tier {
            Some(tier) => projector::project(&aggregate, tier),
            None => projector::restricted(&aggregate),
        };
        let favorite = view.favorite.enabled
            && account.is_some_and(|account| account.favorites.contains(&room_id));

        tracing::debug!(
            room_id = %room_id,
            tier = ?view.tier,
            quota_exceeded = tier.is_none(),
            views,
            "Room viewed"
        );

        Ok(RoomDetail {
            view: view.with_favorite(favorite),
            quota_exceeded: tier.is_none(),
        })
    }
}

impl std::fmt::Debug for RoomViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomViewer")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}
