//! Entitlement gate: who is looking at a room, and does it cost them a view?
//!
//! Tier resolution, in order:
//!
//! 1. no identity → [`Tier::Anonymous`]
//! 2. the room's owner → [`Tier::Owner`]
//! 3. an active subscription → [`Tier::Paid`]
//! 4. otherwise one unit of the free-view quota is consumed → [`Tier::FreeAuthenticated`],
//!    or [`MarketError::QuotaExceeded`] once the allowance is used up.
//!
//! Only step 4 mutates anything, and it does so through a single conditional
//! increment in the [`QuotaLedger`].

use roomshare_core::environment::Clock;
use roomshare_core::store::{AccountDirectory, QuotaLedger, QuotaOutcome};
use roomshare_core::types::{Room, Tier, UserId};
use roomshare_core::{MarketError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves a viewer's [`Tier`] for one room.
#[derive(Clone)]
pub struct EntitlementGate {
    accounts: Arc<dyn AccountDirectory>,
    quota: Arc<dyn QuotaLedger>,
    clock: Arc<dyn Clock>,
    free_view_limit: u32,
}

impl EntitlementGate {
    /// Creates a gate metering `free_view_limit` views per free account.
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        quota: Arc<dyn QuotaLedger>,
        clock: Arc<dyn Clock>,
        free_view_limit: u32,
    ) -> Self {
        Self {
            accounts,
            quota,
            clock,
            free_view_limit,
        }
    }

    /// Free views per account.
    #[must_use]
    pub const fn free_view_limit(&self) -> u32 {
        self.free_view_limit
    }

    /// Resolve the viewer's tier, consuming one free view if required.
    ///
    /// Each call consumes at most one unit, and only on the free path.
    ///
    /// # Errors
    ///
    /// - [`MarketError::QuotaExceeded`] if a free account used up its views
    /// - [`MarketError::UserNotFound`] if the viewer has no account
    /// - [`MarketError::Unavailable`] if the account store fails
    pub async fn resolve_tier(&self, viewer: Option<UserId>, room: &Room) -> Result<Tier> {
        let Some(user) = viewer else {
            return Ok(Tier::Anonymous);
        };

        if user == room.owner {
            return Ok(Tier::Owner);
        }

        let account = self
            .accounts
            .load_account(user)
            .await?
            .ok_or(MarketError::UserNotFound(user))?;

        if account.has_active_subscription(self.clock.now()) {
            debug!(user = %user, room_id = %room.id, "Paid viewer");
            return Ok(Tier::Paid);
        }

        match self.quota.try_consume(user, self.free_view_limit).await? {
            QuotaOutcome::Granted { used } => {
                metrics::counter!("roomshare.quota.consumed").increment(1);
                debug!(
                    user = %user,
                    room_id = %room.id,
                    used,
                    limit = self.free_view_limit,
                    "Free view consumed"
                );
                Ok(Tier::FreeAuthenticated)
            },
            QuotaOutcome::Exhausted { used } => {
                metrics::counter!("roomshare.quota.exhausted").increment(1);
                info!(user = %user, room_id = %room.id, used, "Free view quota exhausted");
                Err(MarketError::QuotaExceeded {
                    used,
                    limit: self.free_view_limit,
                })
            },
            QuotaOutcome::UnknownUser => Err(MarketError::UserNotFound(user)),
        }
    }
}

impl std::fmt::Debug for EntitlementGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementGate")
            .field("free_view_limit", &self.free_view_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use roomshare_core::types::Account;
    use roomshare_testing::{InMemoryAccounts, test_clock};

    fn gate(accounts: &InMemoryAccounts) -> EntitlementGate {
        EntitlementGate::new(
            Arc::new(accounts.clone()),
            Arc::new(accounts.clone()),
            Arc::new(test_clock()),
            3,
        )
    }

    #[tokio::test]
    async fn anonymous_and_owner_never_touch_quota() {
        let accounts = InMemoryAccounts::new();
        let owner = UserId::new();
        accounts.insert(Account::new(owner).room_owner());
        let room = Room::new(owner);
        let gate = gate(&accounts);

        assert_eq!(gate.resolve_tier(None, &room).await.unwrap(), Tier::Anonymous);
        assert_eq!(gate.resolve_tier(Some(owner), &room).await.unwrap(), Tier::Owner);
        assert_eq!(accounts.used(owner).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn lapsed_subscription_falls_back_to_quota() {
        let accounts = InMemoryAccounts::new();
        let now = test_clock().now();
        let active = UserId::new();
        let lapsed = UserId::new();
        accounts.insert(Account::new(active).paid(Some(now + Duration::days(1))));
        accounts.insert(Account::new(lapsed).paid(Some(now - Duration::days(1))));
        let room = Room::new(UserId::new());
        let gate = gate(&accounts);

        assert_eq!(gate.resolve_tier(Some(active), &room).await.unwrap(), Tier::Paid);
        assert_eq!(
            gate.resolve_tier(Some(lapsed), &room).await.unwrap(),
            Tier::FreeAuthenticated
        );
        assert_eq!(accounts.used(active).await.unwrap(), Some(0));
        assert_eq!(accounts.used(lapsed).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn fourth_free_view_is_refused() {
        let accounts = InMemoryAccounts::new();
        let user = UserId::new();
        accounts.insert(Account::new(user));
        let room = Room::new(UserId::new());
        let gate = gate(&accounts);

        for _ in 0..3 {
            assert_eq!(
                gate.resolve_tier(Some(user), &room).await.unwrap(),
                Tier::FreeAuthenticated
            );
        }
        assert_eq!(
            gate.resolve_tier(Some(user), &room).await,
            Err(MarketError::QuotaExceeded { used: 3, limit: 3 })
        );
        assert_eq!(accounts.used(user).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn unknown_viewer_is_not_found() {
        let accounts = InMemoryAccounts::new();
        let room = Room::new(UserId::new());
        let stranger = UserId::new();

        assert_eq!(
            gate(&accounts).resolve_tier(Some(stranger), &room).await,
            Err(MarketError::UserNotFound(stranger))
        );
    }
}
