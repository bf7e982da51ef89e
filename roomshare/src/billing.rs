//! Hook for the billing collaborator.
//!
//! Payment handling lives elsewhere; once it settles it calls
//! [`Subscriptions::activate`] or [`Subscriptions::lapse`]. Becoming paid
//! resets the free-view quota.

use chrono::{DateTime, Utc};
use roomshare_core::store::{AccountDirectory, QuotaLedger};
use roomshare_core::types::UserId;
use roomshare_core::{MarketError, Result};
use std::sync::Arc;
use tracing::info;

/// Flips paid status on accounts.
#[derive(Clone)]
pub struct Subscriptions {
    accounts: Arc<dyn AccountDirectory>,
    quota: Arc<dyn QuotaLedger>,
}

impl Subscriptions {
    /// Creates the hook over the account stores.
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountDirectory>, quota: Arc<dyn QuotaLedger>) -> Self {
        Self { accounts, quota }
    }

    /// Start (or extend) a subscription and reset the free-view quota.
    ///
    /// `paid_until = None` means no end date.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UserNotFound`] for unknown users, or
    /// [`MarketError::Unavailable`] if the store fails.
    pub async fn activate(&self, user: UserId, paid_until: Option<DateTime<Utc>>) -> Result<()> {
        if !self.accounts.set_subscription(user, true, paid_until).await? {
            return Err(MarketError::UserNotFound(user));
        }
        self.quota.reset(user).await?;
        info!(user = %user, ?paid_until, "Subscription activated");
        Ok(())
    }

    /// End a subscription. The quota is not restored.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UserNotFound`] for unknown users, or
    /// [`MarketError::Unavailable`] if the store fails.
    pub async fn lapse(&self, user: UserId) -> Result<()> {
        if !self.accounts.set_subscription(user, false, None).await? {
            return Err(MarketError::UserNotFound(user));
        }
        info!(user = %user, "Subscription lapsed");
        Ok(())
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions").finish_non_exhaustive()
    }
}
