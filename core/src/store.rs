//! Persistence contracts for accounts, quota and rooms.
//!
//! Every method returns an explicit `Pin<Box<dyn Future>>` instead of using
//! `async fn` so the traits stay object-safe and can be shared as
//! `Arc<dyn Trait>` between request handlers.
//!
//! # Atomicity
//!
//! - [`QuotaLedger::try_consume`] is a single conditional increment. Backends
//!   must never implement it as read-then-write.
//! - [`RoomStore::begin`] hands out exclusive access to one room and all of
//!   its parties until the returned [`RoomTransaction`] is committed or
//!   dropped. Dropping without commit discards every change.

use crate::error::StoreError;
use crate::types::{Account, Party, PartyId, Room, RoomId, UserId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the store traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

// ============================================================================
// Accounts & quota
// ============================================================================

/// Read access to accounts plus the billing collaborator's write path.
pub trait AccountDirectory: Send + Sync {
    /// Load an account, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the backend query fails.
    fn load_account(&self, user: UserId) -> StoreFuture<'_, Option<Account>>;

    /// Set or clear the paid subscription of an account.
    ///
    /// Returns `false` if the account does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the backend update fails.
    fn set_subscription(
        &self,
        user: UserId,
        is_paid: bool,
        paid_until: Option<DateTime<Utc>>,
    ) -> StoreFuture<'_, bool>;
}

/// Result of a conditional quota increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// One unit was consumed; `used` is the new total
    Granted {
        /// Views consumed including this one
        used: u32,
    },
    /// The limit was already reached; nothing changed
    Exhausted {
        /// Views consumed
        used: u32,
    },
    /// No such account
    UnknownUser,
}

/// Metered free-view counter embedded in each account.
pub trait QuotaLedger: Send + Sync {
    /// Atomically increment the user's counter if it is below `limit`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend update fails.
    fn try_consume(&self, user: UserId, limit: u32) -> StoreFuture<'_, QuotaOutcome>;

    /// Current counter value, `None` if the account does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the backend query fails.
    fn used(&self, user: UserId) -> StoreFuture<'_, Option<u32>>;

    /// Reset the counter to zero (the user became paid).
    ///
    /// # Errors
    ///
    /// Returns error if the backend update fails.
    fn reset(&self, user: UserId) -> StoreFuture<'_, ()>;
}

// ============================================================================
// Rooms & parties
// ============================================================================

/// One room together with every party ever formed for it.
///
/// This is the consistency boundary of the party engine: all invariants that
/// span parties (one active membership per user, a single winner) are checked
/// against a whole aggregate held under a [`RoomTransaction`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomAggregate {
    /// The room
    pub room: Room,
    /// Its parties in creation order
    pub parties: Vec<Party>,
    /// Number of events applied to this aggregate in the current unit of work
    pub version: u64,
    /// Rejection raised by the last command, if any
    pub last_error: Option<crate::error::MarketError>,
}

impl RoomAggregate {
    /// Wraps a loaded room and its parties.
    #[must_use]
    pub const fn new(room: Room, parties: Vec<Party>) -> Self {
        Self {
            room,
            parties,
            version: 0,
            last_error: None,
        }
    }

    /// Find a party of this room.
    #[must_use]
    pub fn party(&self, id: &PartyId) -> Option<&Party> {
        self.parties.iter().find(|party| party.id == *id)
    }

    /// Find a party of this room for mutation.
    pub fn party_mut(&mut self, id: &PartyId) -> Option<&mut Party> {
        self.parties.iter_mut().find(|party| party.id == *id)
    }

    /// Parties that are still `Open` or `Full`.
    pub fn active_parties(&self) -> impl Iterator<Item = &Party> {
        self.parties.iter().filter(|party| party.status.is_active())
    }

    /// The active party, other than `except`, that already involves `user`.
    #[must_use]
    pub fn active_party_of(&self, user: &UserId, except: Option<&PartyId>) -> Option<&Party> {
        self.active_parties()
            .filter(|party| Some(&party.id) != except)
            .find(|party| party.involves(user))
    }
}

/// Exclusive unit of work over one [`RoomAggregate`].
pub trait RoomTransaction: Send {
    /// The aggregate as loaded when the transaction began.
    fn aggregate(&self) -> &RoomAggregate;

    /// Persist the room status and every party of `aggregate`, then release
    /// the room.
    ///
    /// The view counter is not part of the aggregate and is never written here.
    ///
    /// # Errors
    ///
    /// Returns error if the backend write or commit fails, in which case no
    /// change is visible.
    fn commit(self: Box<Self>, aggregate: RoomAggregate) -> StoreFuture<'static, ()>;
}

/// Room and party persistence.
pub trait RoomStore: Send + Sync {
    /// Load a room with its parties without locking.
    ///
    /// # Errors
    ///
    /// Returns error if the backend query fails.
    fn load_room(&self, room: RoomId) -> StoreFuture<'_, Option<RoomAggregate>>;

    /// Resolve which room a party belongs to.
    ///
    /// # Errors
    ///
    /// Returns error if the backend query fails.
    fn room_of_party(&self, party: PartyId) -> StoreFuture<'_, Option<RoomId>>;

    /// Increment the room's view counter, returning the new value.
    ///
    /// Returns `None` if the room does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the backend update fails.
    fn record_view(&self, room: RoomId) -> StoreFuture<'_, Option<u64>>;

    /// Open an exclusive unit of work over the room and its parties.
    ///
    /// Returns `None` if the room does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the lock or load fails.
    fn begin(&self, room: RoomId) -> StoreFuture<'_, Option<Box<dyn RoomTransaction>>>;
}
