//! In-memory persistence backends.
//!
//! Both stores keep the atomicity contracts of `roomshare_core::store`:
//!
//! - the quota counter is an `AtomicU32` moved only by a compare-and-swap
//!   loop that refuses to pass the limit;
//! - each room sits behind its own async mutex, held for the whole life of a
//!   [`RoomTransaction`], so commands on one room are serialized while
//!   different rooms proceed in parallel.

use chrono::{DateTime, Utc};
use roomshare_core::StoreError;
use roomshare_core::store::{
    AccountDirectory, QuotaLedger, QuotaOutcome, RoomAggregate, RoomStore, RoomTransaction,
    StoreFuture,
};
use roomshare_core::types::{Account, Party, PartyId, Room, RoomId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug)]
struct AccountCell {
    profile: RwLock<Account>,
    quota: AtomicU32,
}

/// In-memory account directory and quota ledger.
///
/// # Example
///
/// ```
/// use roomshare_core::store::{QuotaLedger, QuotaOutcome};
/// use roomshare_core::types::{Account, UserId};
/// use roomshare_testing::InMemoryAccounts;
///
/// # tokio_test::block_on(async {
/// let accounts = InMemoryAccounts::new();
/// let user = UserId::new();
/// accounts.insert(Account::new(user).with_quota_used(2));
///
/// let outcome = accounts.try_consume(user, 3).await.unwrap();
/// assert_eq!(outcome, QuotaOutcome::Granted { used: 3 });
/// let outcome = accounts.try_consume(user, 3).await.unwrap();
/// assert_eq!(outcome, QuotaOutcome::Exhausted { used: 3 });
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryAccounts {
    accounts: Arc<RwLock<HashMap<UserId, Arc<AccountCell>>>>,
}

impl InMemoryAccounts {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an account.
    pub fn insert(&self, account: Account) {
        let cell = Arc::new(AccountCell {
            quota: AtomicU32::new(account.free_quota_used),
            profile: RwLock::new(account.clone()),
        });
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.id, cell);
    }

    /// Mark a room as favorite for a user. Returns `false` for unknown users.
    pub fn add_favorite(&self, user: UserId, room: RoomId) -> bool {
        self.cell(&user).is_some_and(|cell| {
            cell.profile
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .favorites
                .insert(room);
            true
        })
    }

    fn cell(&self, user: &UserId) -> Option<Arc<AccountCell>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }
}

impl AccountDirectory for InMemoryAccounts {
    fn load_account(&self, user: UserId) -> StoreFuture<'_, Option<Account>> {
        Box::pin(async move {
            Ok(self.cell(&user).map(|cell| {
                let mut account = cell
                    .profile
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                account.free_quota_used = cell.quota.load(Ordering::SeqCst);
                account
            }))
        })
    }

    fn set_subscription(
        &self,
        user: UserId,
        is_paid: bool,
        paid_until: Option<DateTime<Utc>>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let Some(cell) = self.cell(&user) else {
                return Ok(false);
            };
            let mut profile = cell.profile.write().unwrap_or_else(PoisonError::into_inner);
            profile.is_paid = is_paid;
            profile.paid_until = paid_until;
            Ok(true)
        })
    }
}

impl QuotaLedger for InMemoryAccounts {
    fn try_consume(&self, user: UserId, limit: u32) -> StoreFuture<'_, QuotaOutcome> {
        Box::pin(async move {
            let Some(cell) = self.cell(&user) else {
                return Ok(QuotaOutcome::UnknownUser);
            };
            let outcome = match cell.quota.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < limit).then_some(used + 1)
            }) {
                Ok(previous) => QuotaOutcome::Granted { used: previous + 1 },
                Err(used) => QuotaOutcome::Exhausted { used },
            };
            Ok(outcome)
        })
    }

    fn used(&self, user: UserId) -> StoreFuture<'_, Option<u32>> {
        Box::pin(async move { Ok(self.cell(&user).map(|cell| cell.quota.load(Ordering::SeqCst))) })
    }

    fn reset(&self, user: UserId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if let Some(cell) = self.cell(&user) {
                cell.quota.store(0, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

// ============================================================================
// Rooms
// ============================================================================

#[derive(Debug)]
struct StoredRoom {
    room: Room,
    parties: Vec<Party>,
}

#[derive(Debug)]
struct RoomCell {
    state: Arc<Mutex<StoredRoom>>,
    views: AtomicU64,
}

type PartyIndex = Arc<RwLock<HashMap<PartyId, RoomId>>>;

/// In-memory room and party store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRoomStore {
    rooms: Arc<RwLock<HashMap<RoomId, Arc<RoomCell>>>>,
    party_index: PartyIndex,
}

impl InMemoryRoomStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a room listing. Its parties start empty.
    pub fn insert_room(&self, room: Room) {
        let cell = Arc::new(RoomCell {
            views: AtomicU64::new(room.view_count),
            state: Arc::new(Mutex::new(StoredRoom {
                room: room.clone(),
                parties: Vec::new(),
            })),
        });
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room.id, cell);
    }

    fn cell(&self, room: &RoomId) -> Option<Arc<RoomCell>> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .cloned()
    }
}

impl RoomStore for InMemoryRoomStore {
    fn load_room(&self, room: RoomId) -> StoreFuture<'_, Option<RoomAggregate>> {
        Box::pin(async move {
            let Some(cell) = self.cell(&room) else {
                return Ok(None);
            };
            let stored = cell.state.lock().await;
            let mut room = stored.room.clone();
            room.view_count = cell.views.load(Ordering::SeqCst);
            Ok(Some(RoomAggregate::new(room, stored.parties.clone())))
        })
    }

    fn room_of_party(&self, party: PartyId) -> StoreFuture<'_, Option<RoomId>> {
        Box::pin(async move {
            Ok(self
                .party_index
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&party)
                .copied())
        })
    }

    fn record_view(&self, room: RoomId) -> StoreFuture<'_, Option<u64>> {
        Box::pin(async move {
            Ok(self
                .cell(&room)
                .map(|cell| cell.views.fetch_add(1, Ordering::SeqCst) + 1))
        })
    }

    fn begin(&self, room: RoomId) -> StoreFuture<'_, Option<Box<dyn RoomTransaction>>> {
        Box::pin(async move {
            let Some(cell) = self.cell(&room) else {
                return Ok(None);
            };
            let guard = Arc::clone(&cell.state).lock_owned().await;
            let mut snapshot = guard.room.clone();
            snapshot.view_count = cell.views.load(Ordering::SeqCst);
            let aggregate = RoomAggregate::new(snapshot, guard.parties.clone());

            let transaction: Box<dyn RoomTransaction> = Box::new(InMemoryRoomTransaction {
                guard,
                aggregate,
                party_index: Arc::clone(&self.party_index),
            });
            Ok(Some(transaction))
        })
    }
}

/// Holds the room's mutex until committed or dropped.
struct InMemoryRoomTransaction {
    guard: OwnedMutexGuard<StoredRoom>,
    aggregate: RoomAggregate,
    party_index: PartyIndex,
}

impl RoomTransaction for InMemoryRoomTransaction {
    fn aggregate(&self) -> &RoomAggregate {
        &self.aggregate
    }

    fn commit(self: Box<Self>, aggregate: RoomAggregate) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let Self {
                mut guard,
                party_index,
                ..
            } = *self;

            if aggregate.room.id != guard.room.id {
                return Err(StoreError::Corrupt(format!(
                    "transaction for room {} committed aggregate of room {}",
                    guard.room.id, aggregate.room.id
                )));
            }

            {
                let mut index = party_index.write().unwrap_or_else(PoisonError::into_inner);
                for party in &aggregate.parties {
                    index.insert(party.id, party.room);
                }
            }

            tracing::trace!(
                room_id = %aggregate.room.id,
                parties = aggregate.parties.len(),
                "In-memory room committed"
            );
            guard.room.status = aggregate.room.status;
            guard.parties = aggregate.parties;
            Ok(())
        })
    }
}
