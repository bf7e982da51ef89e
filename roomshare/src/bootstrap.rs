//! Wires configured stores into the services.

use crate::billing::Subscriptions;
use crate::config::{Config, StorageBackend};
use crate::entitlement::EntitlementGate;
use crate::party::PartyEngine;
use crate::viewing::RoomViewer;
use roomshare_core::StoreError;
use roomshare_core::environment::Clock;
use roomshare_core::notify::BroadcastNotifier;
use roomshare_core::store::{AccountDirectory, QuotaLedger, RoomStore};
use roomshare_core::types::{Account, Room, RoomId, UserId};
use roomshare_postgres::PostgresStore;
use roomshare_testing::{InMemoryAccounts, InMemoryRoomStore};
use std::sync::Arc;
use tracing::info;

/// Concrete persistence behind the service traits.
///
/// Account and listing creation belong to other services; these helpers exist
/// so a fresh deployment (or the walkthrough binary) can be seeded.
#[derive(Clone, Debug)]
pub enum Backend {
    /// Process-local maps
    Memory {
        /// Accounts and quota
        accounts: InMemoryAccounts,
        /// Rooms and parties
        rooms: InMemoryRoomStore,
    },
    /// `PostgreSQL`
    Postgres(PostgresStore),
}

impl Backend {
    /// Connect the backend named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if `PostgreSQL` is unreachable or
    /// migrations fail.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Self::Memory {
                accounts: InMemoryAccounts::new(),
                rooms: InMemoryRoomStore::new(),
            }),
            StorageBackend::Postgres => {
                let postgres = &config.storage.postgres;
                let store = PostgresStore::connect(&postgres.url, postgres.max_connections).await?;
                store.migrate().await?;
                info!("PostgreSQL store connected and migrated");
                Ok(Self::Postgres(store))
            },
        }
    }

    /// Register an account.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn add_account(&self, account: Account) -> Result<(), StoreError> {
        match self {
            Self::Memory { accounts, .. } => {
                accounts.insert(account);
                Ok(())
            },
            Self::Postgres(store) => store.insert_account(&account).await,
        }
    }

    /// Register a room listing.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn add_room(&self, room: Room) -> Result<(), StoreError> {
        match self {
            Self::Memory { rooms, .. } => {
                rooms.insert_room(room);
                Ok(())
            },
            Self::Postgres(store) => store.insert_room(&room).await,
        }
    }

    /// Mark a room as favorite.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn add_favorite(&self, user: UserId, room: RoomId) -> Result<(), StoreError> {
        match self {
            Self::Memory { accounts, .. } => {
                accounts.add_favorite(user, room);
                Ok(())
            },
            Self::Postgres(store) => store.add_favorite(user, room).await,
        }
    }

    fn accounts(&self) -> Arc<dyn AccountDirectory> {
        match self {
            Self::Memory { accounts, .. } => Arc::new(accounts.clone()),
            Self::Postgres(store) => Arc::new(store.clone()),
        }
    }

    fn quota(&self) -> Arc<dyn QuotaLedger> {
        match self {
            Self::Memory { accounts, .. } => Arc::new(accounts.clone()),
            Self::Postgres(store) => Arc::new(store.clone()),
        }
    }

    fn rooms(&self) -> Arc<dyn RoomStore> {
        match self {
            Self::Memory { rooms, .. } => Arc::new(rooms.clone()),
            Self::Postgres(store) => Arc::new(store.clone()),
        }
    }
}

/// Every service of the marketplace core, sharing one backend.
#[derive(Clone, Debug)]
pub struct Services {
    /// Room detail reads
    pub viewer: RoomViewer,
    /// Party commands and queries
    pub parties: PartyEngine,
    /// Billing hook
    pub subscriptions: Subscriptions,
    /// Party notification fan-out
    pub notifier: BroadcastNotifier,
}

impl Services {
    /// Build the services over `backend`.
    #[must_use]
    pub fn build(config: &Config, backend: &Backend, clock: Arc<dyn Clock>) -> Self {
        let notifier = BroadcastNotifier::new(config.notifications.channel_capacity);
        let gate = EntitlementGate::new(
            backend.accounts(),
            backend.quota(),
            Arc::clone(&clock),
            config.entitlement.free_view_limit,
        );

        Self {
            viewer: RoomViewer::new(backend.rooms(), backend.accounts(), gate),
            parties: PartyEngine::new(
                backend.rooms(),
                Arc::new(notifier.clone()),
                clock,
                &config.party,
            ),
            subscriptions: Subscriptions::new(backend.accounts(), backend.quota()),
            notifier,
        }
    }
}
