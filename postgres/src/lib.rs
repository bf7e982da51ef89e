//! `PostgreSQL` persistence for roomshare.
//!
//! [`PostgresStore`] implements every persistence trait of `roomshare-core`
//! on a single connection pool:
//!
//! - quota consumption is one conditional `UPDATE … WHERE free_quota_used < $limit`,
//!   so concurrent requests across processes can never push a counter past the limit;
//! - party commands run inside a transaction that holds the room row with
//!   `SELECT … FOR UPDATE`, which serializes every command on one room and
//!   makes winner selection all-or-nothing;
//! - view counts live in their own table and are bumped with a single
//!   `UPDATE … RETURNING`.
//!
//! # Example
//!
//! ```no_run
//! use roomshare_postgres::PostgresStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/roomshare", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use roomshare_core::StoreError;
use roomshare_core::store::{
    AccountDirectory, QuotaLedger, QuotaOutcome, RoomAggregate, RoomStore, RoomTransaction,
    StoreFuture,
};
use roomshare_core::types::{
    Account, Party, PartyId, PartyStatus, Room, RoomId, RoomStatus, UserId,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Postgres, Row, Transaction};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

const ROOM_COLUMNS: &str = r"
    SELECT r.room_id, r.owner_id, r.shareable, r.status, r.contact_phone,
           COALESCE(v.view_count, 0) AS view_count
    FROM rooms r
    LEFT JOIN room_views v ON v.room_id = r.room_id
    WHERE r.room_id = $1
";

const PARTY_COLUMNS: &str = r"
    SELECT party_id, room_id, leader_id, members, member_application,
           max_members, status, created_at
    FROM parties
    WHERE room_id = $1
    ORDER BY created_at ASC, party_id ASC
";

#[allow(clippy::needless_pass_by_value)] // Used as a map_err adapter
fn db_error(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

fn count_to_u32(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

fn room_from_row(row: &PgRow) -> Result<Room, StoreError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let view_count: i64 = row.try_get("view_count").map_err(db_error)?;

    Ok(Room {
        id: RoomId::from_uuid(row.try_get("room_id").map_err(db_error)?),
        owner: UserId::from_uuid(row.try_get("owner_id").map_err(db_error)?),
        shareable: row.try_get("shareable").map_err(db_error)?,
        status: RoomStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown room status: {status}")))?,
        view_count: u64::try_from(view_count)
            .map_err(|_| StoreError::Corrupt(format!("negative view_count: {view_count}")))?,
        contact_phone: row.try_get("contact_phone").map_err(db_error)?,
    })
}

fn party_from_row(row: &PgRow) -> Result<Party, StoreError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let members: Vec<Uuid> = row.try_get("members").map_err(db_error)?;
    let applications: Vec<Uuid> = row.try_get("member_application").map_err(db_error)?;
    let max_members: i32 = row.try_get("max_members").map_err(db_error)?;

    Ok(Party {
        id: PartyId::from_uuid(row.try_get("party_id").map_err(db_error)?),
        room: RoomId::from_uuid(row.try_get("room_id").map_err(db_error)?),
        leader: UserId::from_uuid(row.try_get("leader_id").map_err(db_error)?),
        members: members.into_iter().map(UserId::from_uuid).collect(),
        member_application: applications.into_iter().map(UserId::from_uuid).collect(),
        max_members: count_to_u32(max_members, "max_members")?,
        status: PartyStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown party status: {status}")))?,
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}

async fn fetch_parties<'c, E>(executor: E, room: RoomId) -> Result<Vec<Party>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(PARTY_COLUMNS)
        .bind(*room.as_uuid())
        .fetch_all(executor)
        .await
        .map_err(db_error)?;

    rows.iter().map(party_from_row).collect()
}

/// `PostgreSQL` implementation of the roomshare persistence traits.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect a pool of at most `max_connections` to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    /// Insert an account (registration is owned by the identity service).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let used = i32::try_from(account.free_quota_used)
            .map_err(|_| StoreError::Corrupt("free_quota_used overflow".to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query(
            r"
            INSERT INTO accounts (user_id, is_paid, paid_until, free_quota_used, is_room_owner)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(*account.id.as_uuid())
        .bind(account.is_paid)
        .bind(account.paid_until)
        .bind(used)
        .bind(account.is_room_owner)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        for room in &account.favorites {
            sqlx::query("INSERT INTO favorites (user_id, room_id) VALUES ($1, $2)")
                .bind(*account.id.as_uuid())
                .bind(*room.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)
    }

    /// Insert a room listing together with its view counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn insert_room(&self, room: &Room) -> Result<(), StoreError> {
        let views = i64::try_from(room.view_count)
            .map_err(|_| StoreError::Corrupt("view_count overflow".to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query(
            r"
            INSERT INTO rooms (room_id, owner_id, shareable, status, contact_phone)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(*room.id.as_uuid())
        .bind(*room.owner.as_uuid())
        .bind(room.shareable)
        .bind(room.status.as_str())
        .bind(room.contact_phone.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query("INSERT INTO room_views (room_id, view_count) VALUES ($1, $2)")
            .bind(*room.id.as_uuid())
            .bind(views)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    /// Mark a room as favorite for a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn add_favorite(&self, user: UserId, room: RoomId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO favorites (user_id, room_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(*user.as_uuid())
        .bind(*room.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

impl AccountDirectory for PostgresStore {
    fn load_account(&self, user: UserId) -> StoreFuture<'_, Option<Account>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT user_id, is_paid, paid_until, free_quota_used, is_room_owner
                FROM accounts
                WHERE user_id = $1
                ",
            )
            .bind(*user.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let favorites: Vec<(Uuid,)> =
                sqlx::query_as("SELECT room_id FROM favorites WHERE user_id = $1")
                    .bind(*user.as_uuid())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?;

            let used: i32 = row.try_get("free_quota_used").map_err(db_error)?;
            Ok(Some(Account {
                id: user,
                is_paid: row.try_get("is_paid").map_err(db_error)?,
                paid_until: row.try_get("paid_until").map_err(db_error)?,
                free_quota_used: count_to_u32(used, "free_quota_used")?,
                is_room_owner: row.try_get("is_room_owner").map_err(db_error)?,
                favorites: favorites
                    .into_iter()
                    .map(|(room,)| RoomId::from_uuid(room))
                    .collect::<BTreeSet<_>>(),
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
            let result = sqlx::query(
                "UPDATE accounts SET is_paid = $2, paid_until = $3 WHERE user_id = $1",
            )
            .bind(*user.as_uuid())
            .bind(is_paid)
            .bind(paid_until)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(result.rows_affected() > 0)
        })
    }
}

impl QuotaLedger for PostgresStore {
    fn try_consume(&self, user: UserId, limit: u32) -> StoreFuture<'_, QuotaOutcome> {
        Box::pin(async move {
            let limit = i32::try_from(limit).unwrap_or(i32::MAX);

            // Single conditional increment: the row lock taken by UPDATE makes
            // concurrent callers re-check the predicate against the new value.
            // The current count comes back in the same statement when nothing
            // was granted.
            let (granted, current): (Option<i32>, Option<i32>) = sqlx::query_as(
                r"
                WITH bumped AS (
                    UPDATE accounts
                    SET free_quota_used = free_quota_used + 1
                    WHERE user_id = $1 AND free_quota_used < $2
                    RETURNING free_quota_used
                )
                SELECT (SELECT free_quota_used FROM bumped) AS granted,
                       (SELECT free_quota_used FROM accounts WHERE user_id = $1) AS current
                ",
            )
            .bind(*user.as_uuid())
            .bind(limit)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            match (granted, current) {
                (Some(used), _) => Ok(QuotaOutcome::Granted {
                    used: count_to_u32(used, "free_quota_used")?,
                }),
                (None, Some(used)) => Ok(QuotaOutcome::Exhausted {
                    used: count_to_u32(used, "free_quota_used")?,
                }),
                (None, None) => Ok(QuotaOutcome::UnknownUser),
            }
        })
    }

    fn used(&self, user: UserId) -> StoreFuture<'_, Option<u32>> {
        Box::pin(async move {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT free_quota_used FROM accounts WHERE user_id = $1")
                    .bind(*user.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?;

            row.map(|(used,)| count_to_u32(used, "free_quota_used"))
                .transpose()
        })
    }

    fn reset(&self, user: UserId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE accounts SET free_quota_used = 0 WHERE user_id = $1")
                .bind(*user.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}

impl RoomStore for PostgresStore {
    fn load_room(&self, room: RoomId) -> StoreFuture<'_, Option<RoomAggregate>> {
        Box::pin(async move {
            // Room and parties come from one snapshot so a concurrent commit
            // is seen entirely or not at all.
            let mut tx = self.pool.begin().await.map_err(db_error)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

            let row = sqlx::query(ROOM_COLUMNS)
                .bind(*room.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let room = room_from_row(&row)?;
            let parties = fetch_parties(&mut *tx, room.id).await?;
            tx.commit().await.map_err(db_error)?;
            Ok(Some(RoomAggregate::new(room, parties)))
        })
    }

    fn room_of_party(&self, party: PartyId) -> StoreFuture<'_, Option<RoomId>> {
        Box::pin(async move {
            let row: Option<(Uuid,)> =
                sqlx::query_as("SELECT room_id FROM parties WHERE party_id = $1")
                    .bind(*party.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?;

            Ok(row.map(|(room,)| RoomId::from_uuid(room)))
        })
    }

    fn record_view(&self, room: RoomId) -> StoreFuture<'_, Option<u64>> {
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as(
                r"
                UPDATE room_views
                SET view_count = view_count + 1
                WHERE room_id = $1
                RETURNING view_count
                ",
            )
            .bind(*room.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            let Some((count,)) = row else {
                return Ok(None);
            };
            metrics::counter!("roomshare.postgres.views").increment(1);

            u64::try_from(count)
                .map(Some)
                .map_err(|_| StoreError::Corrupt(format!("negative view_count: {count}")))
        })
    }

    fn begin(&self, room: RoomId) -> StoreFuture<'_, Option<Box<dyn RoomTransaction>>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error)?;

            let locked = format!("{ROOM_COLUMNS} FOR UPDATE OF r");
            let row = sqlx::query(&locked)
                .bind(*room.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let room = room_from_row(&row)?;
            let parties = fetch_parties(&mut *tx, room.id).await?;
            tracing::trace!(room_id = %room.id, parties = parties.len(), "Room locked");

            let transaction: Box<dyn RoomTransaction> = Box::new(PostgresRoomTransaction {
                tx,
                aggregate: RoomAggregate::new(room, parties),
            });
            Ok(Some(transaction))
        })
    }
}

/// Holds the room row lock until committed; dropping rolls back.
struct PostgresRoomTransaction {
    tx: Transaction<'static, Postgres>,
    aggregate: RoomAggregate,
}

impl RoomTransaction for PostgresRoomTransaction {
    fn aggregate(&self) -> &RoomAggregate {
        &self.aggregate
    }

    fn commit(self: Box<Self>, aggregate: RoomAggregate) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let Self {
                mut tx,
                aggregate: loaded,
            } = *self;

            if aggregate.room.id != loaded.room.id {
                return Err(StoreError::Corrupt(format!(
                    "transaction for room {} committed aggregate of room {}",
                    loaded.room.id, aggregate.room.id
                )));
            }

            let changed: Vec<&Party> = aggregate
                .parties
                .iter()
                .filter(|party| loaded.party(&party.id) != Some(*party))
                .collect();

            for party in &changed {
                let members: Vec<Uuid> = party.members.iter().map(|u| *u.as_uuid()).collect();
                let applications: Vec<Uuid> = party
                    .member_application
                    .iter()
                    .map(|u| *u.as_uuid())
                    .collect();
                let max_members = i32::try_from(party.max_members)
                    .map_err(|_| StoreError::Corrupt("max_members overflow".to_string()))?;

                sqlx::query(
                    r"
                    INSERT INTO parties (
                        party_id, room_id, leader_id, members, member_application,
                        max_members, status, created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (party_id) DO UPDATE
                    SET members = EXCLUDED.members,
                        member_application = EXCLUDED.member_application,
                        status = EXCLUDED.status,
                        updated_at = now()
                    ",
                )
                .bind(*party.id.as_uuid())
                .bind(*party.room.as_uuid())
                .bind(*party.leader.as_uuid())
                .bind(members)
                .bind(applications)
                .bind(max_members)
                .bind(party.status.as_str())
                .bind(party.created_at)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            }

            if aggregate.room.status != loaded.room.status {
                sqlx::query("UPDATE rooms SET status = $2, updated_at = now() WHERE room_id = $1")
                    .bind(*aggregate.room.id.as_uuid())
                    .bind(aggregate.room.status.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
            }

            tx.commit().await.map_err(db_error)?;

            tracing::debug!(
                room_id = %aggregate.room.id,
                parties_written = changed.len(),
                room_status = %aggregate.room.status,
                "Room transaction committed"
            );
            metrics::counter!("roomshare.postgres.commits").increment(1);
            Ok(())
        })
    }
}
