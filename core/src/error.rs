//! Error types for entitlement and party operations.

use crate::types::{PartyId, PartyStatus, RoomId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for marketplace operations.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Coarse failure category, independent of transport.
///
/// Callers map these onto their own status codes (the HTTP layer maps
/// `AccessDenied` to 403, `NotFound` to 404 and so on).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Caller is not the room owner or party leader
    AccessDenied,
    /// Target is in a state that forbids the operation
    InvalidState,
    /// Party has no room for another member
    CapacityExceeded,
    /// User already belongs to or applied to a party
    DuplicateMembership,
    /// Free-view limit reached
    QuotaExceeded,
    /// Room, party, user or application missing
    NotFound,
    /// Persistence layer failed; reads may be retried
    Unavailable,
}

/// Every caller-visible failure of the entitlement gate and party engine.
///
/// All variants abort the requested mutation without partial effect, with one
/// documented exception: [`MarketError::PartyFull`] raised while accepting an
/// application still removes that application.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketError {
    // ═══════════════════════════════════════════════════════════
    // Access
    // ═══════════════════════════════════════════════════════════

    /// Only the party leader may decide applications.
    #[error("User {user} is not the leader of party {party_id}")]
    NotLeader {
        /// Party acted upon
        party_id: PartyId,
        /// User who attempted the decision
        user: UserId,
    },

    /// Only the room owner may select a winner.
    #[error("User {user} does not own room {room_id}")]
    NotRoomOwner {
        /// Room acted upon
        room_id: RoomId,
        /// User who attempted the selection
        user: UserId,
    },

    // ═══════════════════════════════════════════════════════════
    // State
    // ═══════════════════════════════════════════════════════════

    /// Applications are only taken while a party is open.
    #[error("Party {party_id} is {status}, not open")]
    PartyNotOpen {
        /// Party applied to
        party_id: PartyId,
        /// Its current status
        status: PartyStatus,
    },

    /// The party already reached a terminal state.
    #[error("Party {party_id} is already {status}")]
    PartyTerminal {
        /// Party acted upon
        party_id: PartyId,
        /// Its terminal status
        status: PartyStatus,
    },

    /// Parties can only form for shareable rooms.
    #[error("Room {room_id} is not shareable")]
    RoomNotShareable {
        /// Room in question
        room_id: RoomId,
    },

    /// The room has already been awarded.
    #[error("Room {room_id} is already taken")]
    RoomTaken {
        /// Room in question
        room_id: RoomId,
    },

    /// Requested party size is out of range.
    #[error("Party size {max_members} is outside 1..={cap}")]
    InvalidCapacity {
        /// Requested size
        max_members: u32,
        /// Largest size allowed
        cap: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Capacity
    // ═══════════════════════════════════════════════════════════

    /// The party has no room for another member.
    #[error("Party {party_id} is full ({max_members} members)")]
    PartyFull {
        /// Party in question
        party_id: PartyId,
        /// Its capacity
        max_members: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Membership
    // ═══════════════════════════════════════════════════════════

    /// The user is already an accepted member.
    #[error("User {user} is already a member of party {party_id}")]
    AlreadyMember {
        /// Party in question
        party_id: PartyId,
        /// User in question
        user: UserId,
    },

    /// The user already has a pending application.
    #[error("User {user} already applied to party {party_id}")]
    AlreadyApplied {
        /// Party in question
        party_id: PartyId,
        /// User in question
        user: UserId,
    },

    /// The user is active in a different party for the same room.
    #[error("User {user} is already in party {other_party} for this room")]
    AlreadyInAnotherParty {
        /// User in question
        user: UserId,
        /// The party already holding the user
        other_party: PartyId,
    },

    // ═══════════════════════════════════════════════════════════
    // Quota
    // ═══════════════════════════════════════════════════════════

    /// The free-view allowance is used up.
    #[error("Free view quota exhausted ({used}/{limit})")]
    QuotaExceeded {
        /// Views consumed
        used: u32,
        /// Allowance
        limit: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════

    /// No such room.
    #[error("Room {0} not found")]
    RoomNotFound(RoomId),

    /// No such party.
    #[error("Party {0} not found")]
    PartyNotFound(PartyId),

    /// No such user.
    #[error("User {0} not found")]
    UserNotFound(UserId),

    /// The user has no pending application with this party.
    #[error("User {user} has no pending application with party {party_id}")]
    NoSuchApplication {
        /// Party in question
        party_id: PartyId,
        /// User in question
        user: UserId,
    },

    // ═══════════════════════════════════════════════════════════
    // System
    // ═══════════════════════════════════════════════════════════

    /// Persistence failed (timeout, connectivity, corrupt row).
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl MarketError {
    /// Failure category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotLeader { .. } | Self::NotRoomOwner { .. } => ErrorKind::AccessDenied,
            Self::PartyNotOpen { .. }
            | Self::PartyTerminal { .. }
            | Self::RoomNotShareable { .. }
            | Self::RoomTaken { .. }
            | Self::InvalidCapacity { .. } => ErrorKind::InvalidState,
            Self::PartyFull { .. } => ErrorKind::CapacityExceeded,
            Self::AlreadyMember { .. }
            | Self::AlreadyApplied { .. }
            | Self::AlreadyInAnotherParty { .. } => ErrorKind::DuplicateMembership,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::RoomNotFound(_)
            | Self::PartyNotFound(_)
            | Self::UserNotFound(_)
            | Self::NoSuchApplication { .. } => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Whether resubmitting the same request may succeed.
    ///
    /// Only infrastructure failures qualify. Callers must still check the
    /// resulting state before retrying a mutation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors raised by persistence backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to a domain type
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for MarketError {
    fn from(error: StoreError) -> Self {
        tracing::error!(%error, "Persistence failure");
        Self::Unavailable(error.to_string())
    }
}
