//! Domain types for the roomshare marketplace.
//!
//! Identifiers, accounts, rooms, parties and the status enums whose legal
//! transitions are validated here and nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a user account
    UserId
);
uuid_id!(
    /// Unique identifier for a room listing
    RoomId
);
uuid_id!(
    /// Unique identifier for a party
    PartyId
);

// ============================================================================
// Accounts
// ============================================================================

/// A user account as seen by the entitlement gate.
///
/// Paid fields belong to the billing collaborator; `free_quota_used` is only
/// ever moved by the quota ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: UserId,
    /// Whether a subscription is active
    pub is_paid: bool,
    /// When the subscription lapses (`None` = no end date)
    pub paid_until: Option<DateTime<Utc>>,
    /// Free room views consumed so far
    pub free_quota_used: u32,
    /// Whether the user lists rooms
    pub is_room_owner: bool,
    /// Rooms the user has marked as favorite
    pub favorites: BTreeSet<RoomId>,
}

impl Account {
    /// Creates a free account with no quota consumed.
    #[must_use]
    pub const fn new(id: UserId) -> Self {
        Self {
            id,
            is_paid: false,
            paid_until: None,
            free_quota_used: 0,
            is_room_owner: false,
            favorites: BTreeSet::new(),
        }
    }

    /// Marks the account as a room owner.
    #[must_use]
    pub const fn room_owner(mut self) -> Self {
        self.is_room_owner = true;
        self
    }

    /// Gives the account an active subscription.
    #[must_use]
    pub const fn paid(mut self, paid_until: Option<DateTime<Utc>>) -> Self {
        self.is_paid = true;
        self.paid_until = paid_until;
        self
    }

    /// Sets the consumed free-view count.
    #[must_use]
    pub const fn with_quota_used(mut self, used: u32) -> Self {
        self.free_quota_used = used;
        self
    }

    /// Whether the subscription is in force at `now`.
    ///
    /// A paid account without an end date never lapses.
    #[must_use]
    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.is_paid && self.paid_until.is_none_or(|until| until > now)
    }
}

// ============================================================================
// Rooms
// ============================================================================

/// Lifecycle of a room listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    /// Open for parties
    Available,
    /// At least one party is full and awaiting the owner's decision
    Pending,
    /// Awarded to a winning party
    Taken,
}

impl RoomStatus {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Pending => "pending",
            Self::Taken => "taken",
        }
    }

    /// Parse status from its storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "pending" => Some(Self::Pending),
            "taken" => Some(Self::Taken),
            _ => None,
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier
    pub id: RoomId,
    /// Listing owner
    pub owner: UserId,
    /// Whether prospective tenants may form parties for this room
    pub shareable: bool,
    /// Lifecycle status
    pub status: RoomStatus,
    /// Number of detail fetches
    pub view_count: u64,
    /// Owner contact phone, if configured
    pub contact_phone: Option<String>,
}

impl Room {
    /// Creates an available, non-shareable room with no views.
    #[must_use]
    pub fn new(owner: UserId) -> Self {
        Self {
            id: RoomId::new(),
            owner,
            shareable: false,
            status: RoomStatus::Available,
            view_count: 0,
            contact_phone: None,
        }
    }

    /// Allows parties to form for this room.
    #[must_use]
    pub const fn shareable(mut self) -> Self {
        self.shareable = true;
        self
    }

    /// Sets the owner contact phone.
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.contact_phone = Some(phone.into());
        self
    }
}

// ============================================================================
// Parties
// ============================================================================

/// Lifecycle of a party.
///
/// ```text
/// Open ──► Full ──► Winner
///   │        │
///   │        └────► Closed
///   ├─────────────► Closed
///   └─────────────► Winner
/// ```
///
/// `Closed` and `Winner` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartyStatus {
    /// Accepting applications
    Open,
    /// At capacity
    Full,
    /// Lost to another party or otherwise ended
    Closed,
    /// Awarded the room
    Winner,
}

impl PartyStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Winner)
    }

    /// Whether the party still competes for its room.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Full | Self::Closed | Self::Winner)
                | (Self::Full, Self::Closed | Self::Winner)
        )
    }

    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Full => "full",
            Self::Closed => "closed",
            Self::Winner => "winner",
        }
    }

    /// Parse status from its storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "full" => Some(Self::Full),
            "closed" => Some(Self::Closed),
            "winner" => Some(Self::Winner),
            _ => None,
        }
    }
}

impl fmt::Display for PartyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate group of co-tenants for one shareable room.
///
/// Invariants: `leader ∈ members` and `members.len() <= max_members`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Party identifier
    pub id: PartyId,
    /// Room the party competes for
    pub room: RoomId,
    /// Party leader, always a member
    pub leader: UserId,
    /// Accepted members
    pub members: BTreeSet<UserId>,
    /// Pending applicants, oldest first
    pub member_application: Vec<UserId>,
    /// Capacity including the leader
    pub max_members: u32,
    /// Lifecycle status
    pub status: PartyStatus,
    /// When the party was formed
    pub created_at: DateTime<Utc>,
}

impl Party {
    /// Forms a new open party with the leader as its only member.
    #[must_use]
    pub fn new(
        id: PartyId,
        room: RoomId,
        leader: UserId,
        max_members: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            room,
            leader,
            members: BTreeSet::from([leader]),
            member_application: Vec::new(),
            max_members,
            status: PartyStatus::Open,
            created_at,
        }
    }

    /// Whether the user is a member or a pending applicant.
    #[must_use]
    pub fn involves(&self, user: &UserId) -> bool {
        self.members.contains(user) || self.member_application.contains(user)
    }

    /// Whether the party has no room for another member.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.member_count() >= self.max_members as usize
    }

    /// Number of accepted members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

// ============================================================================
// Access tiers
// ============================================================================

/// Access level of a viewer for one room, computed per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// No identity
    Anonymous,
    /// Signed in, metered by the free-view quota
    FreeAuthenticated,
    /// Active subscription
    Paid,
    /// The room's owner
    Owner,
}

impl Tier {
    /// Whether the tier sees full contact and party detail.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(self, Self::Paid | Self::Owner)
    }
}

/// A party leader's verdict on an application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Admit the applicant
    Accept,
    /// Turn the applicant away
    Reject,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [PartyStatus::Closed, PartyStatus::Winner] {
            for to in [
                PartyStatus::Open,
                PartyStatus::Full,
                PartyStatus::Closed,
                PartyStatus::Winner,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn full_cannot_reopen() {
        assert!(!PartyStatus::Full.can_transition_to(PartyStatus::Open));
        assert!(PartyStatus::Full.can_transition_to(PartyStatus::Winner));
        assert!(PartyStatus::Open.can_transition_to(PartyStatus::Full));
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            PartyStatus::Open,
            PartyStatus::Full,
            PartyStatus::Closed,
            PartyStatus::Winner,
        ] {
            assert_eq!(PartyStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RoomStatus::parse("taken"), Some(RoomStatus::Taken));
        assert_eq!(RoomStatus::parse("gone"), None);
    }

    #[test]
    fn new_party_contains_leader() {
        let leader = UserId::new();
        let party = Party::new(PartyId::new(), RoomId::new(), leader, 3, Utc::now());

        assert!(party.members.contains(&leader));
        assert!(party.involves(&leader));
        assert_eq!(party.status, PartyStatus::Open);
        assert!(!party.is_at_capacity());
    }

    #[test]
    fn subscription_window() {
        let now = Utc::now();
        let user = UserId::new();

        assert!(!Account::new(user).has_active_subscription(now));
        assert!(Account::new(user).paid(None).has_active_subscription(now));
        assert!(
            Account::new(user)
                .paid(Some(now + Duration::days(1)))
                .has_active_subscription(now)
        );
        assert!(
            !Account::new(user)
                .paid(Some(now - Duration::seconds(1)))
                .has_active_subscription(now)
        );
        assert!(!Account::new(user).paid(Some(now)).has_active_subscription(now));
    }
}
