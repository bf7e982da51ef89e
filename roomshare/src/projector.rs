//! Room access projector.
//!
//! Turns a room snapshot and a viewer [`Tier`] into the [`RoomView`] that
//! viewer may see:
//!
//! | Field            | Anonymous     | FreeAuthenticated | Paid / Owner        |
//! |------------------|---------------|-------------------|---------------------|
//! | `shareable`      | forced `false`| actual            | actual              |
//! | `parties`        | hidden        | active count      | full detail         |
//! | `contact_phone`  | hidden        | hidden            | shown if configured |
//! | favorite toggle  | disabled      | enabled           | enabled             |
//! | `can_contact`    | `false`       | `true`            | `true`              |
//!
//! Projection is pure. View counting happens in the caller, once per fetch.

use roomshare_core::store::RoomAggregate;
use roomshare_core::types::{Party, PartyId, PartyStatus, RoomId, RoomStatus, Tier, UserId};
use serde::{Deserialize, Serialize};

/// What a viewer may see of a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomView {
    /// Room identifier
    pub room_id: RoomId,
    /// Tier the view was projected for
    pub tier: Tier,
    /// Whether parties may form (always `false` for anonymous viewers)
    pub shareable: bool,
    /// Lifecycle status
    pub status: RoomStatus,
    /// Detail fetches so far, including this one
    pub view_count: u64,
    /// Party information
    pub parties: PartyVisibility,
    /// Owner contact phone
    pub contact_phone: Option<String>,
    /// Favorite toggle state
    pub favorite: FavoriteToggle,
    /// Whether the viewer may contact the owner
    pub can_contact: bool,
    /// Whether the viewer should be shown an upgrade prompt
    pub upgrade_required: bool,
}

/// How much of a room's parties a viewer may see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyVisibility {
    /// Nothing
    Hidden,
    /// Only how many parties are still competing
    Summary {
        /// Parties that are `Open` or `Full`
        active: usize,
    },
    /// Every party, terminal ones included
    Detail(Vec<PartyView>),
}

/// Full party detail for privileged viewers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyView {
    /// Party identifier
    pub party_id: PartyId,
    /// Leader
    pub leader: UserId,
    /// Accepted members, leader included
    pub members: Vec<UserId>,
    /// Pending applicants, oldest first
    pub pending: Vec<UserId>,
    /// Capacity
    pub max_members: u32,
    /// Status
    pub status: PartyStatus,
}

impl From<&Party> for PartyView {
    fn from(party: &Party) -> Self {
        Self {
            party_id: party.id,
            leader: party.leader,
            members: party.members.iter().copied().collect(),
            pending: party.member_application.clone(),
            max_members: party.max_members,
            status: party.status,
        }
    }
}

/// Favorite toggle as rendered for the viewer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteToggle {
    /// Whether the viewer may toggle it
    pub enabled: bool,
    /// Whether the room is currently a favorite
    pub active: bool,
}

impl RoomView {
    /// Reflect the viewer's favorite state, if the toggle is enabled.
    #[must_use]
    pub const fn with_favorite(mut self, active: bool) -> Self {
        self.favorite.active = self.favorite.enabled && active;
        self
    }
}

/// Project a room for a viewer of the given tier.
#[must_use]
pub fn project(aggregate: &RoomAggregate, tier: Tier) -> RoomView {
    let room = &aggregate.room;

    let parties = match tier {
        Tier::Anonymous => PartyVisibility::Hidden,
        Tier::FreeAuthenticated => PartyVisibility::Summary {
            active: aggregate.active_parties().count(),
        },
        Tier::Paid | Tier::Owner => {
            PartyVisibility::Detail(aggregate.parties.iter().map(PartyView::from).collect())
        },
    };

    RoomView {
        room_id: room.id,
        tier,
        shareable: tier != Tier::Anonymous && room.shareable,
        status: room.status,
        view_count: room.view_count,
        parties,
        contact_phone: if tier.is_privileged() {
            room.contact_phone.clone()
        } else {
            None
        },
        favorite: FavoriteToggle {
            enabled: tier != Tier::Anonymous,
            active: false,
        },
        can_contact: tier != Tier::Anonymous,
        upgrade_required: false,
    }
}

/// Restricted projection for a signed-in viewer whose free views ran out.
///
/// The page still renders, without contact details or party data, and asks
/// for an upgrade.
#[must_use]
pub fn restricted(aggregate: &RoomAggregate) -> RoomView {
    RoomView {
        parties: PartyVisibility::Hidden,
        contact_phone: None,
        can_contact: false,
        upgrade_required: true,
        ..project(aggregate, Tier::FreeAuthenticated)
    }
}
