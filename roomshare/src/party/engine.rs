//! Party matching engine: runs [`PartyReducer`] commands inside a room unit
//! of work.
//!
//! Every command follows the same path:
//!
//! 1. resolve the room and [`RoomStore::begin`] an exclusive transaction on it
//! 2. reduce the command against the locked snapshot
//! 3. commit if any event was applied, otherwise drop (roll back)
//! 4. spawn the notification effects, only after a successful commit
//! 5. report the validation error, if any
//!
//! Because step 1 serializes all commands of a room, winner selection can
//! never interleave with an `apply` or `decide` on a sibling party, and a
//! user's concurrent applications to two parties of one room are checked one
//! after the other.

use super::reducer::{PartyAction, PartyEnvironment, PartyReducer};
use crate::config::PartyConfig;
use roomshare_core::environment::Clock;
use roomshare_core::notify::Notifier;
use roomshare_core::reducer::Reducer;
use roomshare_core::store::RoomStore;
use roomshare_core::types::{Decision, Party, PartyId, RoomId, UserId};
use roomshare_core::{MarketError, Result};
use std::sync::Arc;
use tracing::Instrument;

/// Entry point for every party command and query.
#[derive(Clone)]
pub struct PartyEngine {
    rooms: Arc<dyn RoomStore>,
    reducer: PartyReducer,
    env: PartyEnvironment,
}

impl PartyEngine {
    /// Creates an engine over `rooms`, notifying through `notifier`.
    #[must_use]
    pub fn new(
        rooms: Arc<dyn RoomStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: &PartyConfig,
    ) -> Self {
        Self {
            rooms,
            reducer: PartyReducer::new(),
            env: PartyEnvironment::new(clock, notifier, config.max_members_cap),
        }
    }

    /// Form a party for a shareable room, led by `leader`.
    ///
    /// # Errors
    ///
    /// - [`MarketError::RoomNotFound`] if the room does not exist
    /// - [`MarketError::RoomNotShareable`] / [`MarketError::RoomTaken`] if it
    ///   cannot take parties
    /// - [`MarketError::InvalidCapacity`] if `max_members` is 0 or above the cap
    /// - [`MarketError::AlreadyInAnotherParty`] if the leader is already active
    ///   in a party for this room
    pub async fn create_party(
        &self,
        room_id: RoomId,
        leader: UserId,
        max_members: u32,
    ) -> Result<PartyId> {
        let party_id = PartyId::new();
        self.execute(
            room_id,
            PartyAction::CreateParty {
                party_id,
                leader,
                max_members,
            },
        )
        .await?;
        Ok(party_id)
    }

    /// Apply to join a party.
    ///
    /// # Errors
    ///
    /// - [`MarketError::PartyNotFound`] if the party does not exist
    /// - [`MarketError::PartyNotOpen`] unless the party is `Open`
    /// - [`MarketError::AlreadyMember`] / [`MarketError::AlreadyApplied`]
    /// - [`MarketError::AlreadyInAnotherParty`] if the user is active in a
    ///   sibling party
    pub async fn apply(&self, party_id: PartyId, user: UserId) -> Result<()> {
        let room_id = self.room_of(party_id).await?;
        self.execute(room_id, PartyAction::Apply { party_id, user })
            .await
    }

    /// Accept or reject a pending application.
    ///
    /// # Errors
    ///
    /// - [`MarketError::NotLeader`] unless `leader` leads the party
    /// - [`MarketError::PartyTerminal`] if the party is closed or won
    /// - [`MarketError::NoSuchApplication`] if `user` has no pending application
    /// - [`MarketError::PartyFull`] when accepting into a full party; the
    ///   application is removed regardless
    pub async fn decide(
        &self,
        party_id: PartyId,
        leader: UserId,
        user: UserId,
        decision: Decision,
    ) -> Result<()> {
        let room_id = self.room_of(party_id).await?;
        self.execute(
            room_id,
            PartyAction::Decide {
                party_id,
                leader,
                user,
                decision,
            },
        )
        .await
    }

    /// Award the room to a party, closing all of its live siblings.
    ///
    /// All-or-nothing: on success exactly one party of the room is `Winner`,
    /// every other is `Closed`, and the room is `Taken`; on failure nothing
    /// changed.
    ///
    /// # Errors
    ///
    /// - [`MarketError::NotRoomOwner`] unless `owner` owns the room
    /// - [`MarketError::PartyTerminal`] if the party is closed or already won
    pub async fn select_winner(&self, party_id: PartyId, owner: UserId) -> Result<()> {
        let room_id = self.room_of(party_id).await?;
        self.execute(room_id, PartyAction::SelectWinner { party_id, owner })
            .await
    }

    /// Current state of one party.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::PartyNotFound`] if the party does not exist.
    pub async fn party(&self, party_id: PartyId) -> Result<Party> {
        let room_id = self.room_of(party_id).await?;
        self.rooms
            .load_room(room_id)
            .await?
            .and_then(|aggregate| aggregate.party(&party_id).cloned())
            .ok_or(MarketError::PartyNotFound(party_id))
    }

    /// Every party of a room, oldest first, terminal ones included.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::RoomNotFound`] if the room does not exist.
    pub async fn parties_for_room(&self, room_id: RoomId) -> Result<Vec<Party>> {
        self.rooms
            .load_room(room_id)
            .await?
            .map(|aggregate| aggregate.parties)
            .ok_or(MarketError::RoomNotFound(room_id))
    }

    async fn room_of(&self, party_id: PartyId) -> Result<RoomId> {
        self.rooms
            .room_of_party(party_id)
            .await?
            .ok_or(MarketError::PartyNotFound(party_id))
    }

    async fn execute(&self, room_id: RoomId, action: PartyAction) -> Result<()> {
        let command = action.name();

        let Some(transaction) = self.rooms.begin(room_id).await? else {
            record_outcome(command, "not_found");
            return Err(MarketError::RoomNotFound(room_id));
        };

        let mut aggregate = transaction.aggregate().clone();
        let effects = self.reducer.reduce(&mut aggregate, action, &self.env);
        let error = aggregate.last_error.take();

        if aggregate.version == 0 {
            drop(transaction);
        } else {
            if let Err(store_error) = transaction.commit(aggregate).await {
                record_outcome(command, "unavailable");
                return Err(store_error.into());
            }

            let span = tracing::debug_span!("party_notifications", room_id = %room_id, command);
            for effect in effects {
                tokio::spawn(effect.run().instrument(span.clone()));
            }
        }

        match error {
            Some(error) => {
                record_outcome(command, "rejected");
                Err(error)
            },
            None => {
                record_outcome(command, "ok");
                Ok(())
            },
        }
    }
}

fn record_outcome(command: &'static str, outcome: &'static str) {
    metrics::counter!("roomshare.party.commands", "command" => command, "outcome" => outcome)
        .increment(1);
}

impl std::fmt::Debug for PartyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyEngine")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}
