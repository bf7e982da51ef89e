//! Party aggregate reducer.
//!
//! The aggregate is one room together with all of its parties, so every rule
//! that spans parties (one active membership per user per room, a single
//! winner) is checked against a complete, exclusively held snapshot.
//!
//! Commands are validated by `validate_*` functions; accepted commands become
//! events applied through the infallible [`PartyReducer::apply_event`]. A
//! rejected command records `last_error` and leaves the aggregate untouched,
//! except for the documented `PartyFull` case, which still drops the
//! application it was deciding.
//!
//! The reducer's only effects are notifications, returned as
//! [`Effect::Future`]s for the caller to run after the new state is committed.

use chrono::{DateTime, Utc};
use roomshare_core::effect::Effect;
use roomshare_core::environment::Clock;
use roomshare_core::notify::{NotificationKind, Notifier, PartyNotification};
use roomshare_core::reducer::Reducer;
use roomshare_core::store::RoomAggregate;
use roomshare_core::types::{Decision, Party, PartyId, PartyStatus, RoomStatus, UserId};
use roomshare_core::{MarketError, SmallVec, smallvec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Why an application left the queue without an acceptance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// The leader turned it down
    Leader,
    /// The leader accepted, but the party had no room left
    PartyFull,
}

/// Actions for the party aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyAction {
    // Commands
    /// Form a new party for the aggregate's room
    CreateParty {
        /// Identifier for the new party
        party_id: PartyId,
        /// Leader and first member
        leader: UserId,
        /// Capacity including the leader
        max_members: u32,
    },
    /// Queue an application
    Apply {
        /// Party applied to
        party_id: PartyId,
        /// Applicant
        user: UserId,
    },
    /// Accept or reject a pending application
    Decide {
        /// Party deciding
        party_id: PartyId,
        /// User acting as leader
        leader: UserId,
        /// Applicant
        user: UserId,
        /// Verdict
        decision: Decision,
    },
    /// Award the room to a party
    SelectWinner {
        /// Winning party
        party_id: PartyId,
        /// User acting as room owner
        owner: UserId,
    },

    // Events
    /// A party was formed
    PartyCreated {
        /// New party
        party_id: PartyId,
        /// Leader
        leader: UserId,
        /// Capacity
        max_members: u32,
        /// When
        created_at: DateTime<Utc>,
    },
    /// An application was queued
    ApplicationSubmitted {
        /// Party
        party_id: PartyId,
        /// Applicant
        user: UserId,
    },
    /// An applicant became a member
    ApplicationAccepted {
        /// Party
        party_id: PartyId,
        /// New member
        user: UserId,
        /// Whether the party reached capacity
        party_full: bool,
    },
    /// An application was removed without acceptance
    ApplicationRejected {
        /// Party
        party_id: PartyId,
        /// Former applicant
        user: UserId,
        /// Why
        reason: RejectionReason,
    },
    /// The room was awarded
    WinnerSelected {
        /// Winning party
        party_id: PartyId,
        /// Sibling parties closed in the same step
        closed: Vec<PartyId>,
    },
    /// A command failed validation
    CommandRejected {
        /// Why
        error: MarketError,
    },
}

impl PartyAction {
    /// Stable command name for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateParty { .. } => "create_party",
            Self::Apply { .. } => "apply",
            Self::Decide { .. } => "decide",
            Self::SelectWinner { .. } => "select_winner",
            Self::PartyCreated { .. } => "party_created",
            Self::ApplicationSubmitted { .. } => "application_submitted",
            Self::ApplicationAccepted { .. } => "application_accepted",
            Self::ApplicationRejected { .. } => "application_rejected",
            Self::WinnerSelected { .. } => "winner_selected",
            Self::CommandRejected { .. } => "command_rejected",
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the party reducer.
#[derive(Clone)]
pub struct PartyEnvironment {
    /// Time source for creation and notification timestamps
    pub clock: Arc<dyn Clock>,
    /// Where notifications go once a transition is committed
    pub notifier: Arc<dyn Notifier>,
    /// Largest party a leader may form
    pub max_members_cap: u32,
}

impl PartyEnvironment {
    /// Creates a new `PartyEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>, max_members_cap: u32) -> Self {
        Self {
            clock,
            notifier,
            max_members_cap,
        }
    }
}

impl std::fmt::Debug for PartyEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyEnvironment")
            .field("max_members_cap", &self.max_members_cap)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the party aggregate
#[derive(Clone, Debug, Default)]
pub struct PartyReducer;

impl PartyReducer {
    /// Creates a new `PartyReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn find_party(state: &RoomAggregate, party_id: &PartyId) -> Result<Party, MarketError> {
        state
            .party(party_id)
            .cloned()
            .ok_or(MarketError::PartyNotFound(*party_id))
    }

    /// Validates `CreateParty` command
    fn validate_create_party(
        state: &RoomAggregate,
        leader: &UserId,
        max_members: u32,
        cap: u32,
    ) -> Result<(), MarketError> {
        let room = &state.room;
        if !room.shareable {
            return Err(MarketError::RoomNotShareable { room_id: room.id });
        }
        if room.status == RoomStatus::Taken {
            return Err(MarketError::RoomTaken { room_id: room.id });
        }
        if max_members == 0 || max_members > cap {
            return Err(MarketError::InvalidCapacity { max_members, cap });
        }
        if let Some(other) = state.active_party_of(leader, None) {
            return Err(MarketError::AlreadyInAnotherParty {
                user: *leader,
                other_party: other.id,
            });
        }
        Ok(())
    }

    /// Validates `Apply` command
    ///
    /// The cross-party check runs against the whole room under the same lock
    /// as the append, so two concurrent applications by one user cannot both
    /// pass it.
    fn validate_apply(
        state: &RoomAggregate,
        party_id: &PartyId,
        user: &UserId,
    ) -> Result<Party, MarketError> {
        let party = Self::find_party(state, party_id)?;

        if party.status != PartyStatus::Open {
            return Err(MarketError::PartyNotOpen {
                party_id: *party_id,
                status: party.status,
            });
        }
        if party.members.contains(user) {
            return Err(MarketError::AlreadyMember {
                party_id: *party_id,
                user: *user,
            });
        }
        if party.member_application.contains(user) {
            return Err(MarketError::AlreadyApplied {
                party_id: *party_id,
                user: *user,
            });
        }
        if let Some(other) = state.active_party_of(user, Some(party_id)) {
            return Err(MarketError::AlreadyInAnotherParty {
                user: *user,
                other_party: other.id,
            });
        }
        Ok(party)
    }

    /// Validates `Decide` command
    fn validate_decide(
        state: &RoomAggregate,
        party_id: &PartyId,
        leader: &UserId,
        user: &UserId,
    ) -> Result<Party, MarketError> {
        let party = Self::find_party(state, party_id)?;

        if party.leader != *leader {
            return Err(MarketError::NotLeader {
                party_id: *party_id,
                user: *leader,
            });
        }
        if party.status.is_terminal() {
            return Err(MarketError::PartyTerminal {
                party_id: *party_id,
                status: party.status,
            });
        }
        if !party.member_application.contains(user) {
            return Err(MarketError::NoSuchApplication {
                party_id: *party_id,
                user: *user,
            });
        }
        Ok(party)
    }

    /// Validates `SelectWinner` command
    fn validate_select_winner(
        state: &RoomAggregate,
        party_id: &PartyId,
        owner: &UserId,
    ) -> Result<Party, MarketError> {
        let party = Self::find_party(state, party_id)?;

        if state.room.owner != *owner {
            return Err(MarketError::NotRoomOwner {
                room_id: state.room.id,
                user: *owner,
            });
        }
        if !party.status.can_transition_to(PartyStatus::Winner) {
            return Err(MarketError::PartyTerminal {
                party_id: *party_id,
                status: party.status,
            });
        }
        Ok(party)
    }

    /// Applies an event to state
    ///
    /// Events were validated before they were created, so this never fails.
    /// Every state-changing event bumps `version`.
    pub fn apply_event(state: &mut RoomAggregate, action: &PartyAction) {
        match action {
            PartyAction::PartyCreated {
                party_id,
                leader,
                max_members,
                created_at,
            } => {
                let party = Party::new(*party_id, state.room.id, *leader, *max_members, *created_at);
                state.parties.push(party);
                state.version += 1;
                state.last_error = None;
            },

            PartyAction::ApplicationSubmitted { party_id, user } => {
                if let Some(party) = state.party_mut(party_id) {
                    party.member_application.push(*user);
                }
                state.version += 1;
                state.last_error = None;
            },

            PartyAction::ApplicationAccepted {
                party_id,
                user,
                party_full,
            } => {
                if let Some(party) = state.party_mut(party_id) {
                    party.member_application.retain(|applicant| applicant != user);
                    party.members.insert(*user);
                    if *party_full && party.status.can_transition_to(PartyStatus::Full) {
                        party.status = PartyStatus::Full;
                    }
                }
                if *party_full && state.room.status == RoomStatus::Available {
                    state.room.status = RoomStatus::Pending;
                }
                state.version += 1;
                state.last_error = None;
            },

            PartyAction::ApplicationRejected { party_id, user, .. } => {
                if let Some(party) = state.party_mut(party_id) {
                    party.member_application.retain(|applicant| applicant != user);
                }
                state.version += 1;
                state.last_error = None;
            },

            PartyAction::WinnerSelected { party_id, closed } => {
                for party in &mut state.parties {
                    if party.id == *party_id {
                        party.status = PartyStatus::Winner;
                    } else if closed.contains(&party.id) {
                        party.status = PartyStatus::Closed;
                    }
                }
                state.room.status = RoomStatus::Taken;
                state.version += 1;
                state.last_error = None;
            },

            // Recorded for the caller, never persisted
            PartyAction::CommandRejected { error } => {
                state.last_error = Some(error.clone());
            },

            // Commands don't modify state
            PartyAction::CreateParty { .. }
            | PartyAction::Apply { .. }
            | PartyAction::Decide { .. }
            | PartyAction::SelectWinner { .. } => {},
        }
    }

    fn reject(state: &mut RoomAggregate, error: MarketError) -> SmallVec<[Effect<PartyAction>; 4]> {
        tracing::debug!(room_id = %state.room.id, error = %error, "Party command rejected");
        Self::apply_event(state, &PartyAction::CommandRejected { error });
        SmallVec::new()
    }

    /// Describe a notification to be delivered after commit.
    ///
    /// Delivery failures are logged and counted; they never feed an action
    /// back, so they cannot affect the committed transition.
    fn notify(env: &PartyEnvironment, notification: PartyNotification) -> Effect<PartyAction> {
        let notifier = Arc::clone(&env.notifier);
        Effect::Future(Box::pin(async move {
            let kind = notification.kind;
            let party_id = notification.party_id;
            if let Err(error) = notifier.notify(notification).await {
                metrics::counter!("roomshare.notifications.failed", "kind" => kind.as_str())
                    .increment(1);
                tracing::warn!(
                    party_id = %party_id,
                    kind = kind.as_str(),
                    error = %error,
                    "Party notification not delivered"
                );
            }
            None
        }))
    }

    fn notification(
        state: &RoomAggregate,
        env: &PartyEnvironment,
        kind: NotificationKind,
        party_id: PartyId,
        subject: Option<UserId>,
        recipients: Vec<UserId>,
    ) -> PartyNotification {
        PartyNotification {
            kind,
            room_id: state.room.id,
            party_id,
            subject,
            recipients,
            occurred_at: env.clock.now(),
        }
    }
}

impl Reducer for PartyReducer {
    type State = RoomAggregate;
    type Action = PartyAction;
    type Environment = PartyEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per command
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            PartyAction::CreateParty {
                party_id,
                leader,
                max_members,
            } => {
                if let Err(error) =
                    Self::validate_create_party(state, &leader, max_members, env.max_members_cap)
                {
                    return Self::reject(state, error);
                }

                Self::apply_event(
                    state,
                    &PartyAction::PartyCreated {
                        party_id,
                        leader,
                        max_members,
                        created_at: env.clock.now(),
                    },
                );
                tracing::info!(
                    room_id = %state.room.id,
                    party_id = %party_id,
                    leader = %leader,
                    max_members,
                    "Party created"
                );
                SmallVec::new()
            },

            PartyAction::Apply { party_id, user } => {
                let party = match Self::validate_apply(state, &party_id, &user) {
                    Ok(party) => party,
                    Err(error) => return Self::reject(state, error),
                };

                Self::apply_event(state, &PartyAction::ApplicationSubmitted { party_id, user });
                tracing::info!(party_id = %party_id, user = %user, "Application submitted");

                let notification = Self::notification(
                    state,
                    env,
                    NotificationKind::ApplicationReceived,
                    party_id,
                    Some(user),
                    vec![party.leader],
                );
                smallvec![Self::notify(env, notification)]
            },

            PartyAction::Decide {
                party_id,
                leader,
                user,
                decision,
            } => {
                let party = match Self::validate_decide(state, &party_id, &leader, &user) {
                    Ok(party) => party,
                    Err(error) => return Self::reject(state, error),
                };

                if decision == Decision::Reject {
                    Self::apply_event(
                        state,
                        &PartyAction::ApplicationRejected {
                            party_id,
                            user,
                            reason: RejectionReason::Leader,
                        },
                    );
                    tracing::info!(party_id = %party_id, user = %user, "Application rejected");

                    let notification = Self::notification(
                        state,
                        env,
                        NotificationKind::ApplicationRejected,
                        party_id,
                        Some(user),
                        vec![user],
                    );
                    return smallvec![Self::notify(env, notification)];
                }

                if party.is_at_capacity() {
                    // The application is consumed either way.
                    Self::apply_event(
                        state,
                        &PartyAction::ApplicationRejected {
                            party_id,
                            user,
                            reason: RejectionReason::PartyFull,
                        },
                    );
                    Self::apply_event(
                        state,
                        &PartyAction::CommandRejected {
                            error: MarketError::PartyFull {
                                party_id,
                                max_members: party.max_members,
                            },
                        },
                    );
                    tracing::info!(
                        party_id = %party_id,
                        user = %user,
                        "Application dropped, party is full"
                    );

                    let notification = Self::notification(
                        state,
                        env,
                        NotificationKind::ApplicationRejected,
                        party_id,
                        Some(user),
                        vec![user],
                    );
                    return smallvec![Self::notify(env, notification)];
                }

                let party_full = party.member_count() + 1 >= party.max_members as usize;
                Self::apply_event(
                    state,
                    &PartyAction::ApplicationAccepted {
                        party_id,
                        user,
                        party_full,
                    },
                );
                tracing::info!(
                    party_id = %party_id,
                    user = %user,
                    party_full,
                    room_status = %state.room.status,
                    "Application accepted"
                );

                let notification = Self::notification(
                    state,
                    env,
                    NotificationKind::ApplicationAccepted,
                    party_id,
                    Some(user),
                    vec![user],
                );
                smallvec![Self::notify(env, notification)]
            },

            PartyAction::SelectWinner { party_id, owner } => {
                let winner = match Self::validate_select_winner(state, &party_id, &owner) {
                    Ok(party) => party,
                    Err(error) => return Self::reject(state, error),
                };

                let losers: Vec<Party> = state
                    .active_parties()
                    .filter(|party| party.id != party_id)
                    .cloned()
                    .collect();
                let closed: Vec<PartyId> = losers.iter().map(|party| party.id).collect();

                Self::apply_event(
                    state,
                    &PartyAction::WinnerSelected {
                        party_id,
                        closed: closed.clone(),
                    },
                );
                tracing::info!(
                    room_id = %state.room.id,
                    party_id = %party_id,
                    closed = closed.len(),
                    "Winner selected"
                );

                let mut notifications = vec![Self::notify(
                    env,
                    Self::notification(
                        state,
                        env,
                        NotificationKind::WinnerSelected,
                        party_id,
                        None,
                        winner.members.iter().copied().collect(),
                    ),
                )];
                for loser in &losers {
                    let recipients = loser
                        .members
                        .iter()
                        .chain(loser.member_application.iter())
                        .copied()
                        .collect();
                    notifications.push(Self::notify(
                        env,
                        Self::notification(
                            state,
                            env,
                            NotificationKind::PartyClosed,
                            loser.id,
                            None,
                            recipients,
                        ),
                    ));
                }
                smallvec![Effect::merge(notifications)]
            },

            // ========== Events ==========
            // Replayed events are applied as-is
            event @ (PartyAction::PartyCreated { .. }
            | PartyAction::ApplicationSubmitted { .. }
            | PartyAction::ApplicationAccepted { .. }
            | PartyAction::ApplicationRejected { .. }
            | PartyAction::WinnerSelected { .. }
            | PartyAction::CommandRejected { .. }) => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use roomshare_core::types::Room;
    use roomshare_testing::reducer_test::assertions;
    use roomshare_testing::{RecordingNotifier, ReducerTest, test_clock};

    const CAP: u32 = 10;

    fn env() -> PartyEnvironment {
        PartyEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(RecordingNotifier::new()),
            CAP,
        )
    }

    struct Fixture {
        owner: UserId,
        leader: UserId,
        party_id: PartyId,
        aggregate: RoomAggregate,
    }

    fn fixture(max_members: u32) -> Fixture {
        let owner = UserId::new();
        let leader = UserId::new();
        let room = Room::new(owner).shareable();
        let party = Party::new(PartyId::new(), room.id, leader, max_members, test_clock().now());
        Fixture {
            owner,
            leader,
            party_id: party.id,
            aggregate: RoomAggregate::new(room, vec![party]),
        }
    }

    #[test]
    fn create_party_starts_open_with_leader() {
        let f = fixture(2);
        let party_id = PartyId::new();
        let leader = UserId::new();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::CreateParty {
                party_id,
                leader,
                max_members: 3,
            })
            .then_state(move |state| {
                let party = state.party(&party_id).expect("party created");
                assert_eq!(party.status, PartyStatus::Open);
                assert_eq!(party.members.len(), 1);
                assert!(party.members.contains(&leader));
                assert!(party.member_application.is_empty());
                assert_eq!(state.version, 1);
                assert!(state.last_error.is_none());
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn create_party_requires_shareable_room() {
        let mut f = fixture(2);
        f.aggregate.room.shareable = false;
        let room_id = f.aggregate.room.id;

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::CreateParty {
                party_id: PartyId::new(),
                leader: UserId::new(),
                max_members: 2,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::RoomNotShareable { room_id })
                );
                assert_eq!(state.parties.len(), 1);
                assert_eq!(state.version, 0);
            })
            .run();
    }

    #[test]
    fn create_party_rejects_bad_capacity_and_busy_leader() {
        let f = fixture(2);
        let leader = f.leader;
        let existing = f.party_id;

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate.clone())
            .when_action(PartyAction::CreateParty {
                party_id: PartyId::new(),
                leader: UserId::new(),
                max_members: CAP + 1,
            })
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::InvalidCapacity {
                        max_members: CAP + 1,
                        cap: CAP
                    })
                );
            })
            .run();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::CreateParty {
                party_id: PartyId::new(),
                leader,
                max_members: 2,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::AlreadyInAnotherParty {
                        user: leader,
                        other_party: existing
                    })
                );
            })
            .run();
    }

    #[test]
    fn apply_queues_and_notifies_leader() {
        let f = fixture(3);
        let party_id = f.party_id;
        let first = UserId::new();
        let second = UserId::new();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::Apply {
                party_id,
                user: first,
            })
            .when_action(PartyAction::Apply {
                party_id,
                user: second,
            })
            .then_state(move |state| {
                let party = state.party(&party_id).unwrap();
                assert_eq!(party.member_application, vec![first, second]);
            })
            .then_effects(|effects| assertions::assert_leaf_effects(effects, 1))
            .run();
    }

    #[test]
    fn apply_duplicates_are_rejected() {
        let f = fixture(3);
        let party_id = f.party_id;
        let leader = f.leader;
        let user = UserId::new();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate.clone())
            .when_action(PartyAction::Apply { party_id, user })
            .when_action(PartyAction::Apply { party_id, user })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::AlreadyApplied { party_id, user })
                );
                assert_eq!(state.party(&party_id).unwrap().member_application.len(), 1);
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::Apply {
                party_id,
                user: leader,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::AlreadyMember {
                        party_id,
                        user: leader
                    })
                );
            })
            .run();
    }

    #[test]
    fn accept_to_capacity_marks_party_full_and_room_pending() {
        let f = fixture(2);
        let party_id = f.party_id;
        let leader = f.leader;
        let user = UserId::new();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::Apply { party_id, user })
            .when_action(PartyAction::Decide {
                party_id,
                leader,
                user,
                decision: Decision::Accept,
            })
            .then_state(move |state| {
                let party = state.party(&party_id).unwrap();
                assert_eq!(party.status, PartyStatus::Full);
                assert!(party.members.contains(&user));
                assert!(party.member_application.is_empty());
                assert_eq!(state.room.status, RoomStatus::Pending);
            })
            .then_effects(|effects| assertions::assert_leaf_effects(effects, 1))
            .run();
    }

    #[test]
    fn accept_into_full_party_drops_application() {
        let f = fixture(2);
        let party_id = f.party_id;
        let leader = f.leader;
        let first = UserId::new();
        let second = UserId::new();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::Apply {
                party_id,
                user: first,
            })
            .when_action(PartyAction::Apply {
                party_id,
                user: second,
            })
            .when_action(PartyAction::Decide {
                party_id,
                leader,
                user: first,
                decision: Decision::Accept,
            })
            .when_action(PartyAction::Decide {
                party_id,
                leader,
                user: second,
                decision: Decision::Accept,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::PartyFull {
                        party_id,
                        max_members: 2
                    })
                );
                let party = state.party(&party_id).unwrap();
                assert_eq!(party.members.len(), 2);
                assert!(!party.members.contains(&second));
                assert!(party.member_application.is_empty());
            })
            .then_effects(|effects| assertions::assert_leaf_effects(effects, 1))
            .run();
    }

    #[test]
    fn decide_checks_leader_then_application() {
        let f = fixture(3);
        let party_id = f.party_id;
        let leader = f.leader;
        let impostor = UserId::new();
        let nobody = UserId::new();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate.clone())
            .when_action(PartyAction::Decide {
                party_id,
                leader: impostor,
                user: nobody,
                decision: Decision::Accept,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::NotLeader {
                        party_id,
                        user: impostor
                    })
                );
            })
            .run();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::Decide {
                party_id,
                leader,
                user: nobody,
                decision: Decision::Reject,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::NoSuchApplication {
                        party_id,
                        user: nobody
                    })
                );
                assert_eq!(state.version, 0);
            })
            .run();
    }

    #[test]
    fn select_winner_closes_every_sibling() {
        let mut f = fixture(2);
        let winner = f.party_id;
        let owner = f.owner;
        let room_id = f.aggregate.room.id;
        let sibling = Party::new(PartyId::new(), room_id, UserId::new(), 3, test_clock().now());
        let sibling_id = sibling.id;
        let mut lost_earlier = Party::new(PartyId::new(), room_id, UserId::new(), 3, test_clock().now());
        lost_earlier.status = PartyStatus::Closed;
        f.aggregate.parties.push(sibling);
        f.aggregate.parties.push(lost_earlier);

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::SelectWinner {
                party_id: winner,
                owner,
            })
            .then_state(move |state| {
                assert_eq!(state.room.status, RoomStatus::Taken);
                assert_eq!(state.party(&winner).unwrap().status, PartyStatus::Winner);
                assert_eq!(state.party(&sibling_id).unwrap().status, PartyStatus::Closed);
                let winners = state
                    .parties
                    .iter()
                    .filter(|p| p.status == PartyStatus::Winner)
                    .count();
                assert_eq!(winners, 1);
            })
            .then_effects(|effects| assertions::assert_leaf_effects(effects, 2))
            .run();
    }

    #[test]
    fn select_winner_requires_owner_and_live_party() {
        let f = fixture(2);
        let party_id = f.party_id;
        let owner = f.owner;
        let room_id = f.aggregate.room.id;
        let stranger = UserId::new();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate.clone())
            .when_action(PartyAction::SelectWinner {
                party_id,
                owner: stranger,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::NotRoomOwner {
                        room_id,
                        user: stranger
                    })
                );
                assert_eq!(state.room.status, RoomStatus::Available);
                assert_eq!(state.version, 0);
            })
            .run();

        ReducerTest::new(PartyReducer::new())
            .with_env(env())
            .given_state(f.aggregate)
            .when_action(PartyAction::SelectWinner { party_id, owner })
            .when_action(PartyAction::SelectWinner { party_id, owner })
            .then_state(move |state| {
                assert_eq!(
                    state.last_error,
                    Some(MarketError::PartyTerminal {
                        party_id,
                        status: PartyStatus::Winner
                    })
                );
                assert_eq!(state.version, 1);
            })
            .run();
    }
}
