//! Randomized command sequences against the party reducer.
//!
//! After every step the room must satisfy the membership invariants,
//! whatever mix of accepted and rejected commands got it there.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use proptest::prelude::*;
use roomshare::party::{PartyAction, PartyEnvironment, PartyReducer};
use roomshare_core::environment::Clock;
use roomshare_core::reducer::Reducer;
use roomshare_core::store::RoomAggregate;
use roomshare_core::types::{Decision, Party, PartyId, PartyStatus, Room, RoomStatus, UserId};
use roomshare_testing::{RecordingNotifier, test_clock};
use std::collections::HashSet;
use std::sync::Arc;

const USERS: usize = 6;
const PARTIES: usize = 3;

#[derive(Clone, Debug)]
enum Step {
    Apply { party: usize, user: usize },
    Decide { party: usize, user: usize, accept: bool },
    DecideAsStranger { party: usize, user: usize },
    SelectWinner { party: usize },
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..PARTIES, 0..USERS).prop_map(|(party, user)| Step::Apply { party, user }),
        4 => (0..PARTIES, 0..USERS, any::<bool>())
            .prop_map(|(party, user, accept)| Step::Decide { party, user, accept }),
        1 => (0..PARTIES, 0..USERS).prop_map(|(party, user)| Step::DecideAsStranger { party, user }),
        1 => (0..PARTIES).prop_map(|party| Step::SelectWinner { party }),
    ]
}

struct Setup {
    owner: UserId,
    users: Vec<UserId>,
    parties: Vec<(PartyId, UserId)>,
    aggregate: RoomAggregate,
}

fn setup(capacities: &[u32]) -> Setup {
    let owner = UserId::new();
    let room = Room::new(owner).shareable();
    let now = test_clock().now();

    let parties: Vec<(PartyId, UserId)> = (0..PARTIES)
        .map(|_| (PartyId::new(), UserId::new()))
        .collect();
    let records = parties
        .iter()
        .zip(capacities)
        .map(|((id, leader), max)| Party::new(*id, room.id, *leader, *max, now))
        .collect();

    Setup {
        owner,
        users: (0..USERS).map(|_| UserId::new()).collect(),
        parties,
        aggregate: RoomAggregate::new(room, records),
    }
}

fn check_invariants(state: &RoomAggregate) -> Result<(), TestCaseError> {
    let mut seen = HashSet::new();
    for party in state.active_parties() {
        for user in party.members.iter().chain(&party.member_application) {
            prop_assert!(seen.insert(*user), "{user} active in two parties");
        }
    }

    for party in &state.parties {
        prop_assert!(party.members.contains(&party.leader));
        prop_assert!(party.members.len() <= party.max_members as usize);
        prop_assert!(party.members.iter().all(|m| !party.member_application.contains(m)));
        if party.status == PartyStatus::Full {
            prop_assert_eq!(party.members.len(), party.max_members as usize);
        }
    }

    let winners = state
        .parties
        .iter()
        .filter(|party| party.status == PartyStatus::Winner)
        .count();
    prop_assert!(winners <= 1);
    if winners == 1 {
        prop_assert_eq!(state.room.status, RoomStatus::Taken);
        prop_assert!(state.parties.iter().all(|party| party.status.is_terminal()));
    } else {
        prop_assert_ne!(state.room.status, RoomStatus::Taken);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn membership_invariants_hold_after_any_sequence(
        capacities in prop::collection::vec(1u32..=4, PARTIES),
        steps in prop::collection::vec(arb_step(), 1..60),
    ) {
        let Setup { owner, users, parties, mut aggregate } = setup(&capacities);
        let env = PartyEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(RecordingNotifier::new()),
            10,
        );
        let reducer = PartyReducer::new();

        for step in steps {
            let action = match step {
                Step::Apply { party, user } => PartyAction::Apply {
                    party_id: parties[party].0,
                    user: users[user],
                },
                Step::Decide { party, user, accept } => PartyAction::Decide {
                    party_id: parties[party].0,
                    leader: parties[party].1,
                    user: users[user],
                    decision: if accept { Decision::Accept } else { Decision::Reject },
                },
                Step::DecideAsStranger { party, user } => PartyAction::Decide {
                    party_id: parties[party].0,
                    leader: users[user],
                    user: users[user],
                    decision: Decision::Accept,
                },
                Step::SelectWinner { party } => PartyAction::SelectWinner {
                    party_id: parties[party].0,
                    owner,
                },
            };

            let before = aggregate.clone();
            let _effects = reducer.reduce(&mut aggregate, action, &env);

            // Rejections leave state untouched unless an application was consumed.
            if aggregate.version == before.version {
                prop_assert!(aggregate.last_error.is_some());
                prop_assert_eq!(&aggregate.parties, &before.parties);
                prop_assert_eq!(&aggregate.room, &before.room);
            }
            check_invariants(&aggregate)?;
        }
    }
}
