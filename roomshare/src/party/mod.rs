//! Party matching: lifecycle of co-tenant groups competing for one room.

pub mod engine;
pub mod reducer;

pub use engine::PartyEngine;
pub use reducer::{PartyAction, PartyEnvironment, PartyReducer, RejectionReason};
