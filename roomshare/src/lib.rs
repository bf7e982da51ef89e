//! # Roomshare
//!
//! Entitlement gating and party matching for a shared-room rental marketplace.
//!
//! - [`entitlement`] decides a viewer's [`Tier`](roomshare_core::types::Tier)
//!   for a room and meters free views
//! - [`projector`] shapes the room view each tier may see
//! - [`viewing`] combines both into a room detail fetch with view counting
//! - [`party`] runs the party lifecycle: create, apply, decide, select winner
//! - [`billing`] lets the payment collaborator flip paid status
//!
//! Persistence and notification delivery are injected as trait objects from
//! `roomshare-core`; [`bootstrap`] wires the configured backend.
//!
//! ## Example
//!
//! ```ignore
//! let config = Config::from_env();
//! let backend = Backend::connect(&config).await?;
//! let services = Services::build(&config, &backend, Arc::new(SystemClock));
//!
//! let party = services.parties.create_party(room_id, leader, 2).await?;
//! services.parties.apply(party, applicant).await?;
//! services.parties.decide(party, leader, applicant, Decision::Accept).await?;
//! services.parties.select_winner(party, owner).await?;
//! ```

pub mod billing;
pub mod bootstrap;
pub mod config;
pub mod entitlement;
pub mod party;
pub mod projector;
pub mod viewing;

pub use billing::Subscriptions;
pub use bootstrap::{Backend, Services};
pub use config::Config;
pub use entitlement::EntitlementGate;
pub use party::PartyEngine;
pub use projector::{PartyVisibility, RoomView};
pub use viewing::{RoomDetail, RoomViewer};
