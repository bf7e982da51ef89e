//! # Roomshare Core
//!
//! Domain types, reducer abstractions and persistence contracts shared by the
//! roomshare crates.
//!
//! The two stateful subsystems of the marketplace are built on these pieces:
//!
//! - **Entitlement gating** reads [`types::Account`] records through
//!   [`store::AccountDirectory`] and meters free views through
//!   [`store::QuotaLedger`].
//! - **Party matching** is a [`reducer::Reducer`] over a per-room
//!   [`store::RoomAggregate`], loaded and committed through a
//!   [`store::RoomTransaction`] so that every command on one room is serialized.
//!
//! ## Core Concepts
//!
//! - **State**: the aggregate a command operates on (one room and its parties)
//! - **Action**: commands and the events they produce
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: side effect descriptions (notifications), executed after commit
//! - **Environment**: injected dependencies ([`environment::Clock`], [`notify::Notifier`])
//!
//! ## Example
//!
//! ```ignore
//! use roomshare_core::reducer::Reducer;
//!
//! impl Reducer for PartyReducer {
//!     type State = RoomAggregate;
//!     type Action = PartyAction;
//!     type Environment = PartyEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut RoomAggregate,
//!         action: PartyAction,
//!         env: &PartyEnvironment,
//!     ) -> SmallVec<[Effect<PartyAction>; 4]> {
//!         // Validate, apply events, describe notifications
//!         SmallVec::new()
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod notify;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ErrorKind, MarketError, Result, StoreError};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed once the state they were
/// produced alongside has been committed. They are values, not execution.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the caller after the state change is durable.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back to the caller
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Number of leaf effects that actually do something.
        #[must_use]
        pub fn leaf_count(&self) -> usize {
            match self {
                Effect::None => 0,
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().map(Effect::leaf_count).sum()
                },
                Effect::Future(_) => 1,
            }
        }
    }

    impl<Action: Send + 'static> Effect<Action> {
        /// Drive the effect to completion, collecting any feedback actions.
        ///
        /// `Parallel` children are joined concurrently, `Sequential` children
        /// run in order.
        pub fn run(self) -> Pin<Box<dyn Future<Output = Vec<Action>> + Send>> {
            Box::pin(async move {
                match self {
                    Effect::None => Vec::new(),
                    Effect::Future(fut) => fut.await.into_iter().collect(),
                    Effect::Parallel(effects) => {
                        futures::future::join_all(effects.into_iter().map(Effect::run))
                            .await
                            .into_iter()
                            .flatten()
                            .collect()
                    },
                    Effect::Sequential(effects) => {
                        let mut actions = Vec::new();
                        for effect in effects {
                            actions.extend(effect.run().await);
                        }
                        actions
                    },
                }
            })
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Paid-status checks compare `paid_until` against this clock, so tests can
    /// pin "now" with a fixed implementation.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
