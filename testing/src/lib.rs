//! # Roomshare Testing
//!
//! Testing utilities and in-memory backends for the roomshare crates.
//!
//! This crate provides:
//! - [`FixedClock`] for deterministic subscription checks
//! - [`ReducerTest`] for given/when/then reducer tests
//! - In-memory implementations of every persistence trait
//!   ([`InMemoryAccounts`], [`InMemoryRoomStore`]) that honour the same
//!   atomicity contracts as the Postgres backend
//! - [`RecordingNotifier`] to capture party notifications
//!
//! ## Example
//!
//! ```ignore
//! use roomshare_testing::{InMemoryAccounts, InMemoryRoomStore, RecordingNotifier, test_clock};
//!
//! #[tokio::test]
//! async fn party_flow() {
//!     let rooms = Arc::new(InMemoryRoomStore::new());
//!     let notifier = Arc::new(RecordingNotifier::new());
//!     let engine = PartyEngine::new(rooms.clone(), notifier.clone(), Arc::new(test_clock()), config);
//!
//!     let party = engine.create_party(room_id, leader, 2).await?;
//!     engine.apply(party, applicant).await?;
//!
//!     let sent = notifier.wait_for(1).await;
//!     assert_eq!(sent[0].kind, NotificationKind::ApplicationReceived);
//! }
//! ```

pub mod memory;
pub mod notifier;

use chrono::{DateTime, Utc};
use roomshare_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use roomshare_testing::mocks::FixedClock;
    /// use roomshare_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honors `RUST_LOG`; output is captured by the test harness.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use memory::{InMemoryAccounts, InMemoryRoomStore};
pub use mocks::{FixedClock, test_clock};
pub use notifier::RecordingNotifier;
pub use reducer_test::ReducerTest;
