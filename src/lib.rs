//! sessionward: client-side session cache and recovery engine.
//!
//! A [`TieredSessionCache`] keeps the last known {session, privilege} pair in three
//! unreliable local stores; a [`SessionController`] reconciles it with a remote
//! [`SessionAuthority`] and publishes one [`AuthState`] through an [`AuthContext`].

pub mod authority;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod reconcile;
pub mod storage;

pub use authority::{AuthorityClient, HttpAuthority, SessionAuthority};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthorityTimeouts, SessionConfig};
pub use error::{AuthorityError, StorageError};
pub use identity::{AuthState, Phase, PrivilegeKind, PrivilegeRecord, SessionRecord, Subject};
pub use reconcile::{AuthContext, SessionController};
pub use storage::{CacheEntry, TierKind, TieredSessionCache};

/// Diagnostic print for test runs and debug builds; the scenario and cache tests
/// dump intermediate states through it.
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

/// Release builds type-check the arguments and print nothing.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
