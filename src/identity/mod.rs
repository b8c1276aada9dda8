//! Identity types the engine caches and publishes: the remote-issued session,
//! the subject's privilege classification and the derived authentication state.

mod privilege;
mod session;
mod state;

pub use privilege::{PrivilegeKind, PrivilegeRecord};
pub use session::{SessionRecord, Subject};
pub use state::{AuthState, Phase};
