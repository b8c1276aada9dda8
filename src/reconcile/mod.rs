//! Session reconciliation: the state machine that turns cached and remote views of
//! the session into the single published [`AuthState`](crate::identity::AuthState).

mod context;
mod controller;

pub use context::AuthContext;
pub use controller::SessionController;
