//! Boundary to the remote identity/authorization service.
//!
//! [`SessionAuthority`] is the narrow contract the engine consumes; the
//! [`AuthorityClient`] wraps any implementation with per-operation deadlines and
//! record validation. [`HttpAuthority`] speaks the contract over HTTP.

use async_trait::async_trait;

use crate::error::AuthorityError;
use crate::identity::{PrivilegeRecord, SessionRecord};

pub mod client;
pub mod http;

pub use client::AuthorityClient;
pub use http::HttpAuthority;

#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Session the remote currently associates with this client, if any.
    async fn get_current_session(&self) -> Result<Option<SessionRecord>, AuthorityError>;

    /// Exchange a refresh credential for a new session.
    async fn refresh(&self, refresh_token: &str) -> Result<SessionRecord, AuthorityError>;

    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<SessionRecord, AuthorityError>;

    async fn sign_out(&self) -> Result<(), AuthorityError>;

    /// Privilege record stored remotely for `subject_id`.
    async fn fetch_privilege(&self, subject_id: &str) -> Result<Option<PrivilegeRecord>, AuthorityError>;

    /// Tell the transport which session to present, e.g. after a restore from cache.
    fn adopt_session(&self, _session: Option<&SessionRecord>) {}
}
