use std::fmt;

use serde::{Deserialize, Serialize};

use super::privilege::PrivilegeRecord;
use super::session::{SessionRecord, Subject};
use crate::error::AuthorityError;

/// Reconciliation phase of the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Recovering,
    Authorized,
    Unauthorized,
    /// Terminal until the next sign-in.
    SignedOut,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Recovering => "recovering",
            Phase::Authorized => "authorized",
            Phase::Unauthorized => "unauthorized",
            Phase::SignedOut => "signed_out",
        };
        f.write_str(s)
    }
}

/// The single authoritative authentication snapshot published to the application.
///
/// Whether the subject is an authorized administrator is never stored; it is always
/// derived from `session` and `privilege` by [`AuthState::is_authorized`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthState {
    pub phase: Phase,
    pub subject: Option<Subject>,
    pub session: Option<SessionRecord>,
    pub privilege: Option<PrivilegeRecord>,
    pub is_loading: bool,
    pub last_error: Option<AuthorityError>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::initial()
    }
}

impl AuthState {
    pub fn initial() -> Self {
        Self {
            phase: Phase::Uninitialized,
            subject: None,
            session: None,
            privilege: None,
            is_loading: true,
            last_error: None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        match (&self.session, &self.privilege, &self.subject) {
            (Some(s), Some(p), Some(_)) => p.kind.is_administrator() && p.matches(s),
            _ => false,
        }
    }

    /// The last error asks the user to authenticate again.
    pub fn needs_reauthentication(&self) -> bool {
        self.last_error.as_ref().is_some_and(AuthorityError::is_terminal)
    }

    /// The last error is worth a retry affordance.
    pub fn is_retryable(&self) -> bool {
        self.last_error.as_ref().is_some_and(AuthorityError::is_transient)
    }

    /// Settled state for a session and its (optional) privilege. The phase follows
    /// from the derived authorization, so the two cannot disagree.
    pub fn resolved(
        session: SessionRecord,
        privilege: Option<PrivilegeRecord>,
        last_error: Option<AuthorityError>,
    ) -> Self {
        let privilege = privilege.filter(|p| p.matches(&session));
        let mut st = Self {
            phase: Phase::Unauthorized,
            subject: Some(session.subject()),
            session: Some(session),
            privilege,
            is_loading: false,
            last_error,
        };
        if st.is_authorized() {
            st.phase = Phase::Authorized;
        }
        st
    }

    pub fn unauthorized(last_error: Option<AuthorityError>) -> Self {
        Self {
            phase: Phase::Unauthorized,
            subject: None,
            session: None,
            privilege: None,
            is_loading: false,
            last_error,
        }
    }

    pub fn signed_out() -> Self {
        Self { phase: Phase::SignedOut, is_loading: false, ..Self::initial() }
    }

    /// Same identity, marked as being reconciled.
    pub fn recovering(&self) -> Self {
        Self { phase: Phase::Recovering, is_loading: true, ..self.clone() }
    }

    pub fn with_error(mut self, err: Option<AuthorityError>) -> Self {
        self.last_error = err;
        self
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject.as_ref().map(|s| s.id.as_str())
    }
}
