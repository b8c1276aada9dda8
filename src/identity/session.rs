use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity a session was issued for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub contact: String,
}

/// Proof of identity issued by the remote authority.
///
/// A record missing any field is never trusted; see [`SessionRecord::is_complete`].
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry in epoch seconds.
    pub expires_at: i64,
    pub subject_id: String,
    pub subject_contact: String,
}

impl SessionRecord {
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && !self.subject_id.is_empty()
            && !self.subject_contact.is_empty()
            && self.expires_at > 0
    }

    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        now_secs >= self.expires_at
    }

    pub fn subject(&self) -> Subject {
        Subject { id: self.subject_id.clone(), contact: self.subject_contact.clone() }
    }

    pub fn same_subject(&self, other: &SessionRecord) -> bool {
        self.subject_id == other.subject_id
    }
}

// Tokens stay out of logs.
impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("subject_id", &self.subject_id)
            .field("subject_contact", &self.subject_contact)
            .finish()
    }
}
