use serde::{Deserialize, Serialize};

use super::session::SessionRecord;

/// Authorization classification of a subject.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeKind {
    Administrator,
    /// Anything that is not an administrator, including kinds this build does not know.
    #[default]
    #[serde(other)]
    Member,
}

impl PrivilegeKind {
    pub fn is_administrator(self) -> bool {
        matches!(self, PrivilegeKind::Administrator)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrivilegeKind::Administrator => "administrator",
            PrivilegeKind::Member => "member",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivilegeRecord {
    pub subject_id: String,
    pub kind: PrivilegeKind,
    /// When the record was obtained from the remote store, epoch millis.
    #[serde(default)]
    pub fetched_at_ms: i64,
}

impl PrivilegeRecord {
    pub fn new(subject_id: impl Into<String>, kind: PrivilegeKind, fetched_at_ms: i64) -> Self {
        Self { subject_id: subject_id.into(), kind, fetched_at_ms }
    }

    /// Only a record fetched for the session's own subject may back an AuthState.
    pub fn matches(&self, session: &SessionRecord) -> bool {
        self.subject_id == session.subject_id
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at_ms).max(0)
    }
}
