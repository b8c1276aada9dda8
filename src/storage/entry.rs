use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{PrivilegeKind, PrivilegeRecord, SessionRecord};

/// Layout version of persisted entries. Bump on any field change: older or newer
/// entries then read as a miss instead of deserializing into the wrong shape.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// Snapshot of {session, privilege} as written to a tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedSession {
    pub subject_id: String,
    pub subject_contact: String,
    /// Session expiry, epoch seconds.
    pub session_expires_at: i64,
    pub privilege_kind: Option<PrivilegeKind>,
    pub privilege_fetched_at_ms: Option<i64>,
    pub has_credential: bool,
    /// Absent in the small store projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl CachedSession {
    pub fn from_records(session: &SessionRecord, privilege: Option<&PrivilegeRecord>) -> Self {
        let privilege = privilege.filter(|p| p.matches(session));
        Self {
            subject_id: session.subject_id.clone(),
            subject_contact: session.subject_contact.clone(),
            session_expires_at: session.expires_at,
            privilege_kind: privilege.map(|p| p.kind),
            privilege_fetched_at_ms: privilege.map(|p| p.fetched_at_ms),
            has_credential: true,
            credentials: Some(Credentials {
                access_token: session.access_token.clone(),
                refresh_token: session.refresh_token.clone(),
            }),
        }
    }

    /// Projection without credentials, safe for the small store.
    pub fn minimized(&self) -> Self {
        Self { credentials: None, ..self.clone() }
    }

    /// Full session record, or `None` when any part is missing.
    pub fn session_record(&self) -> Option<SessionRecord> {
        let c = self.credentials.as_ref()?;
        let rec = SessionRecord {
            access_token: c.access_token.clone(),
            refresh_token: c.refresh_token.clone(),
            expires_at: self.session_expires_at,
            subject_id: self.subject_id.clone(),
            subject_contact: self.subject_contact.clone(),
        };
        rec.is_complete().then_some(rec)
    }

    pub fn privilege_record(&self) -> Option<PrivilegeRecord> {
        let kind = self.privilege_kind?;
        Some(PrivilegeRecord::new(self.subject_id.clone(), kind, self.privilege_fetched_at_ms.unwrap_or(0)))
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.refresh_token.as_str()).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub schema_version: u32,
    pub written_at_ms: i64,
    pub cache_expires_at_ms: i64,
    /// Second, longer bound carried by entries that hold a session.
    #[serde(default)]
    pub session_expires_at_ms: Option<i64>,
    pub session: CachedSession,
}

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

impl CacheEntry {
    pub fn new(session: CachedSession, written_at_ms: i64, cache_expires_at_ms: i64) -> Self {
        let session_expires_at_ms = Some(session.session_expires_at.saturating_mul(1000));
        Self { schema_version: SCHEMA_VERSION, written_at_ms, cache_expires_at_ms, session_expires_at_ms, session }
    }

    pub fn is_current_version(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }

    /// Usable means current version, cache-expiry not reached and session-expiry
    /// (when present) not reached. Anything else is stale as a whole.
    pub fn is_usable_at(&self, now_ms: i64) -> bool {
        self.is_current_version()
            && now_ms < self.cache_expires_at_ms
            && self.session_expires_at_ms.map_or(true, |s| now_ms < s)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a stored entry. Unparseable text and foreign schema versions are `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        let probe: VersionProbe = serde_json::from_str(raw).ok()?;
        if probe.schema_version != SCHEMA_VERSION {
            return None;
        }
        serde_json::from_str(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionRecord {
        SessionRecord {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: 5_000,
            subject_id: "u1".into(),
            subject_contact: "u1@example.test".into(),
        }
    }

    #[test]
    fn usable_window() {
        let e = CacheEntry::new(CachedSession::from_records(&session(), None), 1_000, 2_000_000);
        assert_eq!(e.session_expires_at_ms, Some(5_000_000));
        assert!(e.is_usable_at(1_999_999));
        assert!(!e.is_usable_at(2_000_000));

        let long = CacheEntry::new(CachedSession::from_records(&session(), None), 1_000, 9_000_000);
        assert!(!long.is_usable_at(5_000_000));
    }

    #[test]
    fn foreign_versions_fail_closed() {
        let mut e = CacheEntry::new(CachedSession::from_records(&session(), None), 0, 10);
        e.schema_version = SCHEMA_VERSION + 1;
        let raw = e.encode().unwrap();
        assert!(CacheEntry::decode(&raw).is_none());
        assert!(CacheEntry::decode(r#"{"schema_version":1,"surprise":true}"#).is_none());
        assert!(CacheEntry::decode("][").is_none());
    }

    #[test]
    fn minimized_projection_has_no_credentials() {
        let p = PrivilegeRecord::new("u1", PrivilegeKind::Administrator, 42);
        let full = CachedSession::from_records(&session(), Some(&p));
        let min = full.minimized();
        assert!(min.credentials.is_none());
        assert!(min.has_credential);
        assert!(min.session_record().is_none());
        assert_eq!(min.privilege_record(), Some(p));
        let raw = serde_json::to_string(&min).unwrap();
        assert!(!raw.contains("\"rt\""));
        assert!(!raw.contains("credentials"));
    }

    #[test]
    fn foreign_privilege_is_not_cached() {
        let p = PrivilegeRecord::new("u2", PrivilegeKind::Administrator, 1);
        let c = CachedSession::from_records(&session(), Some(&p));
        assert_eq!(c.privilege_kind, None);
        assert_eq!(c.session_record(), Some(session()));
    }
}
