#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sessionward::{
    AuthState, AuthorityError, AuthorityTimeouts, ManualClock, PrivilegeKind, PrivilegeRecord, SessionAuthority,
    SessionConfig, SessionController, SessionRecord, TieredSessionCache,
};

pub const T0: i64 = 1_700_000_000_000;

pub fn session(sub: &str, expires_in_secs: i64) -> SessionRecord {
    SessionRecord {
        access_token: format!("at-{sub}"),
        refresh_token: format!("rt-{sub}"),
        expires_at: T0 / 1000 + expires_in_secs,
        subject_id: sub.into(),
        subject_contact: format!("{sub}@example.test"),
    }
}

pub fn admin(sub: &str, fetched_at_ms: i64) -> PrivilegeRecord {
    PrivilegeRecord::new(sub, PrivilegeKind::Administrator, fetched_at_ms)
}

/// Scripted authority: each operation answers from its slot and may be delayed.
pub struct MockAuthority {
    pub current: Mutex<Result<Option<SessionRecord>, AuthorityError>>,
    pub refreshed: Mutex<Result<SessionRecord, AuthorityError>>,
    pub signed_in: Mutex<Result<SessionRecord, AuthorityError>>,
    pub kinds: Mutex<HashMap<String, PrivilegeKind>>,
    pub privilege_error: Mutex<Option<AuthorityError>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    pub adopted: Mutex<Option<SessionRecord>>,
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self {
            current: Mutex::new(Ok(None)),
            refreshed: Mutex::new(Err(AuthorityError::InvalidRefreshCredential)),
            signed_in: Mutex::new(Err(AuthorityError::InvalidCredentials)),
            kinds: Mutex::new(HashMap::new()),
            privilege_error: Mutex::new(None),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            adopted: Mutex::new(None),
        }
    }
}

impl MockAuthority {
    pub fn grant(&self, sub: &str, kind: PrivilegeKind) {
        self.kinds.lock().insert(sub.to_string(), kind);
    }

    pub fn delay(&self, op: &'static str, ms: u64) {
        self.delays.lock().insert(op, Duration::from_millis(ms));
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, op: &'static str) {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        let delay = self.delays.lock().get(op).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl SessionAuthority for MockAuthority {
    async fn get_current_session(&self) -> Result<Option<SessionRecord>, AuthorityError> {
        self.enter("get_current_session").await;
        self.current.lock().clone()
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<SessionRecord, AuthorityError> {
        self.enter("refresh").await;
        self.refreshed.lock().clone()
    }

    async fn sign_in(&self, _identifier: &str, _secret: &str) -> Result<SessionRecord, AuthorityError> {
        self.enter("sign_in").await;
        self.signed_in.lock().clone()
    }

    async fn sign_out(&self) -> Result<(), AuthorityError> {
        self.enter("sign_out").await;
        Ok(())
    }

    async fn fetch_privilege(&self, subject_id: &str) -> Result<Option<PrivilegeRecord>, AuthorityError> {
        self.enter("fetch_privilege").await;
        if let Some(e) = self.privilege_error.lock().clone() {
            return Err(e);
        }
        Ok(self.kinds.lock().get(subject_id).map(|k| PrivilegeRecord::new(subject_id, *k, 0)))
    }

    fn adopt_session(&self, session: Option<&SessionRecord>) {
        *self.adopted.lock() = session.cloned();
    }
}

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub config: SessionConfig,
    pub cache: Arc<TieredSessionCache>,
    pub authority: Arc<MockAuthority>,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let config = SessionConfig { timeouts: AuthorityTimeouts::uniform(1_000), ..SessionConfig::default() };
        let cache = Arc::new(TieredSessionCache::in_memory(&config, clock.clone()));
        Self { clock, config, cache, authority: Arc::new(MockAuthority::default()) }
    }

    /// A fresh controller over the same cache, as after a reload.
    pub fn controller(&self) -> Arc<SessionController> {
        SessionController::new(self.config.clone(), self.cache.clone(), self.authority.clone(), self.clock.clone())
    }
}

/// The published flag always agrees with the records it is derived from.
pub fn assert_consistent(st: &AuthState) {
    let expected = match (&st.session, &st.privilege) {
        (Some(s), Some(p)) => p.kind.is_administrator() && p.subject_id == s.subject_id,
        _ => false,
    };
    assert_eq!(st.is_authorized(), expected, "inconsistent state: {st:?}");
    if let (Some(s), Some(subject)) = (&st.session, &st.subject) {
        assert_eq!(s.subject_id, subject.id);
    }
}
