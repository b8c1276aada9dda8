use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::SessionAuthority;
use crate::clock::Clock;
use crate::config::AuthorityTimeouts;
use crate::error::AuthorityError;
use crate::identity::{PrivilegeRecord, SessionRecord};

/// Deadline-bounded view of a [`SessionAuthority`].
///
/// A call that does not resolve within its configured deadline fails with
/// `AuthorityError::Timeout` instead of hanging the controller. Partial session
/// records coming back from the remote are never passed on.
#[derive(Clone)]
pub struct AuthorityClient {
    inner: Arc<dyn SessionAuthority>,
    timeouts: AuthorityTimeouts,
    clock: Arc<dyn Clock>,
}

impl AuthorityClient {
    pub fn new(inner: Arc<dyn SessionAuthority>, timeouts: AuthorityTimeouts, clock: Arc<dyn Clock>) -> Self {
        Self { inner, timeouts, clock }
    }

    async fn bounded<T, F>(&self, op: &'static str, ms: u64, fut: F) -> Result<T, AuthorityError>
    where
        F: Future<Output = Result<T, AuthorityError>>,
    {
        match tokio::time::timeout(Duration::from_millis(ms), fut).await {
            Ok(res) => {
                if let Err(e) = &res {
                    debug!(target: "sessionward::authority", op, code = e.code_str(), "remote call failed: {}", e);
                }
                res
            }
            Err(_) => {
                warn!(target: "sessionward::authority", op, after_ms = ms, "remote call timed out");
                Err(AuthorityError::timeout(op, ms))
            }
        }
    }

    fn complete(op: &'static str, session: SessionRecord) -> Result<SessionRecord, AuthorityError> {
        if session.is_complete() {
            Ok(session)
        } else {
            warn!(target: "sessionward::authority", op, "remote returned an incomplete session record");
            Err(AuthorityError::unavailable(format!("{op}: incomplete session record")))
        }
    }

    pub async fn get_current_session(&self) -> Result<Option<SessionRecord>, AuthorityError> {
        let found = self
            .bounded("get_current_session", self.timeouts.get_session_ms, self.inner.get_current_session())
            .await?;
        Ok(found.and_then(|s| Self::complete("get_current_session", s).ok()))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionRecord, AuthorityError> {
        let s = self.bounded("refresh", self.timeouts.refresh_ms, self.inner.refresh(refresh_token)).await?;
        Self::complete("refresh", s)
    }

    pub async fn sign_in(&self, identifier: &str, secret: &str) -> Result<SessionRecord, AuthorityError> {
        let s = self.bounded("sign_in", self.timeouts.sign_in_ms, self.inner.sign_in(identifier, secret)).await?;
        Self::complete("sign_in", s)
    }

    pub async fn sign_out(&self) -> Result<(), AuthorityError> {
        self.bounded("sign_out", self.timeouts.sign_out_ms, self.inner.sign_out()).await
    }

    /// The returned record is stamped with the local fetch time. A record for another
    /// subject is reported as a transient failure rather than trusted.
    pub async fn fetch_privilege(&self, subject_id: &str) -> Result<Option<PrivilegeRecord>, AuthorityError> {
        let found = self
            .bounded("fetch_privilege", self.timeouts.fetch_privilege_ms, self.inner.fetch_privilege(subject_id))
            .await?;
        match found {
            Some(p) if p.subject_id != subject_id => {
                warn!(target: "sessionward::authority", requested = subject_id, got = %p.subject_id, "privilege record for wrong subject");
                Err(AuthorityError::unavailable("privilege record subject mismatch"))
            }
            Some(mut p) => {
                p.fetched_at_ms = self.clock.now_ms();
                Ok(Some(p))
            }
            None => Ok(None),
        }
    }

    pub fn adopt_session(&self, session: Option<&SessionRecord>) {
        self.inner.adopt_session(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::PrivilegeKind;
    use async_trait::async_trait;

    struct Slow {
        delay: Duration,
        partial: bool,
    }

    fn rec(partial: bool) -> SessionRecord {
        SessionRecord {
            access_token: if partial { String::new() } else { "at".into() },
            refresh_token: "rt".into(),
            expires_at: 99,
            subject_id: "u1".into(),
            subject_contact: "u1@example.test".into(),
        }
    }

    #[async_trait]
    impl SessionAuthority for Slow {
        async fn get_current_session(&self) -> Result<Option<SessionRecord>, AuthorityError> {
            tokio::time::sleep(self.delay).await;
            Ok(Some(rec(self.partial)))
        }
        async fn refresh(&self, _: &str) -> Result<SessionRecord, AuthorityError> {
            tokio::time::sleep(self.delay).await;
            Ok(rec(self.partial))
        }
        async fn sign_in(&self, _: &str, _: &str) -> Result<SessionRecord, AuthorityError> {
            Err(AuthorityError::InvalidCredentials)
        }
        async fn sign_out(&self) -> Result<(), AuthorityError> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn fetch_privilege(&self, subject_id: &str) -> Result<Option<PrivilegeRecord>, AuthorityError> {
            let who = if subject_id == "u1" { "u1" } else { "someone-else" };
            Ok(Some(PrivilegeRecord::new(who, PrivilegeKind::Administrator, 0)))
        }
    }

    fn client(delay_ms: u64, partial: bool) -> AuthorityClient {
        AuthorityClient::new(
            Arc::new(Slow { delay: Duration::from_millis(delay_ms), partial }),
            AuthorityTimeouts::uniform(100),
            Arc::new(ManualClock::new(7_000)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_become_timeouts() {
        let c = client(500, false);
        assert_eq!(c.get_current_session().await, Err(AuthorityError::timeout("get_current_session", 100)));
        assert_eq!(c.sign_out().await, Err(AuthorityError::timeout("sign_out", 100)));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_calls_pass_through() {
        let c = client(10, false);
        assert_eq!(c.get_current_session().await.unwrap().unwrap().subject_id, "u1");
        assert_eq!(c.sign_in("a", "b").await, Err(AuthorityError::InvalidCredentials));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_records_are_rejected() {
        let c = client(10, true);
        assert_eq!(c.get_current_session().await, Ok(None));
        assert!(matches!(c.refresh("rt").await, Err(AuthorityError::RemoteUnavailable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn privilege_is_stamped_and_subject_checked() {
        let c = client(0, false);
        let p = c.fetch_privilege("u1").await.unwrap().unwrap();
        assert_eq!(p.fetched_at_ms, 7_000);
        assert!(matches!(c.fetch_privilege("u2").await, Err(AuthorityError::RemoteUnavailable { .. })));
    }
}
