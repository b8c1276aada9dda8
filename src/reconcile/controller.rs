use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::context::AuthContext;
use crate::authority::{AuthorityClient, SessionAuthority};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::AuthorityError;
use crate::identity::{AuthState, Phase, PrivilegeRecord, SessionRecord};
use crate::storage::{CachedSession, TieredSessionCache};

/// Captured at the start of a cycle. A result is only published while the epoch is
/// unchanged and only cached while the cache generation is unchanged.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    epoch: u64,
    cache_generation: u64,
}

/// Owns the authentication state and drives it from cache and remote authority.
///
/// Only one reconciliation cycle runs at a time. Startup, refocus and forced refresh
/// are dropped while a cycle is in flight; sign-in waits for it; sign-out never
/// waits and invalidates whatever is still in flight.
pub struct SessionController {
    config: SessionConfig,
    cache: Arc<TieredSessionCache>,
    authority: AuthorityClient,
    clock: Arc<dyn Clock>,
    state: watch::Sender<AuthState>,
    cycle: Arc<Mutex<()>>,
    epoch: AtomicU64,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        cache: Arc<TieredSessionCache>,
        authority: Arc<dyn SessionAuthority>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let authority = AuthorityClient::new(authority, config.timeouts.clone(), clock.clone());
        let (state, _) = watch::channel(AuthState::initial());
        Arc::new(Self { config, cache, authority, clock, state, cycle: Arc::new(Mutex::new(())), epoch: AtomicU64::new(0) })
    }

    pub fn context(&self) -> AuthContext {
        AuthContext::new(self.state.subscribe())
    }

    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn cache(&self) -> &Arc<TieredSessionCache> {
        &self.cache
    }

    /// Resolves once no reconciliation cycle is in flight, background confirmation included.
    pub async fn idle(&self) {
        let _guard = self.cycle.lock().await;
    }

    fn ticket(&self) -> Ticket {
        Ticket { epoch: self.epoch.load(Ordering::SeqCst), cache_generation: self.cache.generation() }
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.epoch.load(Ordering::SeqCst) == ticket.epoch
    }

    fn publish(&self, state: AuthState) -> AuthState {
        info!(
            target: "sessionward::reconcile",
            phase = %state.phase,
            subject = state.subject_id().unwrap_or("-"),
            authorized = state.is_authorized(),
            error = state.last_error.as_ref().map_or("-", AuthorityError::code_str),
            "state published"
        );
        self.state.send_replace(state.clone());
        state
    }

    fn publish_if(&self, ticket: &Ticket, state: AuthState) -> AuthState {
        if !self.is_current(ticket) {
            debug!(target: "sessionward::reconcile", phase = %state.phase, "discarding result of a cycle overtaken by sign-out");
            return self.snapshot();
        }
        self.publish(state)
    }

    fn try_begin(&self, op: &'static str) -> Option<OwnedMutexGuard<()>> {
        match self.cycle.clone().try_lock_owned() {
            Ok(guard) => Some(guard),
            Err(_) => {
                debug!(target: "sessionward::reconcile", op, "reconciliation already in flight; suppressed");
                None
            }
        }
    }

    fn is_signed_out(&self) -> bool {
        self.state.borrow().phase == Phase::SignedOut
    }

    /// Restore from cache, then confirm with the remote.
    ///
    /// A cached session with a matching privilege is published at once and confirmed
    /// on a background task; anything less goes through refresh or a single
    /// current-session lookup before a state is published.
    pub async fn start(self: &Arc<Self>) -> AuthState {
        let Some(guard) = self.try_begin("start") else { return self.snapshot() };
        if self.is_signed_out() {
            return self.snapshot();
        }
        let ticket = self.ticket();
        self.publish_if(&ticket, self.snapshot().recovering());

        let cached = self.cache.load_with_origin();
        if let Some((entry, tier)) = &cached {
            if let Some(session) = entry.session.session_record() {
                let privilege = entry.session.privilege_record().filter(|p| p.matches(&session));
                if let Some(privilege) = privilege {
                    info!(target: "sessionward::reconcile", tier = tier.as_str(), subject = %session.subject_id, "restored from cache");
                    self.authority.adopt_session(Some(&session));
                    let state = self.publish_if(&ticket, AuthState::resolved(session.clone(), Some(privilege), None));
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let _guard = guard;
                        this.confirm(ticket, session).await;
                    });
                    return state;
                }
                debug!(target: "sessionward::reconcile", subject = %session.subject_id, "cached session without a usable privilege");
                let state = self.settle(&ticket, session, None, false).await;
                return self.publish_if(&ticket, state);
            }
            debug!(target: "sessionward::reconcile", tier = tier.as_str(), "cached entry carries no credential");
        }

        let stale = self.cache.recover_stale();
        let refresh_token = stale.as_ref().and_then(CachedSession::refresh_token).map(str::to_string);
        let hint = cached
            .as_ref()
            .and_then(|(e, _)| e.session.privilege_record())
            .or_else(|| stale.as_ref().and_then(CachedSession::privilege_record));
        let state = self.recover(&ticket, refresh_token, hint).await;
        drop(guard);
        self.publish_if(&ticket, state)
    }

    /// Re-check the session when the application becomes visible again.
    pub async fn on_visibility_regained(&self) -> AuthState {
        if self.snapshot().phase != Phase::Authorized {
            return self.snapshot();
        }
        let Some(_guard) = self.try_begin("visibility_regained") else { return self.snapshot() };
        let ticket = self.ticket();
        let Some(session) = self.snapshot().session else { return self.snapshot() };
        self.confirm(ticket, session).await;
        self.snapshot()
    }

    /// Ask the remote for the current session and re-fetch the privilege whatever its age.
    pub async fn force_refresh(&self) -> AuthState {
        let Some(_guard) = self.try_begin("force_refresh") else { return self.snapshot() };
        if self.is_signed_out() {
            return self.snapshot();
        }
        let ticket = self.ticket();
        let current = self.snapshot();
        self.publish_if(&ticket, current.recovering());

        let known = current.session.clone().or_else(|| self.cache.load().and_then(|e| e.session.session_record()));
        let state = match self.authority.get_current_session().await {
            Ok(Some(remote)) => {
                let hint = current.privilege.clone().filter(|p| p.matches(&remote));
                self.settle(&ticket, remote, hint, true).await
            }
            Ok(None) => {
                let refresh_token = known
                    .as_ref()
                    .map(|s| s.refresh_token.clone())
                    .or_else(|| self.cache.recover_refresh_credential());
                self.recover(&ticket, refresh_token, current.privilege.clone()).await
            }
            Err(e) => match known.filter(|s| !s.is_expired_at(self.clock.now_secs())) {
                Some(session) => AuthState::resolved(session, current.privilege.clone(), Some(e)),
                None => AuthState::unauthorized(Some(e)),
            },
        };
        self.publish_if(&ticket, state)
    }

    /// Explicit sign-in. Waits for an in-flight cycle; a rejected attempt leaves the
    /// cache as it was.
    pub async fn sign_in(&self, identifier: &str, secret: &str) -> AuthState {
        let _guard = self.cycle.clone().lock_owned().await;
        let ticket = self.ticket();
        self.publish_if(&ticket, self.snapshot().recovering());

        let state = match self.authority.sign_in(identifier, secret).await {
            Ok(session) => {
                info!(target: "sessionward::reconcile", subject = %session.subject_id, "signed in");
                if self.is_current(&ticket) {
                    self.cache.save_if_current(ticket.cache_generation, &session, None);
                }
                self.settle(&ticket, session, None, true).await
            }
            Err(e) => {
                warn!(target: "sessionward::reconcile", code = e.code_str(), "sign-in failed: {}", e);
                AuthState::unauthorized(Some(e))
            }
        };
        self.publish_if(&ticket, state)
    }

    /// Local sign-out is immediate and final; the remote is told afterwards and its
    /// answer only logged.
    pub async fn sign_out(&self) -> AuthState {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
        let state = self.publish(AuthState::signed_out());
        if let Err(e) = self.authority.sign_out().await {
            warn!(target: "sessionward::reconcile", code = e.code_str(), "remote sign-out failed: {}", e);
        }
        self.authority.adopt_session(None);
        state
    }

    /// Compare the remote's view with `session` and reconcile any difference.
    async fn confirm(&self, ticket: Ticket, session: SessionRecord) {
        match self.authority.get_current_session().await {
            Ok(Some(remote)) if remote.same_subject(&session) => {
                let privilege = self.snapshot().privilege;
                let fresh = privilege.as_ref().is_some_and(|p| self.is_fresh(p));
                if remote == session && fresh {
                    debug!(target: "sessionward::reconcile", subject = %session.subject_id, "session confirmed");
                    return;
                }
                let state = self.settle(&ticket, remote, privilege, false).await;
                self.publish_if(&ticket, state);
            }
            Ok(Some(remote)) => {
                warn!(target: "sessionward::reconcile", cached = %session.subject_id, remote = %remote.subject_id, "remote reports another subject");
                self.publish_if(&ticket, self.snapshot().recovering());
                let state = self.settle(&ticket, remote, None, true).await;
                self.publish_if(&ticket, state);
            }
            Ok(None) => {
                info!(target: "sessionward::reconcile", subject = %session.subject_id, "remote no longer knows the session");
                let hint = self.snapshot().privilege;
                self.publish_if(&ticket, self.snapshot().recovering());
                let state = self.recover(&ticket, Some(session.refresh_token.clone()), hint).await;
                self.publish_if(&ticket, state);
            }
            Err(e) => {
                warn!(target: "sessionward::reconcile", code = e.code_str(), "could not confirm session: {}", e);
                self.publish_if(&ticket, self.snapshot().with_error(Some(e)));
            }
        }
    }

    /// Slow path: refresh when a credential is known, else one current-session lookup.
    async fn recover(&self, ticket: &Ticket, refresh_token: Option<String>, hint: Option<PrivilegeRecord>) -> AuthState {
        if let Some(token) = refresh_token.filter(|t| !t.is_empty()) {
            return match self.authority.refresh(&token).await {
                Ok(session) => {
                    info!(target: "sessionward::reconcile", subject = %session.subject_id, "session refreshed");
                    let hint = hint.filter(|p| p.matches(&session));
                    self.settle(ticket, session, hint, false).await
                }
                Err(e @ AuthorityError::InvalidRefreshCredential) => {
                    warn!(target: "sessionward::reconcile", "refresh credential rejected; clearing cache");
                    if self.is_current(ticket) {
                        self.cache.clear();
                        self.authority.adopt_session(None);
                    }
                    AuthState::unauthorized(Some(e))
                }
                Err(e) => AuthState::unauthorized(Some(e)),
            };
        }
        match self.authority.get_current_session().await {
            Ok(Some(session)) => {
                let hint = hint.filter(|p| p.matches(&session));
                self.settle(ticket, session, hint, false).await
            }
            Ok(None) => AuthState::unauthorized(None),
            Err(e) => AuthState::unauthorized(Some(e)),
        }
    }

    /// Resolve the privilege for a session the remote vouched for and write both through.
    async fn settle(&self, ticket: &Ticket, session: SessionRecord, hint: Option<PrivilegeRecord>, force_fetch: bool) -> AuthState {
        if self.is_current(ticket) {
            self.authority.adopt_session(Some(&session));
        }
        let (privilege, err) = self.resolve_privilege(&session, hint, force_fetch).await;
        if self.is_current(ticket) {
            self.cache.save_if_current(ticket.cache_generation, &session, privilege.as_ref());
        }
        AuthState::resolved(session, privilege, err)
    }

    async fn resolve_privilege(
        &self,
        session: &SessionRecord,
        hint: Option<PrivilegeRecord>,
        force_fetch: bool,
    ) -> (Option<PrivilegeRecord>, Option<AuthorityError>) {
        let hint = hint.filter(|p| p.matches(session));
        if !force_fetch {
            if let Some(p) = hint.as_ref().filter(|p| self.is_fresh(p)) {
                return (Some(p.clone()), None);
            }
        }
        match self.authority.fetch_privilege(&session.subject_id).await {
            Ok(found) => (found, None),
            Err(e) => match hint.filter(|p| self.within_grace(p)) {
                Some(p) => {
                    warn!(
                        target: "sessionward::reconcile",
                        subject = %session.subject_id,
                        age_ms = p.age_ms(self.clock.now_ms()),
                        "privilege fetch failed; using cached record"
                    );
                    (Some(p), Some(e))
                }
                None => (None, Some(e)),
            },
        }
    }

    fn is_fresh(&self, p: &PrivilegeRecord) -> bool {
        let age = p.age_ms(self.clock.now_ms());
        u64::try_from(age).is_ok_and(|a| a < self.config.privilege_fresh_ms)
    }

    fn within_grace(&self, p: &PrivilegeRecord) -> bool {
        match self.config.stale_privilege_grace_ms {
            None => true,
            Some(grace) => u64::try_from(p.age_ms(self.clock.now_ms())).map_or(true, |a| a <= grace),
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
