use super::*;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::ManualClock;
use crate::config::AuthorityTimeouts;
use crate::identity::PrivilegeKind;

const T0: i64 = 1_700_000_000_000;

#[derive(Default)]
struct Stub {
    privilege_fails: bool,
    privilege_calls: AtomicUsize,
    refresh_delay_ms: u64,
}

fn session(sub: &str) -> SessionRecord {
    SessionRecord {
        access_token: format!("at-{sub}"),
        refresh_token: format!("rt-{sub}"),
        expires_at: T0 / 1000 + 3_600,
        subject_id: sub.into(),
        subject_contact: format!("{sub}@example.test"),
    }
}

#[async_trait]
impl SessionAuthority for Stub {
    async fn get_current_session(&self) -> Result<Option<SessionRecord>, AuthorityError> {
        Ok(None)
    }
    async fn refresh(&self, _: &str) -> Result<SessionRecord, AuthorityError> {
        tokio::time::sleep(Duration::from_millis(self.refresh_delay_ms)).await;
        Ok(session("u1"))
    }
    async fn sign_in(&self, _: &str, _: &str) -> Result<SessionRecord, AuthorityError> {
        Ok(session("u1"))
    }
    async fn sign_out(&self) -> Result<(), AuthorityError> {
        Ok(())
    }
    async fn fetch_privilege(&self, subject_id: &str) -> Result<Option<PrivilegeRecord>, AuthorityError> {
        self.privilege_calls.fetch_add(1, Ordering::SeqCst);
        if self.privilege_fails {
            return Err(AuthorityError::unavailable("down"));
        }
        Ok(Some(PrivilegeRecord::new(subject_id, PrivilegeKind::Administrator, 0)))
    }
}

fn controller(stub: Arc<Stub>, tweak: impl FnOnce(&mut SessionConfig)) -> (Arc<SessionController>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let mut config = SessionConfig { timeouts: AuthorityTimeouts::uniform(1_000), ..SessionConfig::default() };
    tweak(&mut config);
    let cache = Arc::new(TieredSessionCache::in_memory(&config, clock.clone()));
    (SessionController::new(config, cache, stub, clock.clone()), clock)
}

fn admin(sub: &str, at: i64) -> PrivilegeRecord {
    PrivilegeRecord::new(sub, PrivilegeKind::Administrator, at)
}

#[tokio::test(start_paused = true)]
async fn fresh_privilege_skips_the_remote() {
    let stub = Arc::new(Stub::default());
    let (c, clock) = controller(stub.clone(), |_| {});
    clock.advance_ms(60_000);
    let (p, err) = c.resolve_privilege(&session("u1"), Some(admin("u1", T0)), false).await;
    assert_eq!(p, Some(admin("u1", T0)));
    assert!(err.is_none());
    assert_eq!(stub.privilege_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_privilege_is_refetched_and_stamped() {
    let stub = Arc::new(Stub::default());
    let (c, clock) = controller(stub.clone(), |_| {});
    clock.advance_ms(10 * 60_000);
    let (p, err) = c.resolve_privilege(&session("u1"), Some(admin("u1", T0)), false).await;
    assert_eq!(p.unwrap().fetched_at_ms, T0 + 10 * 60_000);
    assert!(err.is_none());
    assert_eq!(stub.privilege_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_honours_grace_window() {
    let stub = Arc::new(Stub { privilege_fails: true, ..Stub::default() });
    let (c, clock) = controller(stub.clone(), |cfg| cfg.stale_privilege_grace_ms = Some(30 * 60_000));

    clock.advance_ms(20 * 60_000);
    let (p, err) = c.resolve_privilege(&session("u1"), Some(admin("u1", T0)), false).await;
    assert!(p.is_some());
    assert!(err.unwrap().is_transient());

    clock.advance_ms(20 * 60_000);
    let (p, err) = c.resolve_privilege(&session("u1"), Some(admin("u1", T0)), false).await;
    assert!(p.is_none());
    assert!(err.is_some());
}

#[tokio::test(start_paused = true)]
async fn unbounded_grace_and_foreign_hints() {
    let stub = Arc::new(Stub { privilege_fails: true, ..Stub::default() });
    let (c, clock) = controller(stub, |cfg| cfg.stale_privilege_grace_ms = None);
    clock.advance_ms(30 * 24 * 3_600_000);
    let (p, _) = c.resolve_privilege(&session("u1"), Some(admin("u1", T0)), false).await;
    assert!(p.is_some());
    let (p, _) = c.resolve_privilege(&session("u1"), Some(admin("u2", T0)), false).await;
    assert!(p.is_none());
}

#[tokio::test(start_paused = true)]
async fn forced_fetch_ignores_fresh_hint() {
    let stub = Arc::new(Stub::default());
    let (c, _) = controller(stub.clone(), |_| {});
    c.resolve_privilege(&session("u1"), Some(admin("u1", T0)), true).await;
    assert_eq!(stub.privilege_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn sign_out_overtakes_in_flight_refresh() {
    let stub = Arc::new(Stub { refresh_delay_ms: 500, ..Stub::default() });
    let (c, _) = controller(stub, |_| {});
    // only the refresh credential survives
    c.cache().save(&SessionRecord { expires_at: 1, ..session("u1") }, None);

    let bg = {
        let c = c.clone();
        tokio::spawn(async move { c.start().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(c.snapshot().phase, Phase::Recovering);

    let st = c.sign_out().await;
    assert_eq!(st.phase, Phase::SignedOut);
    bg.await.unwrap();

    assert_eq!(c.snapshot().phase, Phase::SignedOut);
    assert!(c.cache().load().is_none());
    assert!(c.cache().recover_refresh_credential().is_none());
}

#[tokio::test(start_paused = true)]
async fn busy_cycle_suppresses_force_refresh() {
    let stub = Arc::new(Stub { refresh_delay_ms: 500, ..Stub::default() });
    let (c, _) = controller(stub, |_| {});
    c.cache().save(&SessionRecord { expires_at: 1, ..session("u1") }, None);

    let bg = {
        let c = c.clone();
        tokio::spawn(async move { c.start().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let during = c.force_refresh().await;
    assert_eq!(during.phase, Phase::Recovering);
    let done = bg.await.unwrap();
    assert_eq!(done.phase, Phase::Authorized);
}
