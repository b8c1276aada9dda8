//! Tiered session cache.
//!
//! The cache is the union of four slots read with fixed precedence:
//! tab-scoped, origin-persistent, small store, then the backup slot inside the
//! persistent store. Writes go persistent, tab, small, backup; each one may fail
//! on its own without stopping the rest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::adapters::{PersistentStore, SmallStore, TabStore};
use super::backend::{KvBackend, MemoryBackend};
use super::entry::{CacheEntry, CachedSession};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::identity::{PrivilegeRecord, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Tab,
    Persistent,
    Small,
    Backup,
}

impl TierKind {
    /// Read order of `load`.
    pub const PRIORITY: [TierKind; 4] = [TierKind::Tab, TierKind::Persistent, TierKind::Small, TierKind::Backup];

    pub fn as_str(self) -> &'static str {
        match self {
            TierKind::Tab => "tab",
            TierKind::Persistent => "persistent",
            TierKind::Small => "small",
            TierKind::Backup => "backup",
        }
    }
}

struct Keys {
    session: String,
    backup: String,
    hint: String,
}

pub struct TieredSessionCache {
    tab: TabStore,
    persistent: PersistentStore,
    small: SmallStore,
    clock: Arc<dyn Clock>,
    keys: Keys,
    tab_ttl_ms: i64,
    small_ttl_ms: i64,
    backup_max_age_ms: i64,
    /// Bumped by every `clear`; a save carrying an older value is dropped.
    generation: AtomicU64,
    /// Serialises saves, promotions and clears.
    write_lock: Mutex<()>,
}

fn ms(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

impl TieredSessionCache {
    pub fn new(
        config: &SessionConfig,
        tab: Arc<dyn KvBackend>,
        persistent: Arc<dyn KvBackend>,
        small: Arc<dyn KvBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tab: TabStore::new(tab),
            persistent: PersistentStore::new(persistent),
            small: SmallStore::new(small, clock.clone()),
            clock,
            keys: Keys { session: config.session_key(), backup: config.backup_key(), hint: config.hint_key() },
            tab_ttl_ms: ms(config.tab_ttl_ms),
            small_ttl_ms: ms(config.small_store_ttl_secs.saturating_mul(1000)),
            backup_max_age_ms: ms(config.backup_max_age_ms),
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// All tiers in memory; the small tier gets the configured byte quota.
    pub fn in_memory(config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config,
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::with_quota(config.small_store_max_bytes)),
            clock,
        )
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Write-through at the current generation.
    pub fn save(&self, session: &SessionRecord, privilege: Option<&PrivilegeRecord>) -> bool {
        self.save_if_current(self.generation(), session, privilege)
    }

    /// Write {session, privilege} to every tier unless a `clear` happened after
    /// `generation` was observed. Returns false when the save was refused.
    pub fn save_if_current(&self, generation: u64, session: &SessionRecord, privilege: Option<&PrivilegeRecord>) -> bool {
        if !session.is_complete() {
            warn!(target: "sessionward::cache", "refusing to cache an incomplete session record");
            return false;
        }
        let _guard = self.write_lock.lock();
        if self.generation() != generation {
            debug!(target: "sessionward::cache", generation, current = self.generation(), "dropping save issued before clear");
            return false;
        }
        let now = self.clock.now_ms();
        let cached = CachedSession::from_records(session, privilege);
        let session_exp_ms = session.expires_at.saturating_mul(1000);

        let primary = CacheEntry::new(cached.clone(), now, session_exp_ms);
        let tab = CacheEntry::new(cached.clone(), now, now.saturating_add(self.tab_ttl_ms).min(session_exp_ms));
        let small = CacheEntry::new(cached.minimized(), now, now.saturating_add(self.small_ttl_ms).min(session_exp_ms));
        let backup = CacheEntry::new(cached, now, now.saturating_add(self.backup_max_age_ms));

        let mut landed = 0usize;
        landed += usize::from(self.write_tier(TierKind::Persistent, &primary));
        landed += usize::from(self.write_tier(TierKind::Tab, &tab));
        landed += usize::from(self.write_tier(TierKind::Small, &small));
        landed += usize::from(self.write_tier(TierKind::Backup, &backup));
        debug!(target: "sessionward::cache", subject = %session.subject_id, landed, "session cached");
        true
    }

    fn write_tier(&self, tier: TierKind, entry: &CacheEntry) -> bool {
        let raw = match entry.encode() {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "sessionward::cache", tier = tier.as_str(), "encode failed: {}", e);
                return false;
            }
        };
        match tier {
            TierKind::Tab => self.tab.set(&self.keys.session, &raw),
            TierKind::Persistent => self.persistent.set(&self.keys.session, &raw),
            TierKind::Backup => self.persistent.set(&self.keys.backup, &raw),
            TierKind::Small => {
                let remaining_ms = entry.cache_expires_at_ms.saturating_sub(self.clock.now_ms());
                if remaining_ms <= 0 {
                    return false;
                }
                // round up so the store never expires before the entry does
                let ttl_secs = u64::try_from((remaining_ms + 999) / 1000).unwrap_or(0);
                self.small.set(&self.keys.hint, &raw, ttl_secs)
            }
        }
    }

    fn read_tier(&self, tier: TierKind) -> Option<String> {
        match tier {
            TierKind::Tab => self.tab.get(&self.keys.session),
            TierKind::Persistent => self.persistent.get(&self.keys.session),
            TierKind::Small => self.small.get(&self.keys.hint),
            TierKind::Backup => self.persistent.get(&self.keys.backup),
        }
    }

    /// Raw decoded entry of one tier, ignoring expiry.
    pub fn peek(&self, tier: TierKind) -> Option<CacheEntry> {
        self.read_tier(tier).and_then(|raw| CacheEntry::decode(&raw))
    }

    pub fn load(&self) -> Option<CacheEntry> {
        self.load_with_origin().map(|(e, _)| e)
    }

    /// First usable entry in priority order, with the tier it came from. A hit below
    /// the tab tier is copied upward so the next read is cheap.
    pub fn load_with_origin(&self) -> Option<(CacheEntry, TierKind)> {
        let generation = self.generation();
        let now = self.clock.now_ms();
        for tier in TierKind::PRIORITY {
            let Some(raw) = self.read_tier(tier) else { continue };
            match CacheEntry::decode(&raw) {
                Some(entry) if entry.is_usable_at(now) => {
                    debug!(target: "sessionward::cache", tier = tier.as_str(), subject = %entry.session.subject_id, "cache hit");
                    self.promote(generation, tier, &entry);
                    return Some((entry, tier));
                }
                Some(_) => debug!(target: "sessionward::cache", tier = tier.as_str(), "stale entry skipped"),
                None => debug!(target: "sessionward::cache", tier = tier.as_str(), "unreadable entry skipped"),
            }
        }
        debug!(target: "sessionward::cache", "cache miss on every tier");
        None
    }

    /// Copy a lower-tier hit upward. Each target gets its own cache-expiry, as a
    /// save would give it; nothing is written if a `clear` ran since `generation`.
    fn promote(&self, generation: u64, from: TierKind, entry: &CacheEntry) {
        let targets: &[TierKind] = match from {
            TierKind::Tab => return,
            TierKind::Persistent => &[TierKind::Tab],
            // credential-less: never overwrite the primary slot, it may still hold a refresh credential
            TierKind::Small => &[TierKind::Tab],
            TierKind::Backup => &[TierKind::Tab, TierKind::Persistent, TierKind::Small],
        };
        let _guard = self.write_lock.lock();
        if self.generation() != generation {
            debug!(target: "sessionward::cache", from = from.as_str(), "dropping promotion issued before clear");
            return;
        }
        let now = self.clock.now_ms();
        let session_exp_ms = entry.session.session_expires_at.saturating_mul(1000);
        for &tier in targets {
            let promoted = match tier {
                TierKind::Tab => CacheEntry::new(entry.session.clone(), now, now.saturating_add(self.tab_ttl_ms).min(session_exp_ms)),
                TierKind::Small => {
                    CacheEntry::new(entry.session.minimized(), now, now.saturating_add(self.small_ttl_ms).min(session_exp_ms))
                }
                TierKind::Persistent => CacheEntry::new(entry.session.clone(), now, session_exp_ms),
                TierKind::Backup => continue,
            };
            if self.write_tier(tier, &promoted) {
                debug!(target: "sessionward::cache", from = from.as_str(), to = tier.as_str(), "promoted entry");
            }
        }
    }

    /// Last snapshot in the primary tier, whatever its expiry. Version must match.
    pub fn recover_stale(&self) -> Option<CachedSession> {
        self.peek(TierKind::Persistent).map(|e| e.session)
    }

    /// Refresh credential kept in the primary tier, even if the entry has expired.
    pub fn recover_refresh_credential(&self) -> Option<String> {
        self.recover_stale()?.refresh_token().map(str::to_string)
    }

    /// Remove the entry from every tier and invalidate in-flight saves.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.tab.remove(&self.keys.session);
        self.persistent.remove(&self.keys.session);
        self.persistent.remove(&self.keys.backup);
        self.small.remove(&self.keys.hint);
        info!(target: "sessionward::cache", generation, "cache cleared");
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod storage_tests;
