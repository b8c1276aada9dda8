//! Best-effort adapters over the raw backends.
//!
//! Every failure is logged and absorbed here: reads degrade to "absent", writes
//! and removals become no-ops. Nothing in this module returns an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::backend::KvBackend;
use crate::clock::Clock;

struct BestEffort {
    backend: Arc<dyn KvBackend>,
    tier: &'static str,
}

impl BestEffort {
    fn get(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "sessionward::store", tier = self.tier, key, code = e.code_str(), "read failed: {}", e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> bool {
        match self.backend.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "sessionward::store", tier = self.tier, key, code = e.code_str(), "write failed: {}", e);
                false
            }
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!(target: "sessionward::store", tier = self.tier, key, code = e.code_str(), "remove failed: {}", e);
        }
    }
}

/// Store scoped to one browsing context; fastest tier, not shared across tabs.
pub struct TabStore(BestEffort);

impl TabStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self(BestEffort { backend, tier: "tab" })
    }

    pub fn get(&self, key: &str) -> Option<String> { self.0.get(key) }
    /// Returns whether the write landed.
    pub fn set(&self, key: &str, value: &str) -> bool { self.0.set(key, value) }
    pub fn remove(&self, key: &str) { self.0.remove(key) }
}

/// Store that survives restarts and is shared by every context of the origin.
pub struct PersistentStore(BestEffort);

impl PersistentStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self(BestEffort { backend, tier: "persistent" })
    }

    pub fn get(&self, key: &str) -> Option<String> { self.0.get(key) }
    pub fn set(&self, key: &str, value: &str) -> bool { self.0.set(key, value) }
    pub fn remove(&self, key: &str) { self.0.remove(key) }
}

#[derive(Serialize, Deserialize)]
struct Stamped {
    v: String,
    /// Expiry in epoch millis.
    exp: i64,
}

/// Size-limited store whose contents travel with every request of the origin.
///
/// Expiry is enforced here rather than trusted to the backend. Callers must only
/// put non-sensitive data in it.
pub struct SmallStore {
    inner: BestEffort,
    clock: Arc<dyn Clock>,
}

impl SmallStore {
    pub fn new(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { inner: BestEffort { backend, tier: "small" }, clock }
    }

    pub fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let exp = self.clock.now_ms().saturating_add(ttl_ms);
        let stamped = Stamped { v: value.to_string(), exp };
        match serde_json::to_string(&stamped) {
            Ok(raw) => self.inner.set(key, &raw),
            Err(e) => {
                warn!(target: "sessionward::store", tier = "small", key, "encode failed: {}", e);
                false
            }
        }
    }

    /// Expired or unreadable entries are deleted and reported absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let raw = self.inner.get(key)?;
        let stamped: Stamped = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(_) => {
                warn!(target: "sessionward::store", tier = "small", key, "dropping unreadable entry");
                self.inner.remove(key);
                return None;
            }
        };
        if self.clock.now_ms() >= stamped.exp {
            self.inner.remove(key);
            return None;
        }
        Some(stamped.v)
    }

    pub fn remove(&self, key: &str) { self.inner.remove(key) }
}
