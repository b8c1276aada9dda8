//! Engine configuration.
//!
//! Layers, lowest precedence first: built-in defaults, an optional JSON file,
//! then `SESSIONWARD_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Per-operation deadlines for the remote authority, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorityTimeouts {
    #[serde(default = "AuthorityTimeouts::default_get_session_ms")]
    pub get_session_ms: u64,
    #[serde(default = "AuthorityTimeouts::default_refresh_ms")]
    pub refresh_ms: u64,
    #[serde(default = "AuthorityTimeouts::default_sign_in_ms")]
    pub sign_in_ms: u64,
    #[serde(default = "AuthorityTimeouts::default_sign_out_ms")]
    pub sign_out_ms: u64,
    #[serde(default = "AuthorityTimeouts::default_fetch_privilege_ms")]
    pub fetch_privilege_ms: u64,
}

impl AuthorityTimeouts {
    fn default_get_session_ms() -> u64 { 5_000 }
    fn default_refresh_ms() -> u64 { 10_000 }
    fn default_sign_in_ms() -> u64 { 15_000 }
    fn default_sign_out_ms() -> u64 { 5_000 }
    fn default_fetch_privilege_ms() -> u64 { 8_000 }

    /// Same deadline for every operation; handy in tests.
    pub fn uniform(ms: u64) -> Self {
        Self { get_session_ms: ms, refresh_ms: ms, sign_in_ms: ms, sign_out_ms: ms, fetch_privilege_ms: ms }
    }
}

impl Default for AuthorityTimeouts {
    fn default() -> Self {
        Self {
            get_session_ms: Self::default_get_session_ms(),
            refresh_ms: Self::default_refresh_ms(),
            sign_in_ms: Self::default_sign_in_ms(),
            sign_out_ms: Self::default_sign_out_ms(),
            fetch_privilege_ms: Self::default_fetch_privilege_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Prefix of every storage key owned by the engine.
    #[serde(default = "SessionConfig::default_key_prefix")]
    pub key_prefix: String,
    /// Cache-expiry of tab-scoped entries.
    #[serde(default = "SessionConfig::default_tab_ttl_ms")]
    pub tab_ttl_ms: u64,
    /// Upper bound for small-store entries; always clamped to the session expiry.
    #[serde(default = "SessionConfig::default_small_store_ttl_secs")]
    pub small_store_ttl_secs: u64,
    #[serde(default = "SessionConfig::default_small_store_max_bytes")]
    pub small_store_max_bytes: usize,
    #[serde(default = "SessionConfig::default_backup_max_age_ms")]
    pub backup_max_age_ms: u64,
    /// A matching cached privilege younger than this skips the remote lookup.
    #[serde(default = "SessionConfig::default_privilege_fresh_ms")]
    pub privilege_fresh_ms: u64,
    /// How old a matching privilege may be and still stand in for a failed lookup.
    /// `None` accepts any age.
    #[serde(default = "SessionConfig::default_stale_privilege_grace_ms")]
    pub stale_privilege_grace_ms: Option<u64>,
    #[serde(default)]
    pub timeouts: AuthorityTimeouts,
    #[serde(default)]
    pub authority_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl SessionConfig {
    fn default_key_prefix() -> String { "sessionward".to_string() }
    fn default_tab_ttl_ms() -> u64 { 5 * 60 * 1000 }
    fn default_small_store_ttl_secs() -> u64 { 24 * 60 * 60 }
    fn default_small_store_max_bytes() -> usize { 4096 }
    fn default_backup_max_age_ms() -> u64 { 24 * 60 * 60 * 1000 }
    fn default_privilege_fresh_ms() -> u64 { 5 * 60 * 1000 }
    fn default_stale_privilege_grace_ms() -> Option<u64> { Some(60 * 60 * 1000) }

    pub fn session_key(&self) -> String { format!("{}.session", self.key_prefix) }
    pub fn backup_key(&self) -> String { format!("{}.session.backup", self.key_prefix) }
    pub fn hint_key(&self) -> String { format!("{}.hint", self.key_prefix) }

    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
        let cfg: SessionConfig =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Overlay `SESSIONWARD_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn num<T: std::str::FromStr>(name: &str, raw: String) -> Result<T> {
            raw.trim().parse::<T>().map_err(|_| anyhow::anyhow!("{} must be a number, got '{}'", name, raw))
        }
        if let Some(v) = lookup("SESSIONWARD_KEY_PREFIX") { self.key_prefix = v; }
        if let Some(v) = lookup("SESSIONWARD_TAB_TTL_MS") { self.tab_ttl_ms = num("SESSIONWARD_TAB_TTL_MS", v)?; }
        if let Some(v) = lookup("SESSIONWARD_SMALL_STORE_TTL_SECS") {
            self.small_store_ttl_secs = num("SESSIONWARD_SMALL_STORE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("SESSIONWARD_BACKUP_MAX_AGE_MS") {
            self.backup_max_age_ms = num("SESSIONWARD_BACKUP_MAX_AGE_MS", v)?;
        }
        if let Some(v) = lookup("SESSIONWARD_PRIVILEGE_FRESH_MS") {
            self.privilege_fresh_ms = num("SESSIONWARD_PRIVILEGE_FRESH_MS", v)?;
        }
        if let Some(v) = lookup("SESSIONWARD_STALE_PRIVILEGE_GRACE_MS") {
            // "unbounded" lifts the limit entirely
            self.stale_privilege_grace_ms = if v.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(num("SESSIONWARD_STALE_PRIVILEGE_GRACE_MS", v)?)
            };
        }
        if let Some(v) = lookup("SESSIONWARD_AUTHORITY_URL") { self.authority_url = Some(v); }
        if let Some(v) = lookup("SESSIONWARD_DATA_DIR") { self.data_dir = Some(PathBuf::from(v)); }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.trim().is_empty() {
            bail!("key_prefix must not be empty");
        }
        if self.tab_ttl_ms == 0 || self.small_store_ttl_secs == 0 || self.backup_max_age_ms == 0 {
            bail!("cache TTLs must be non-zero");
        }
        let t = &self.timeouts;
        if [t.get_session_ms, t.refresh_ms, t.sign_in_ms, t.sign_out_ms, t.fetch_privilege_ms].contains(&0) {
            bail!("authority timeouts must be non-zero");
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: Self::default_key_prefix(),
            tab_ttl_ms: Self::default_tab_ttl_ms(),
            small_store_ttl_secs: Self::default_small_store_ttl_secs(),
            small_store_max_bytes: Self::default_small_store_max_bytes(),
            backup_max_age_ms: Self::default_backup_max_age_ms(),
            privilege_fresh_ms: Self::default_privilege_fresh_ms(),
            stale_privilege_grace_ms: Self::default_stale_privilege_grace_ms(),
            timeouts: AuthorityTimeouts::default(),
            authority_url: None,
            data_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_takes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessionward.json");
        std::fs::write(&path, r#"{"key_prefix":"mk","timeouts":{"refresh_ms":2500}}"#).unwrap();
        let cfg = SessionConfig::load(&path).unwrap();
        assert_eq!(cfg.key_prefix, "mk");
        assert_eq!(cfg.session_key(), "mk.session");
        assert_eq!(cfg.backup_key(), "mk.session.backup");
        assert_eq!(cfg.timeouts.refresh_ms, 2500);
        assert_eq!(cfg.timeouts.sign_in_ms, 15_000);
        assert_eq!(cfg.tab_ttl_ms, 300_000);
        assert_eq!(cfg.stale_privilege_grace_ms, Some(3_600_000));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("SESSIONWARD_TAB_TTL_MS", "1000"),
            ("SESSIONWARD_STALE_PRIVILEGE_GRACE_MS", "unbounded"),
            ("SESSIONWARD_AUTHORITY_URL", "http://127.0.0.1:9999"),
        ]
        .into_iter()
        .collect();
        let mut cfg = SessionConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.tab_ttl_ms, 1000);
        assert_eq!(cfg.stale_privilege_grace_ms, None);
        assert_eq!(cfg.authority_url.as_deref(), Some("http://127.0.0.1:9999"));
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = SessionConfig::default();
        let err = cfg.apply_env(|k| (k == "SESSIONWARD_TAB_TTL_MS").then(|| "soon".to_string())).unwrap_err();
        assert!(err.to_string().contains("SESSIONWARD_TAB_TTL_MS"));

        let mut cfg = SessionConfig::default();
        cfg.timeouts.sign_out_ms = 0;
        assert!(cfg.validate().is_err());
    }
}
