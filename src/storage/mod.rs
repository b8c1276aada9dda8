//!
//! sessionward storage module
//! --------------------------
//! Local persistence for the authentication session. Three heterogeneous stores
//! are wrapped by best-effort adapters and composed into one tiered cache:
//!
//! - tab-scoped store: fastest, private to one browsing context;
//! - origin-persistent store: survives restarts, shared by same-origin contexts,
//!   also hosts the backup slot;
//! - expiring small store: size-limited and visible to the server, so it only ever
//!   receives a credential-free projection of the session.
//!
//! No single store is trusted alone. The cache is the union of the tiers read with
//! fixed precedence, every entry carries a schema version and expiry, and any
//! store failure degrades to a miss. Only this module knows the storage keys.

mod adapters;
mod backend;
mod entry;
mod tiered;

pub use adapters::{PersistentStore, SmallStore, TabStore};
pub use backend::{FileBackend, KvBackend, MemoryBackend};
pub use entry::{CacheEntry, CachedSession, Credentials, SCHEMA_VERSION};
pub use tiered::{TierKind, TieredSessionCache};
