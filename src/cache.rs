//! Rate-limit cache: keys, the `Cacheable` contract, and the in-memory
//! sharded implementation.
//!
//! The cache is the only shared mutable state in the core. All mutation goes
//! through [`Cacheable::set`] and [`Cacheable::check_and_apply`]; lookups
//! return cloned snapshots so readers never observe a write in progress.
//! Cache operations are error-free by construction: a failed lookup is "not
//! found", never an error.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::model::{LimitCounterSet, LimitViolation};

/// Identity of one application under one service.
///
/// A composite struct rather than a formatted string, so distinct
/// service/application pairs can never collide regardless of what characters
/// the identifiers contain. `Display` renders a length-prefixed encoding for
/// logs only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    service: String,
    application: String,
}

impl CacheKey {
    pub fn new(service: impl Into<String>, application: impl Into<String>) -> Self {
        Self { service: service.into(), application: application.into() }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn application(&self) -> &str {
        &self.application
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}:{}",
            self.service.len(),
            self.service,
            self.application.len(),
            self.application
        )
    }
}

/// Result of a check-then-commit attempt against one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// All increments fit; counters were committed.
    Applied,
    /// At least one window would overflow; nothing was mutated.
    Rejected(LimitViolation),
    /// No live entry for the key; the caller must repopulate from remote.
    Missing,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Capability-set contract for rate-limit state storage.
///
/// Implementations must make `check_and_apply` linearizable per key: two
/// concurrent calls for the same key may not both be admitted when only one
/// unit of quota remains. Calls for different keys should not serialize
/// against each other.
pub trait Cacheable: Send + Sync {
    /// Snapshot the current state for a key. Never fails; a missing or
    /// expired entry is `None`.
    fn get(&self, key: &CacheKey) -> Option<LimitCounterSet>;

    /// Wholesale replace/populate the entry for a key, atomically with
    /// respect to concurrent readers and writers of the same key.
    fn set(&self, key: CacheKey, set: LimitCounterSet);

    /// Under exclusive access to the key's entry, check every proposed
    /// increment and commit all of them or none.
    fn check_and_apply(&self, key: &CacheKey, increments: &BTreeMap<String, u64>)
        -> ApplyOutcome;
}

struct CacheEntry {
    set: LimitCounterSet,
    populated_at_millis: u64,
}

/// Tuning knobs for [`LocalCache`].
#[derive(Debug, Clone)]
pub struct LocalCacheConfig {
    /// Number of independent lock shards. Keys in different shards never
    /// block one another.
    pub shards: usize,
    /// Entries older than this read as missing, forcing remote
    /// resynchronization. `None` disables aging.
    pub entry_ttl: Option<Duration>,
    /// Per-shard entry cap; inserting past it evicts the stalest entry in
    /// the shard. `None` disables the cap.
    pub max_entries_per_shard: Option<usize>,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self { shards: 16, entry_ttl: None, max_entries_per_shard: None }
    }
}

/// In-memory sharded implementation of [`Cacheable`].
///
/// A fixed arena of mutex-guarded maps; a key hashes to one shard, so
/// check-then-commit for a key serializes only against keys in the same
/// shard, never the whole cache.
pub struct LocalCache {
    shards: Vec<Mutex<HashMap<CacheKey, CacheEntry>>>,
    entry_ttl: Option<Duration>,
    max_entries_per_shard: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl LocalCache {
    pub fn new(config: LocalCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    /// Construct with an injected clock (tests use [`crate::clock::ManualClock`]).
    pub fn with_clock(config: LocalCacheConfig, clock: Arc<dyn Clock>) -> Self {
        let shard_count = config.shards.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Mutex::new(HashMap::new()));
        }
        Self {
            shards,
            entry_ttl: config.entry_ttl,
            // a cap of zero would make every insert bypass the guard
            max_entries_per_shard: config.max_entries_per_shard.map(|cap| cap.max(1)),
            clock,
        }
    }

    fn shard_for(&self, key: &CacheKey) -> &Mutex<HashMap<CacheKey, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        match self.entry_ttl {
            Some(ttl) => {
                let age = self.clock.now_millis().saturating_sub(entry.populated_at_millis);
                u128::from(age) > ttl.as_millis()
            }
            None => false,
        }
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(LocalCacheConfig::default())
    }
}

impl Cacheable for LocalCache {
    fn get(&self, key: &CacheKey) -> Option<LimitCounterSet> {
        let mut shard = self.shard_for(key).lock().expect("rate-limit cache shard poisoned");
        match shard.get(key) {
            Some(entry) if self.is_expired(entry) => {
                debug!(target: "quotagate::cache", key = %key, "entry expired");
                shard.remove(key);
                None
            }
            Some(entry) => Some(entry.set.clone()),
            None => None,
        }
    }

    fn set(&self, key: CacheKey, set: LimitCounterSet) {
        let mut shard = self.shard_for(&key).lock().expect("rate-limit cache shard poisoned");
        if let Some(cap) = self.max_entries_per_shard {
            if !shard.contains_key(&key) && shard.len() >= cap {
                let stalest = shard
                    .iter()
                    .min_by_key(|(_, entry)| entry.populated_at_millis)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = stalest {
                    warn!(target: "quotagate::cache", key = %victim, "shard full, evicting stalest entry");
                    shard.remove(&victim);
                }
            }
        }
        shard.insert(key, CacheEntry { set, populated_at_millis: self.clock.now_millis() });
    }

    fn check_and_apply(
        &self,
        key: &CacheKey,
        increments: &BTreeMap<String, u64>,
    ) -> ApplyOutcome {
        let mut shard = self.shard_for(key).lock().expect("rate-limit cache shard poisoned");
        let entry = match shard.get_mut(key) {
            Some(entry) => entry,
            None => return ApplyOutcome::Missing,
        };
        if self.is_expired(entry) {
            shard.remove(key);
            return ApplyOutcome::Missing;
        }
        if let Some(violation) = entry.set.would_exceed(increments) {
            return ApplyOutcome::Rejected(violation);
        }
        entry.set.apply(increments);
        ApplyOutcome::Applied
    }
}
