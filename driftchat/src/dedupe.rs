//! Time- and size-bounded store of already-seen message identifiers.
//!
//! The real-time channel is at-least-once and the client inserts
//! optimistically, so every arriving row is checked here by server id and
//! by client token before it may be merged. Entries expire after a TTL
//! (lazily on lookup, and in bulk via a periodic cleanup task) and the
//! oldest ~10% are evicted when the store reaches its size cap, keeping
//! memory bounded without losing the recent replay window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Configuration for the [`DedupeStore`].
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// How long a key counts as "seen". Covers realistic round-trip and
    /// replay windows for the real-time subscription.
    pub ttl: Duration,
    /// Maximum number of live entries before eviction kicks in.
    pub max_entries: usize,
    /// How often the background cleanup task sweeps expired entries.
    pub cleanup_interval: Duration,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            max_entries: 1000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Observability snapshot of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeStats {
    /// Number of live entries.
    pub len: usize,
    /// Configured size cap.
    pub max_entries: usize,
    /// Configured TTL.
    pub ttl: Duration,
    /// Age of the oldest entry, if any.
    pub oldest_age: Option<Duration>,
    /// Age of the newest entry, if any.
    pub newest_age: Option<Duration>,
}

struct Inner {
    /// Live entries with their insertion instant.
    entries: HashMap<String, Instant>,
    /// Insertion order for eviction. May hold stale markers for keys that
    /// were re-inserted or removed; markers are skipped when their instant
    /// no longer matches `entries`.
    order: VecDeque<(String, Instant)>,
}

/// Bounded set of recently seen message identifiers.
///
/// Explicitly constructed and shared via `Arc` across all open chats;
/// tests instantiate isolated stores rather than relying on a global.
pub struct DedupeStore {
    config: DedupeConfig,
    inner: Mutex<Inner>,
}

impl DedupeStore {
    /// Creates a store with the given configuration.
    #[must_use]
    pub fn new(config: DedupeConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Records a key as seen at the current instant.
    ///
    /// If the store is at capacity and the key is new, the oldest ~10% of
    /// entries (by insertion time, not access time) are evicted first.
    pub fn insert(&self, key: impl Into<String>) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.entries.len() >= self.config.max_entries && !inner.entries.contains_key(&key) {
            let batch = (self.config.max_entries / 10).max(1);
            let evicted = Self::evict_oldest(&mut inner, batch);
            tracing::debug!(evicted, "dedupe store at capacity, evicted oldest entries");
        }

        inner.entries.insert(key.clone(), now);
        inner.order.push_back((key, now));

        // Removals and re-inserts leave stale markers behind; compact once
        // they clearly dominate, so `order` stays proportional to the live
        // set even if the cleanup task was never spawned.
        if inner.order.len() > 64 && inner.order.len() > inner.entries.len() * 2 {
            Self::compact_order(&mut inner);
        }
    }

    /// Whether the key was seen within the TTL.
    ///
    /// A stale hit counts as absent and is removed on the spot (lazy
    /// expiry), independent of the background sweep.
    pub fn contains(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(at) if at.elapsed() <= self.config.ttl => true,
            Some(_) => {
                inner.entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Forgets a key immediately.
    pub fn remove(&self, key: &str) {
        self.inner.lock().entries.remove(key);
    }

    /// Drops all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of live entries (including not-yet-swept expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Observability snapshot: size, limits, and entry age spread.
    #[must_use]
    pub fn stats(&self) -> DedupeStats {
        let inner = self.inner.lock();
        let oldest_age = inner.entries.values().min().map(Instant::elapsed);
        let newest_age = inner.entries.values().max().map(Instant::elapsed);
        DedupeStats {
            len: inner.entries.len(),
            max_entries: self.config.max_entries,
            ttl: self.config.ttl,
            oldest_age,
            newest_age,
        }
    }

    /// Removes every entry older than the TTL. Returns how many were swept.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.config.ttl;
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, at| at.elapsed() <= ttl);
        let swept = before - inner.entries.len();
        Self::compact_order(&mut inner);
        swept
    }

    /// Drops order markers whose key is gone or was re-inserted, so
    /// eviction stays O(batch).
    fn compact_order(inner: &mut Inner) {
        let entries = std::mem::take(&mut inner.entries);
        inner
            .order
            .retain(|(key, at)| entries.get(key) == Some(at));
        inner.entries = entries;
    }

    /// Spawns a background task sweeping expired entries on a fixed
    /// interval, independent of lazy expiry on [`contains`](Self::contains).
    ///
    /// The task runs until the returned [`tokio::task::JoinHandle`] is
    /// aborted or the runtime shuts down.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let period = store.config.cleanup_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await; // first tick completes immediately
            loop {
                tick.tick().await;
                let swept = store.purge_expired();
                if swept > 0 {
                    tracing::debug!(swept, remaining = store.len(), "dedupe cleanup sweep");
                }
            }
        })
    }

    /// Evicts up to `count` entries in insertion order, skipping stale
    /// order markers. Returns how many live entries were actually evicted.
    fn evict_oldest(inner: &mut Inner, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some((key, at)) = inner.order.pop_front() else {
                break;
            };
            if inner.entries.get(&key) == Some(&at) {
                inner.entries.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }
}
