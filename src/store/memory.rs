//! In-process counter store.
//!
//! Correct within a single process only; used directly for single-instance
//! deployments and as the degradation target behind
//! [`FailoverStore`](super::FailoverStore). Entries expire lazily on access;
//! [`purge_expired`](MemoryStore::purge_expired) exists for deployments that
//! want a periodic sweep.

use super::{CounterStore, WindowCounter};
use crate::clock::Clock;
use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at_ms: u64,
}

/// In-process TTL-aware counter and flag store.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    counters: RwLock<HashMap<String, CounterEntry>>,
    violations: RwLock<HashMap<String, CounterEntry>>,
    blocks: RwLock<HashMap<String, u64>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entry_count", &self.entry_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store driven by the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: RwLock::new(HashMap::new()),
            violations: RwLock::new(HashMap::new()),
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store on the system clock.
    #[must_use]
    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(crate::clock::SystemClock))
    }

    /// Drop all expired entries.
    pub fn purge_expired(&self) {
        let now = self.clock.now_ms();

        self.counters
            .write()
            .unwrap()
            .retain(|_, entry| entry.expires_at_ms > now);
        self.violations
            .write()
            .unwrap()
            .retain(|_, entry| entry.expires_at_ms > now);
        self.blocks
            .write()
            .unwrap()
            .retain(|_, blocked_until| *blocked_until > now);
    }

    /// Total live entries across all maps (expired entries included until
    /// purged).
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.counters.read().unwrap().len()
            + self.violations.read().unwrap().len()
            + self.blocks.read().unwrap().len()
    }

    /// Current window count for a key, if a live window exists. Test and
    /// introspection helper; not part of the store contract.
    #[must_use]
    pub fn window_count(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.counters
            .read()
            .unwrap()
            .get(key)
            .filter(|entry| entry.expires_at_ms > now)
            .map(|entry| entry.count)
    }

    fn bump(
        map: &RwLock<HashMap<String, CounterEntry>>,
        key: &str,
        window: Duration,
        now: u64,
    ) -> CounterEntry {
        let mut entries = map.write().unwrap();
        let expires_at_ms = now + window.as_millis() as u64;

        let entry = entries.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at_ms,
        });

        // Lazy expiry: a stale entry restarts the window.
        if entry.expires_at_ms <= now {
            entry.count = 0;
            entry.expires_at_ms = expires_at_ms;
        }

        entry.count += 1;
        *entry
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<WindowCounter> {
        let now = self.clock.now_ms();
        let entry = Self::bump(&self.counters, key, window, now);
        Ok(WindowCounter {
            count: entry.count,
            window_expires_at_ms: entry.expires_at_ms,
        })
    }

    async fn is_blocked(&self, key: &str) -> StoreResult<Option<u64>> {
        let now = self.clock.now_ms();
        Ok(self
            .blocks
            .read()
            .unwrap()
            .get(key)
            .and_then(|blocked_until| blocked_until.checked_sub(now))
            .filter(|remaining| *remaining > 0))
    }

    async fn block(&self, key: &str, duration: Duration) -> StoreResult<()> {
        let blocked_until = self.clock.now_ms() + duration.as_millis() as u64;
        self.blocks
            .write()
            .unwrap()
            .insert(key.to_string(), blocked_until);
        Ok(())
    }

    async fn unblock(&self, key: &str) -> StoreResult<()> {
        self.blocks.write().unwrap().remove(key);
        Ok(())
    }

    async fn record_violation(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let now = self.clock.now_ms();
        Ok(Self::bump(&self.violations, key, window, now).count)
    }
}
