//! Primary store with degradation handling.
//!
//! Wraps the networked store with a per-operation time budget and an
//! in-process fallback. Outages are logged once per episode, not per
//! request, and recovery is logged when the primary answers again.
//!
//! What happens to a failed call depends on the configured
//! [`FallbackMode`]:
//!
//! - `Local`: the call is served by the in-process [`MemoryStore`]. Limiting
//!   continues with per-process correctness only.
//! - `FailOpen` / `FailClosed`: the error is returned to the decision
//!   engine, which admits or denies deterministically for the rest of the
//!   outage.

use super::{CounterStore, MemoryStore, WindowCounter};
use crate::clock::Clock;
use crate::config::FallbackMode;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failover wrapper around a primary [`CounterStore`].
pub struct FailoverStore {
    primary: Arc<dyn CounterStore>,
    fallback: MemoryStore,
    mode: FallbackMode,
    op_timeout: Duration,
    outage: AtomicBool,
}

impl std::fmt::Debug for FailoverStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverStore")
            .field("mode", &self.mode)
            .field("op_timeout", &self.op_timeout)
            .field("outage", &self.outage.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FailoverStore {
    /// Wrap a primary store.
    #[must_use]
    pub fn new(
        primary: Arc<dyn CounterStore>,
        mode: FallbackMode,
        op_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            primary,
            fallback: MemoryStore::new(clock),
            mode,
            op_timeout,
            outage: AtomicBool::new(false),
        }
    }

    /// Whether the primary is currently considered down.
    #[must_use]
    pub fn in_outage(&self) -> bool {
        self.outage.load(Ordering::Relaxed)
    }

    /// Run a primary call under the op timeout and translate failures.
    async fn guarded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => {
                self.note_recovery();
                Ok(value)
            },
            Ok(Err(err)) => {
                self.note_outage(op, &err);
                Err(err)
            },
            Err(_) => {
                let err = StoreError::Timeout(self.op_timeout);
                self.note_outage(op, &err);
                Err(err)
            },
        }
    }

    fn note_outage(&self, op: &'static str, err: &StoreError) {
        if !self.outage.swap(true, Ordering::SeqCst) {
            warn!(
                op,
                error = %err,
                mode = ?self.mode,
                "primary counter store unreachable, entering degraded mode"
            );
        } else {
            debug!(op, error = %err, "primary counter store still unreachable");
        }
    }

    fn note_recovery(&self) {
        if self.outage.swap(false, Ordering::SeqCst) {
            info!("primary counter store recovered, leaving degraded mode");
        }
    }
}

#[async_trait]
impl CounterStore for FailoverStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<WindowCounter> {
        match self.guarded("increment", self.primary.increment(key, window)).await {
            Ok(counter) => Ok(counter),
            Err(err) => match self.mode {
                FallbackMode::Local => self.fallback.increment(key, window).await,
                _ => Err(err),
            },
        }
    }

    async fn is_blocked(&self, key: &str) -> StoreResult<Option<u64>> {
        match self.guarded("is_blocked", self.primary.is_blocked(key)).await {
            Ok(remaining) => Ok(remaining),
            Err(err) => match self.mode {
                FallbackMode::Local => self.fallback.is_blocked(key).await,
                _ => Err(err),
            },
        }
    }

    async fn block(&self, key: &str, duration: Duration) -> StoreResult<()> {
        match self.guarded("block", self.primary.block(key, duration)).await {
            Ok(()) => Ok(()),
            Err(err) => match self.mode {
                FallbackMode::Local => self.fallback.block(key, duration).await,
                _ => Err(err),
            },
        }
    }

    async fn unblock(&self, key: &str) -> StoreResult<()> {
        match self.guarded("unblock", self.primary.unblock(key)).await {
            Ok(()) => Ok(()),
            Err(err) => match self.mode {
                FallbackMode::Local => self.fallback.unblock(key).await,
                _ => Err(err),
            },
        }
    }

    async fn record_violation(&self, key: &str, window: Duration) -> StoreResult<u64> {
        match self
            .guarded("record_violation", self.primary.record_violation(key, window))
            .await
        {
            Ok(count) => Ok(count),
            Err(err) => match self.mode {
                FallbackMode::Local => self.fallback.record_violation(key, window).await,
                _ => Err(err),
            },
        }
    }

    fn healthy(&self) -> bool {
        !self.in_outage() && self.primary.healthy()
    }
}
