//! The decision engine.
//!
//! [`Gate::check`] is the single entry point: it resolves the route policy
//! and tracking identity, consults the counter store, runs escalation on
//! breaches, and returns a [`Verdict`]. The gate never touches a transport
//! response; the embedding layer writes status and headers from the verdict
//! (see [`crate::http`]).
//!
//! Store failures never escape this module. Depending on the configured
//! [`FallbackMode`], an unreachable store resolves every decision as
//! admitted (fail-open), denied (fail-closed), or is absorbed inside the
//! failover store (local mode).

use crate::clock::{Clock, SystemClock};
use crate::config::{FallbackMode, GateConfig, StoreBackend};
use crate::error::{GateError, GateResult, StoreError};
use crate::escalation::{BreachOutcome, Escalator};
use crate::identity::{self, RequestMeta, TrackingStrategy};
use crate::observe::{self, Severity};
use crate::policy::{RateLimitPolicy, RouteTable};
use crate::store::{CounterStore, FailoverStore, MemoryStore, RedisStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Terminal state of a request decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request may proceed.
    Admitted,

    /// Request exceeded the window limit.
    DeniedOverLimit,

    /// Identity carries an active block flag.
    DeniedBlocked,
}

/// Outcome of one gate check, consumed by the response layer.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Terminal decision.
    pub decision: Decision,

    /// Resolved policy limit.
    pub limit: u32,

    /// Remaining quota in the current window (0 when denied).
    pub remaining: u32,

    /// Epoch-ms timestamp when the current window resets. `None` for skipped
    /// routes, which carry no rate-limit metadata at all.
    pub reset_at_ms: Option<u64>,

    /// Seconds until the client may retry. Present only on denials.
    pub retry_after_secs: Option<u64>,

    /// Resolved tracking identity. `None` for skipped routes.
    pub identity: Option<String>,

    /// Strategy the identity was resolved under. `None` for skipped routes.
    pub strategy: Option<TrackingStrategy>,
}

impl Verdict {
    /// Whether the request may proceed.
    #[must_use]
    pub fn admitted(&self) -> bool {
        self.decision == Decision::Admitted
    }

    fn skip() -> Self {
        Self {
            decision: Decision::Admitted,
            limit: 0,
            remaining: 0,
            reset_at_ms: None,
            retry_after_secs: None,
            identity: None,
            strategy: None,
        }
    }
}

/// Per-process decision counters.
#[derive(Debug, Default)]
pub struct GateStats {
    checked: AtomicU64,
    admitted: AtomicU64,
    denied_over_limit: AtomicU64,
    denied_blocked: AtomicU64,
    skipped: AtomicU64,
    store_failures: AtomicU64,
}

impl GateStats {
    /// Total checks performed.
    #[must_use]
    pub fn checked(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }

    /// Admitted decisions (skipped routes included).
    #[must_use]
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Over-limit denials.
    #[must_use]
    pub fn denied_over_limit(&self) -> u64 {
        self.denied_over_limit.load(Ordering::Relaxed)
    }

    /// Denials due to an active block.
    #[must_use]
    pub fn denied_blocked(&self) -> u64 {
        self.denied_blocked.load(Ordering::Relaxed)
    }

    /// Checks that skipped limiting entirely.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Store calls that failed and fell back.
    #[must_use]
    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }

    fn record_skipped(&self) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_admitted(&self) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_over_limit(&self) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        self.denied_over_limit.fetch_add(1, Ordering::Relaxed);
    }

    fn record_blocked(&self) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        self.denied_blocked.fetch_add(1, Ordering::Relaxed);
    }

    fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// The gate in front of every handler.
pub struct Gate {
    routes: RouteTable,
    store: Arc<dyn CounterStore>,
    escalator: Escalator,
    fallback: FallbackMode,
    clock: Arc<dyn Clock>,
    stats: GateStats,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("routes", &self.routes)
            .field("fallback", &self.fallback)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Gate {
    /// Build a gate from configuration, constructing the configured store.
    ///
    /// For the Redis backend the primary store is wrapped in a
    /// [`FailoverStore`]. If the initial connection fails and the fallback
    /// mode is not fail-closed, the gate starts on the in-process store with
    /// a warning instead of refusing to serve.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration or route policies, or when
    /// the fail-closed store cannot be reached at startup.
    pub async fn new(config: GateConfig, routes: RouteTable) -> GateResult<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn CounterStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new(clock.clone())),
            StoreBackend::Redis => {
                match RedisStore::connect(&config.store.url, config.store.key_prefix.clone()).await
                {
                    Ok(primary) => Arc::new(FailoverStore::new(
                        Arc::new(primary),
                        config.store.fallback,
                        config.store.op_timeout,
                        clock.clone(),
                    )),
                    Err(err) if config.store.fallback != FallbackMode::FailClosed => {
                        warn!(
                            error = %err,
                            "initial store connection failed, starting on the in-process store"
                        );
                        Arc::new(MemoryStore::new(clock.clone()))
                    },
                    Err(err) => return Err(err.into()),
                }
            },
        };

        Ok(Self::assemble(&config, routes, store, clock))
    }

    /// Start building a gate with explicit parts (primarily for tests and
    /// embedders that construct their own store).
    #[must_use]
    pub fn builder() -> GateBuilder {
        GateBuilder::default()
    }

    fn assemble(
        config: &GateConfig,
        routes: RouteTable,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            routes,
            store,
            escalator: Escalator::new(&config.escalation),
            fallback: config.store.fallback,
            clock,
            stats: GateStats::default(),
        }
    }

    /// Decide whether a request may proceed.
    pub async fn check(&self, meta: &RequestMeta) -> Verdict {
        let Some(policy) = self.routes.resolve(meta.method(), meta.path()) else {
            self.stats.record_skipped();
            observe::skipped(meta.method(), meta.path());
            return Verdict::skip();
        };

        let identity = identity::resolve(meta, policy.strategy);

        // An active block wins before any counting; blocked identities must
        // not keep extending their own window.
        match self.store.is_blocked(&identity).await {
            Ok(Some(remaining_ms)) => return self.deny_blocked(&policy, meta, identity, remaining_ms),
            Ok(None) => {},
            Err(err) => return self.degraded(&policy, meta, identity, &err),
        }

        let counter = match self.store.increment(&identity, policy.window).await {
            Ok(counter) => counter,
            Err(err) => return self.degraded(&policy, meta, identity, &err),
        };

        if counter.count <= u64::from(policy.limit) {
            let remaining = policy.limit - counter.count as u32;
            observe::admitted(
                &identity,
                policy.strategy,
                meta.method(),
                meta.path(),
                policy.limit,
                counter.count,
                remaining,
            );
            self.stats.record_admitted();
            return Verdict {
                decision: Decision::Admitted,
                limit: policy.limit,
                remaining,
                reset_at_ms: Some(counter.window_expires_at_ms),
                retry_after_secs: None,
                identity: Some(identity),
                strategy: Some(policy.strategy),
            };
        }

        // Breach. Escalation failures mid-flight do not change the denial;
        // the violation simply goes unrecorded for this request.
        let outcome = match self.escalator.on_breach(self.store.as_ref(), &identity).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.stats.record_store_failure();
                warn!(error = %err, "failed to record violation for breach");
                BreachOutcome {
                    violations: 0,
                    blocked_now: false,
                }
            },
        };

        let now = self.clock.now_ms();
        let retry_after_secs = ceil_secs(counter.window_expires_at_ms.saturating_sub(now)).max(1);
        let severity = Severity::for_breach(
            outcome.violations,
            self.escalator.threshold(),
            outcome.blocked_now,
        );
        observe::over_limit(
            &identity,
            policy.strategy,
            meta.method(),
            meta.path(),
            policy.limit,
            counter.count,
            outcome.violations,
            severity,
        );
        self.stats.record_over_limit();

        Verdict {
            decision: Decision::DeniedOverLimit,
            limit: policy.limit,
            remaining: 0,
            reset_at_ms: Some(counter.window_expires_at_ms),
            retry_after_secs: Some(retry_after_secs),
            identity: Some(identity),
            strategy: Some(policy.strategy),
        }
    }

    /// Remove an identity's block flag (operator override).
    ///
    /// # Errors
    ///
    /// Returns the store error if the flag could not be removed.
    pub async fn unblock(&self, identity: &str) -> GateResult<()> {
        self.store.unblock(identity).await?;
        info!(identity = %observe::redact_identity(identity), "block flag removed by operator");
        Ok(())
    }

    /// Per-process decision counters.
    #[must_use]
    pub fn stats(&self) -> &GateStats {
        &self.stats
    }

    /// Whether the underlying store considers itself healthy.
    #[must_use]
    pub fn store_healthy(&self) -> bool {
        self.store.healthy()
    }

    fn deny_blocked(
        &self,
        policy: &RateLimitPolicy,
        meta: &RequestMeta,
        identity: String,
        remaining_ms: u64,
    ) -> Verdict {
        let retry_after_secs = ceil_secs(remaining_ms).max(1);
        let blocked_until_ms = self.clock.now_ms() + remaining_ms;

        observe::blocked(
            &identity,
            policy.strategy,
            meta.method(),
            meta.path(),
            retry_after_secs,
            blocked_until_ms,
        );
        self.stats.record_blocked();

        Verdict {
            decision: Decision::DeniedBlocked,
            limit: policy.limit,
            remaining: 0,
            reset_at_ms: Some(blocked_until_ms),
            retry_after_secs: Some(retry_after_secs),
            identity: Some(identity),
            strategy: Some(policy.strategy),
        }
    }

    /// Resolve a decision while the store is unreachable.
    ///
    /// Verdicts synthesize a fresh window so clients still receive
    /// consistent headers.
    fn degraded(
        &self,
        policy: &RateLimitPolicy,
        meta: &RequestMeta,
        identity: String,
        _err: &StoreError,
    ) -> Verdict {
        self.stats.record_store_failure();
        let reset_at_ms = Some(self.clock.now_ms() + policy.window.as_millis() as u64);

        match self.fallback {
            FallbackMode::FailClosed => {
                observe::degraded(meta.method(), meta.path(), false);
                self.stats.record_over_limit();
                Verdict {
                    decision: Decision::DeniedOverLimit,
                    limit: policy.limit,
                    remaining: 0,
                    reset_at_ms,
                    retry_after_secs: Some(policy.window.as_secs().max(1)),
                    identity: Some(identity),
                    strategy: Some(policy.strategy),
                }
            },
            // Local mode only lands here if the fallback store itself failed,
            // which the in-process store does not do; treat it as fail-open.
            FallbackMode::FailOpen | FallbackMode::Local => {
                observe::degraded(meta.method(), meta.path(), true);
                self.stats.record_admitted();
                Verdict {
                    decision: Decision::Admitted,
                    limit: policy.limit,
                    remaining: policy.limit.saturating_sub(1),
                    reset_at_ms,
                    retry_after_secs: None,
                    identity: Some(identity),
                    strategy: Some(policy.strategy),
                }
            },
        }
    }
}

/// Builder for assembling a [`Gate`] from explicit parts.
#[derive(Default)]
pub struct GateBuilder {
    config: Option<GateConfig>,
    routes: Option<RouteTable>,
    store: Option<Arc<dyn CounterStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for GateBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateBuilder")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl GateBuilder {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the route table. Defaults to a table with only the global default
    /// policy.
    #[must_use]
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Set an explicit store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set an explicit clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the gate.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration, or when the Redis backend
    /// is configured without an explicit store (use [`Gate::new`] for that).
    pub fn build(self) -> GateResult<Gate> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let routes = match self.routes {
            Some(routes) => routes,
            None => RouteTable::builder(config.gate.default_limit, config.gate.default_window)
                .build()?,
        };

        let store = match self.store {
            Some(store) => store,
            None => {
                if config.store.backend == StoreBackend::Redis {
                    return Err(GateError::Config(
                        "redis backend requires an async constructor, use Gate::new".to_string(),
                    ));
                }
                Arc::new(MemoryStore::new(clock.clone()))
            },
        };

        Ok(Gate::assemble(&config, routes, store, clock))
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
