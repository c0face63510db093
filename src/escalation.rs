//! Violation escalation.
//!
//! Converts repeated limit breaches into a temporary hard block. Breaches
//! are counted in their own window, deliberately much longer than the
//! rate-limit window, so escalation reflects sustained abuse across windows
//! rather than one overzealous retry loop. The violation counter restarts
//! from zero once its TTL elapses, including after a block expires.

use crate::config::EscalationConfig;
use crate::error::StoreResult;
use crate::store::CounterStore;
use std::time::Duration;
use tracing::debug;

/// What a breach amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreachOutcome {
    /// Violations recorded in the current violation window, this one
    /// included. Zero when the store could not be reached.
    pub violations: u64,

    /// Whether this breach crossed the threshold and created a block.
    pub blocked_now: bool,
}

/// Escalates repeated breaches into timed blocks.
#[derive(Debug, Clone)]
pub struct Escalator {
    threshold: u64,
    violation_window: Duration,
    block_duration: Duration,
}

impl Escalator {
    /// Create an escalator from configuration.
    #[must_use]
    pub fn new(config: &EscalationConfig) -> Self {
        Self {
            threshold: config.threshold,
            violation_window: config.violation_window,
            block_duration: config.block_duration,
        }
    }

    /// Breach threshold.
    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Block duration applied on escalation.
    #[must_use]
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    /// Record a breach for an identity and block it if the threshold is
    /// crossed.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the caller decides how a degraded store
    /// affects the verdict.
    pub async fn on_breach(
        &self,
        store: &dyn CounterStore,
        identity: &str,
    ) -> StoreResult<BreachOutcome> {
        let violations = store
            .record_violation(identity, self.violation_window)
            .await?;

        let blocked_now = violations >= self.threshold;
        if blocked_now {
            store.block(identity, self.block_duration).await?;
        } else {
            debug!(
                identity,
                violations,
                threshold = self.threshold,
                "breach recorded below escalation threshold"
            );
        }

        Ok(BreachOutcome {
            violations,
            blocked_now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn escalator() -> Escalator {
        Escalator::new(&EscalationConfig {
            threshold: 3,
            violation_window: Duration::from_secs(600),
            block_duration: Duration::from_secs(900),
        })
    }

    #[tokio::test]
    async fn test_breaches_below_threshold_do_not_block() {
        let store = MemoryStore::new(Arc::new(MockClock::new(0)));
        let escalator = escalator();

        for expected in 1..3 {
            let outcome = escalator.on_breach(&store, "id").await.unwrap();
            assert_eq!(outcome.violations, expected);
            assert!(!outcome.blocked_now);
        }
        assert_eq!(store.is_blocked("id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_threshold_breach_blocks_for_configured_duration() {
        let store = MemoryStore::new(Arc::new(MockClock::new(0)));
        let escalator = escalator();

        escalator.on_breach(&store, "id").await.unwrap();
        escalator.on_breach(&store, "id").await.unwrap();
        let outcome = escalator.on_breach(&store, "id").await.unwrap();

        assert_eq!(outcome.violations, 3);
        assert!(outcome.blocked_now);
        assert_eq!(store.is_blocked("id").await.unwrap(), Some(900_000));
    }

    #[tokio::test]
    async fn test_violation_window_expiry_resets_the_count() {
        let clock = Arc::new(MockClock::new(0));
        let store = MemoryStore::new(clock.clone());
        let escalator = escalator();

        escalator.on_breach(&store, "id").await.unwrap();
        escalator.on_breach(&store, "id").await.unwrap();

        clock.advance(Duration::from_secs(601));
        let outcome = escalator.on_breach(&store, "id").await.unwrap();
        assert_eq!(outcome.violations, 1);
        assert!(!outcome.blocked_now);
    }

    #[tokio::test]
    async fn test_identities_escalate_independently() {
        let store = MemoryStore::new(Arc::new(MockClock::new(0)));
        let escalator = escalator();

        for _ in 0..3 {
            escalator.on_breach(&store, "a").await.unwrap();
        }
        escalator.on_breach(&store, "b").await.unwrap();

        assert!(store.is_blocked("a").await.unwrap().is_some());
        assert_eq!(store.is_blocked("b").await.unwrap(), None);
    }
}
