//! Route policy resolution.
//!
//! Policies are static: the route table is built once at startup and
//! consulted per request. Handler-level rules override group-level rules,
//! which override the global default; a `skip` at either level admits the
//! route unconditionally.

use crate::error::{GateError, GateResult};
use crate::identity::TrackingStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Effective policy for a route, resolved per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests allowed per window.
    pub limit: u32,

    /// Window length.
    pub window: Duration,

    /// How the subject is tracked.
    pub strategy: TrackingStrategy,
}

/// Partial rule attachable at group or route level.
///
/// Unset fields inherit from the next level down.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouteRule {
    /// Override the request limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Override the window length.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub window: Option<Duration>,

    /// Override the tracking strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<TrackingStrategy>,

    /// Skip rate limiting entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<bool>,
}

impl RouteRule {
    /// Create an empty rule (inherits everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit override.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the window override.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set the strategy override.
    #[must_use]
    pub fn with_strategy(mut self, strategy: TrackingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Mark the rule as skipped.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            skip: Some(true),
            ..Self::default()
        }
    }

    fn validate(&self, context: &str) -> GateResult<()> {
        if self.limit == Some(0) {
            return Err(GateError::Policy(format!(
                "{context}: limit must be greater than 0"
            )));
        }
        if self.window == Some(Duration::ZERO) {
            return Err(GateError::Policy(format!(
                "{context}: window must be greater than 0"
            )));
        }
        Ok(())
    }

    fn apply(&self, policy: &mut RateLimitPolicy) {
        if let Some(limit) = self.limit {
            policy.limit = limit;
        }
        if let Some(window) = self.window {
            policy.window = window;
        }
        if let Some(strategy) = self.strategy {
            policy.strategy = strategy;
        }
    }
}

/// Static route-metadata table.
pub struct RouteTable {
    default_policy: RateLimitPolicy,
    groups: Vec<(String, RouteRule)>,
    routes: HashMap<(String, String), RouteRule>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("default_policy", &self.default_policy)
            .field("group_count", &self.groups.len())
            .field("route_count", &self.routes.len())
            .finish()
    }
}

impl RouteTable {
    /// Start building a route table from a global default policy.
    #[must_use]
    pub fn builder(default_limit: u32, default_window: Duration) -> RouteTableBuilder {
        RouteTableBuilder {
            default_policy: RateLimitPolicy {
                limit: default_limit,
                window: default_window,
                strategy: TrackingStrategy::default(),
            },
            groups: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Resolve the effective policy for a route.
    ///
    /// Returns `None` when a `skip` flag applies and the request must be
    /// admitted without any limiting or store access.
    #[must_use]
    pub fn resolve(&self, method: &str, path: &str) -> Option<RateLimitPolicy> {
        let mut policy = self.default_policy.clone();
        let mut skip = false;

        // Longest matching group prefix wins among groups.
        if let Some((_, rule)) = self
            .groups
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
        {
            rule.apply(&mut policy);
            skip |= rule.skip.unwrap_or(false);
        }

        if let Some(rule) = self
            .routes
            .get(&(method.to_uppercase(), path.to_string()))
        {
            rule.apply(&mut policy);
            skip |= rule.skip.unwrap_or(false);
        }

        if skip {
            None
        } else {
            Some(policy)
        }
    }

    /// The global default policy.
    #[must_use]
    pub fn default_policy(&self) -> &RateLimitPolicy {
        &self.default_policy
    }
}

/// Builder for [`RouteTable`]. Validation happens at [`build`](Self::build);
/// invalid rules fail registration instead of silently disabling limiting.
#[derive(Debug)]
pub struct RouteTableBuilder {
    default_policy: RateLimitPolicy,
    groups: Vec<(String, RouteRule)>,
    routes: HashMap<(String, String), RouteRule>,
}

impl RouteTableBuilder {
    /// Set the default tracking strategy.
    #[must_use]
    pub fn default_strategy(mut self, strategy: TrackingStrategy) -> Self {
        self.default_policy.strategy = strategy;
        self
    }

    /// Attach a rule to every route under a path prefix.
    #[must_use]
    pub fn group(mut self, prefix: impl Into<String>, rule: RouteRule) -> Self {
        self.groups.push((prefix.into(), rule));
        self
    }

    /// Attach a rule to a single method + path.
    #[must_use]
    pub fn route(mut self, method: impl Into<String>, path: impl Into<String>, rule: RouteRule) -> Self {
        self.routes
            .insert((method.into().to_uppercase(), path.into()), rule);
        self
    }

    /// Validate all rules and build the table.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Policy`] for a non-positive limit or window at
    /// any level.
    pub fn build(self) -> GateResult<RouteTable> {
        if self.default_policy.limit == 0 {
            return Err(GateError::Policy(
                "default policy: limit must be greater than 0".to_string(),
            ));
        }
        if self.default_policy.window.is_zero() {
            return Err(GateError::Policy(
                "default policy: window must be greater than 0".to_string(),
            ));
        }

        for (prefix, rule) in &self.groups {
            rule.validate(&format!("group {prefix}"))?;
        }
        for ((method, path), rule) in &self.routes {
            rule.validate(&format!("route {method} {path}"))?;
        }

        Ok(RouteTable {
            default_policy: self.default_policy,
            groups: self.groups,
            routes: self.routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::builder(100, Duration::from_secs(60))
            .group("/admin", RouteRule::new().with_limit(10))
            .group(
                "/admin/reports",
                RouteRule::new().with_limit(2).with_window(Duration::from_secs(300)),
            )
            .route("POST", "/festivals", RouteRule::new().with_limit(5))
            .route("GET", "/health", RouteRule::skipped())
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_policy_applies_when_nothing_matches() {
        let table = table();
        let policy = table.resolve("GET", "/festivals").unwrap();
        assert_eq!(policy.limit, 100);
        assert_eq!(policy.window, Duration::from_secs(60));
        assert_eq!(policy.strategy, TrackingStrategy::Ip);
    }

    #[test]
    fn test_route_overrides_default() {
        let table = table();
        let policy = table.resolve("post", "/festivals").unwrap();
        assert_eq!(policy.limit, 5);
        assert_eq!(policy.window, Duration::from_secs(60)); // inherited
    }

    #[test]
    fn test_group_overrides_default() {
        let table = table();
        let policy = table.resolve("GET", "/admin/users").unwrap();
        assert_eq!(policy.limit, 10);
    }

    #[test]
    fn test_longest_group_prefix_wins() {
        let table = table();
        let policy = table.resolve("GET", "/admin/reports/daily").unwrap();
        assert_eq!(policy.limit, 2);
        assert_eq!(policy.window, Duration::from_secs(300));
    }

    #[test]
    fn test_route_overrides_group() {
        let table = RouteTable::builder(100, Duration::from_secs(60))
            .group("/api", RouteRule::new().with_limit(50))
            .route("GET", "/api/expensive", RouteRule::new().with_limit(3))
            .build()
            .unwrap();

        let policy = table.resolve("GET", "/api/expensive").unwrap();
        assert_eq!(policy.limit, 3);
    }

    #[test]
    fn test_skip_at_route_level() {
        let table = table();
        assert!(table.resolve("GET", "/health").is_none());
    }

    #[test]
    fn test_skip_at_group_level() {
        let table = RouteTable::builder(100, Duration::from_secs(60))
            .group("/internal", RouteRule::skipped())
            .build()
            .unwrap();

        assert!(table.resolve("GET", "/internal/debug").is_none());
        assert!(table.resolve("GET", "/public").is_some());
    }

    #[test]
    fn test_group_skip_is_not_cancelled_by_route_rule() {
        let table = RouteTable::builder(100, Duration::from_secs(60))
            .group("/internal", RouteRule::skipped())
            .route("GET", "/internal/limited", RouteRule::new().with_limit(1))
            .build()
            .unwrap();

        assert!(table.resolve("GET", "/internal/limited").is_none());
    }

    #[test]
    fn test_strategy_override() {
        let table = RouteTable::builder(100, Duration::from_secs(60))
            .default_strategy(TrackingStrategy::Ip)
            .route(
                "POST",
                "/orders",
                RouteRule::new().with_strategy(TrackingStrategy::Composite),
            )
            .build()
            .unwrap();

        let policy = table.resolve("POST", "/orders").unwrap();
        assert_eq!(policy.strategy, TrackingStrategy::Composite);
    }

    #[test]
    fn test_build_rejects_zero_limit() {
        let result = RouteTable::builder(100, Duration::from_secs(60))
            .route("GET", "/bad", RouteRule::new().with_limit(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_zero_window() {
        let result = RouteTable::builder(100, Duration::from_secs(60))
            .group("/bad", RouteRule::new().with_window(Duration::ZERO))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_invalid_default() {
        assert!(RouteTable::builder(0, Duration::from_secs(60)).build().is_err());
        assert!(RouteTable::builder(10, Duration::ZERO).build().is_err());
    }
}
