//! Structured decision events.
//!
//! Every admitted and denied decision produces exactly one `tracing` event,
//! tiered by severity. Emission is synchronous and non-blocking; whatever
//! subscriber the host installs decides where events go.
//!
//! Identities derived from API keys are credentials, so they are redacted
//! before logging: the key portion is reduced to a short prefix plus a
//! SHA-256 digest fragment, which stays stable enough to correlate events
//! without ever writing the key itself.

use crate::identity::TrackingStrategy;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

/// Severity tier for a rate-limit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Low-count breach.
    Info,

    /// Repeated breaches approaching the escalation threshold.
    Warning,

    /// Escalated or actively blocked identity.
    Error,
}

impl Severity {
    /// Tier for a breach given the violation count and escalation threshold.
    #[must_use]
    pub fn for_breach(violations: u64, threshold: u64, blocked: bool) -> Self {
        if blocked {
            Self::Error
        } else if violations.saturating_mul(2) >= threshold {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

/// Redact credential material embedded in an identity.
///
/// Only `api-key:` identities carry a credential; everything else passes
/// through unchanged.
#[must_use]
pub fn redact_identity(identity: &str) -> String {
    let Some(rest) = identity.strip_prefix("api-key:") else {
        return identity.to_string();
    };
    let Some((key, suffix)) = rest.split_once(':') else {
        return identity.to_string();
    };

    format!("api-key:{}:{}", redact_key(key), suffix)
}

fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    let digest_hex = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}...{}", prefix, &digest_hex[..8])
}

/// Emit the event for an admitted request.
pub(crate) fn admitted(
    identity: &str,
    strategy: TrackingStrategy,
    method: &str,
    path: &str,
    limit: u32,
    count: u64,
    remaining: u32,
) {
    debug!(
        identity = %redact_identity(identity),
        strategy = strategy.tag(),
        method,
        path,
        limit,
        count,
        remaining,
        "request admitted"
    );
}

/// Emit the event for a skipped route.
pub(crate) fn skipped(method: &str, path: &str) {
    debug!(method, path, "rate limiting skipped for route");
}

/// Emit the event for an over-limit denial.
#[allow(clippy::too_many_arguments)]
pub(crate) fn over_limit(
    identity: &str,
    strategy: TrackingStrategy,
    method: &str,
    path: &str,
    limit: u32,
    count: u64,
    violations: u64,
    severity: Severity,
) {
    let identity = redact_identity(identity);
    match severity {
        Severity::Info => info!(
            identity = %identity,
            strategy = strategy.tag(),
            method,
            path,
            limit,
            count,
            violations,
            "rate limit exceeded"
        ),
        Severity::Warning => warn!(
            identity = %identity,
            strategy = strategy.tag(),
            method,
            path,
            limit,
            count,
            violations,
            "rate limit exceeded repeatedly"
        ),
        Severity::Error => error!(
            identity = %identity,
            strategy = strategy.tag(),
            method,
            path,
            limit,
            count,
            violations,
            "rate limit abuse escalated to a temporary block"
        ),
    }
}

/// Emit the event for a request denied by an active block.
pub(crate) fn blocked(
    identity: &str,
    strategy: TrackingStrategy,
    method: &str,
    path: &str,
    retry_after_secs: u64,
    blocked_until_ms: u64,
) {
    let blocked_until = chrono::DateTime::from_timestamp_millis(blocked_until_ms as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

    error!(
        identity = %redact_identity(identity),
        strategy = strategy.tag(),
        method,
        path,
        retry_after_secs,
        blocked_until = %blocked_until,
        "request denied, identity is temporarily blocked"
    );
}

/// Emit the event for a decision made while the store was unreachable.
pub(crate) fn degraded(method: &str, path: &str, admitted: bool) {
    debug!(
        method,
        path,
        admitted,
        "store unreachable, applied fallback policy"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_tiers() {
        assert_eq!(Severity::for_breach(1, 5, false), Severity::Info);
        assert_eq!(Severity::for_breach(2, 5, false), Severity::Info);
        assert_eq!(Severity::for_breach(3, 5, false), Severity::Warning);
        assert_eq!(Severity::for_breach(4, 5, false), Severity::Warning);
        assert_eq!(Severity::for_breach(5, 5, true), Severity::Error);
        assert_eq!(Severity::for_breach(0, 5, true), Severity::Error);
    }

    #[test]
    fn test_api_key_identity_is_redacted() {
        let redacted = redact_identity("api-key:sk_live_abcdef123456:GET:/festivals");

        assert!(redacted.starts_with("api-key:sk_l..."));
        assert!(redacted.ends_with(":GET:/festivals"));
        assert!(!redacted.contains("sk_live_abcdef123456"));
    }

    #[test]
    fn test_redaction_is_deterministic() {
        let a = redact_identity("api-key:secret:GET:/");
        let b = redact_identity("api-key:secret:GET:/");
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_credential_identities_pass_through() {
        assert_eq!(
            redact_identity("ip:1.2.3.4:GET:/festivals"),
            "ip:1.2.3.4:GET:/festivals"
        );
        assert_eq!(
            redact_identity("principal:user-42:POST:/orders"),
            "principal:user-42:POST:/orders"
        );
    }

    #[test]
    fn test_short_key_redaction_does_not_panic() {
        let redacted = redact_identity("api-key:ab:GET:/");
        assert!(redacted.contains("ab..."));
    }
}
