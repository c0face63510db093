//! Tracking key resolution.
//!
//! Every request is attributed to a tracking identity of the form
//! `{strategy}:{subject}:{METHOD}:{path}`. The method/path suffix scopes
//! limits per endpoint rather than globally per subject. Resolution is pure:
//! the same request metadata and strategy always produce the same identity,
//! and strategies that cannot find their preferred subject fall back to the
//! client IP instead of failing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the rate-limited subject is derived from a request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TrackingStrategy {
    /// Track by client IP address.
    #[default]
    Ip,

    /// Track by authenticated principal, falling back to IP.
    Principal,

    /// Track by API key, falling back to IP.
    ApiKey,

    /// Track by principal (or `anonymous`) combined with IP, so one user is
    /// still throttled while rotating source addresses.
    Composite,
}

impl TrackingStrategy {
    /// Stable tag used as the identity prefix and in log events.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Principal => "principal",
            Self::ApiKey => "api-key",
            Self::Composite => "composite",
        }
    }
}

/// Request metadata the resolver works from.
///
/// The embedding HTTP layer builds one of these per request; header names
/// are lowercased on insertion so lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    method: String,
    path: String,
    remote_addr: Option<String>,
    headers: HashMap<String, String>,
    principal: Option<String>,
    api_key: Option<String>,
}

impl RequestMeta {
    /// Create request metadata for a method and path.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the connection's remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_lowercase(), value.into());
        self
    }

    /// Set the authenticated principal id.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Set the API key attached by a prior authentication step.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Request method (uppercased).
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get a header value (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Authenticated principal id, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// API key from a prior authentication step, if any.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Resolve the client IP.
    ///
    /// Forwarded-for headers win over the raw connection address because
    /// deployments behind a reverse proxy or load balancer rewrite the
    /// direct connection address. Order: first hop of `x-forwarded-for`,
    /// then `x-real-ip`, then the remote address, then `"unknown"`.
    #[must_use]
    pub fn client_ip(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }

        if let Some(real_ip) = self.header("x-real-ip") {
            let trimmed = real_ip.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }

        if let Some(addr) = self.remote_addr.as_deref() {
            return addr.to_string();
        }

        "unknown".to_string()
    }
}

/// Resolve the tracking identity for a request under a strategy.
#[must_use]
pub fn resolve(meta: &RequestMeta, strategy: TrackingStrategy) -> String {
    let (tag, subject) = match strategy {
        TrackingStrategy::Ip => ("ip", meta.client_ip()),
        TrackingStrategy::Principal => match meta.principal() {
            Some(principal) => ("principal", principal.to_string()),
            None => ("ip", meta.client_ip()),
        },
        TrackingStrategy::ApiKey => {
            if let Some(key) = meta.api_key() {
                ("api-key", key.to_string())
            } else if let Some(key) = meta.header("x-api-key") {
                ("api-key", key.to_string())
            } else {
                ("ip", meta.client_ip())
            }
        },
        TrackingStrategy::Composite => {
            let principal = meta.principal().unwrap_or("anonymous");
            ("composite", format!("{}@{}", principal, meta.client_ip()))
        },
    };

    format!("{}:{}:{}:{}", tag, subject, meta.method(), meta.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_prefers_forwarded_for_first_hop() {
        let meta = RequestMeta::new("GET", "/festivals")
            .with_remote_addr("10.0.0.1")
            .with_header("X-Real-IP", "9.9.9.9")
            .with_header("X-Forwarded-For", " 1.2.3.4 , 5.6.7.8");

        assert_eq!(meta.client_ip(), "1.2.3.4");
        assert_eq!(
            resolve(&meta, TrackingStrategy::Ip),
            "ip:1.2.3.4:GET:/festivals"
        );
    }

    #[test]
    fn test_ip_falls_back_to_real_ip_then_remote_addr() {
        let meta = RequestMeta::new("GET", "/")
            .with_remote_addr("10.0.0.1")
            .with_header("x-real-ip", "9.9.9.9");
        assert_eq!(meta.client_ip(), "9.9.9.9");

        let meta = RequestMeta::new("GET", "/").with_remote_addr("10.0.0.1");
        assert_eq!(meta.client_ip(), "10.0.0.1");

        let meta = RequestMeta::new("GET", "/");
        assert_eq!(meta.client_ip(), "unknown");
    }

    #[test]
    fn test_empty_forwarded_entry_is_skipped() {
        let meta = RequestMeta::new("GET", "/")
            .with_remote_addr("10.0.0.1")
            .with_header("x-forwarded-for", "  ");
        assert_eq!(meta.client_ip(), "10.0.0.1");
    }

    #[test]
    fn test_principal_strategy_falls_back_to_ip() {
        let authed = RequestMeta::new("post", "/orders")
            .with_remote_addr("1.2.3.4")
            .with_principal("user-42");
        assert_eq!(
            resolve(&authed, TrackingStrategy::Principal),
            "principal:user-42:POST:/orders"
        );

        let anon = RequestMeta::new("post", "/orders").with_remote_addr("1.2.3.4");
        assert_eq!(
            resolve(&anon, TrackingStrategy::Principal),
            "ip:1.2.3.4:POST:/orders"
        );
    }

    #[test]
    fn test_api_key_strategy_order() {
        let meta = RequestMeta::new("GET", "/")
            .with_api_key("attached-key")
            .with_header("x-api-key", "header-key");
        assert_eq!(
            resolve(&meta, TrackingStrategy::ApiKey),
            "api-key:attached-key:GET:/"
        );

        let meta = RequestMeta::new("GET", "/").with_header("X-Api-Key", "header-key");
        assert_eq!(
            resolve(&meta, TrackingStrategy::ApiKey),
            "api-key:header-key:GET:/"
        );

        let meta = RequestMeta::new("GET", "/").with_remote_addr("1.2.3.4");
        assert_eq!(resolve(&meta, TrackingStrategy::ApiKey), "ip:1.2.3.4:GET:/");
    }

    #[test]
    fn test_composite_strategy_differentiates_anonymous_by_ip() {
        let authed = RequestMeta::new("GET", "/feed")
            .with_remote_addr("1.2.3.4")
            .with_principal("alice");
        assert_eq!(
            resolve(&authed, TrackingStrategy::Composite),
            "composite:alice@1.2.3.4:GET:/feed"
        );

        let anon = RequestMeta::new("GET", "/feed").with_remote_addr("5.6.7.8");
        assert_eq!(
            resolve(&anon, TrackingStrategy::Composite),
            "composite:anonymous@5.6.7.8:GET:/feed"
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let meta = RequestMeta::new("GET", "/festivals").with_remote_addr("1.2.3.4");
        let a = resolve(&meta, TrackingStrategy::Composite);
        let b = resolve(&meta, TrackingStrategy::Composite);
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_scopes_per_endpoint() {
        let list = RequestMeta::new("GET", "/festivals").with_remote_addr("1.2.3.4");
        let create = RequestMeta::new("POST", "/festivals").with_remote_addr("1.2.3.4");
        assert_ne!(
            resolve(&list, TrackingStrategy::Ip),
            resolve(&create, TrackingStrategy::Ip)
        );
    }
}
