//! # Gatewarden
//!
//! A distributed rate-limiting and abuse-mitigation gate that sits in front
//! of every inbound API request. It makes admit/deny decisions under
//! concurrent traffic against a shared TTL-aware counter store, and keeps
//! serving even when that store is down.
//!
//! ## Features
//!
//! - Fixed-window counting with atomic, single-round-trip increments
//! - Shared state via Redis, in-process store for single instances
//! - Tracking by IP, principal, API key, or a composite of both
//! - Per-route and per-group policy overrides with skip flags
//! - Escalation of repeated breaches into temporary hard blocks
//! - Configurable fail-open / fail-closed / local degradation when the
//!   store is unreachable
//! - Severity-tiered structured events with credential redaction
//!
//! ## Usage
//!
//! ```ignore
//! use gatewarden::{Gate, GateConfig, RequestMeta, RouteRule, RouteTable};
//! use std::time::Duration;
//!
//! let config = GateConfig::load("gatewarden.toml")?.apply_env();
//! let routes = RouteTable::builder(100, Duration::from_secs(60))
//!     .route("POST", "/festivals", RouteRule::new().with_limit(5))
//!     .route("GET", "/health", RouteRule::skipped())
//!     .build()?;
//!
//! let gate = Gate::new(config, routes).await?;
//!
//! // Per request:
//! let meta = RequestMeta::new("POST", "/festivals").with_remote_addr("1.2.3.4");
//! let verdict = gate.check(&meta).await;
//! if !verdict.admitted() {
//!     return Ok(verdict.deny_response().unwrap());
//! }
//! // ... run the handler, then verdict.apply_headers(response.headers_mut());
//! ```
//!
//! The gate returns a [`Verdict`]; writing status and headers is the
//! caller's job, which keeps the decision engine free of transport details
//! and easy to test.

pub mod clock;
pub mod config;
pub mod error;
pub mod escalation;
pub mod guard;
pub mod http;
pub mod identity;
pub mod observe;
pub mod policy;
pub mod store;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::{EscalationConfig, FallbackMode, GateConfig, StoreBackend};
pub use error::{GateError, GateResult, StoreError, StoreResult};
pub use escalation::{BreachOutcome, Escalator};
pub use guard::{Decision, Gate, GateBuilder, GateStats, Verdict};
pub use crate::http::{DenialBody, DenialCode};
pub use identity::{RequestMeta, TrackingStrategy};
pub use policy::{RateLimitPolicy, RouteRule, RouteTable};
pub use store::{CounterStore, FailoverStore, MemoryStore, RedisStore, WindowCounter};
