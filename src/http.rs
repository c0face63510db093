//! Response-side contract.
//!
//! The gate itself never touches a transport response. This module renders a
//! [`Verdict`] into the header set and denial payload the surrounding HTTP
//! layer writes out, on both admitted and denied paths, so clients can back
//! off correctly.

use crate::guard::{Decision, Verdict};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// Resolved policy limit for the window.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";

/// Remaining quota in the current window.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";

/// Epoch seconds when the current window resets.
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Seconds until the client may retry. Denials only.
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Machine-readable denial code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCode {
    /// The window limit was exceeded.
    RateLimited,

    /// The identity carries an active block from repeated violations.
    Blocked,
}

/// Structured 429 body for denied requests.
///
/// The retry-after value is duplicated from the header for clients that do
/// not read headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenialBody {
    /// Machine-readable code distinguishing the two denial kinds.
    pub error: DenialCode,

    /// Human-readable message.
    pub message: String,

    /// Seconds until the client may retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Verdict {
    /// Header name/value pairs for this verdict. Empty for skipped routes.
    #[must_use]
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);

        if let Some(reset_at_ms) = self.reset_at_ms {
            pairs.push((HEADER_LIMIT, self.limit.to_string()));
            pairs.push((HEADER_REMAINING, self.remaining.to_string()));
            pairs.push((HEADER_RESET, (reset_at_ms / 1000).to_string()));
        }
        if let Some(retry_after) = self.retry_after_secs {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }

        pairs
    }

    /// Write this verdict's headers into a header map.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        if let Some(reset_at_ms) = self.reset_at_ms {
            headers.insert(HEADER_LIMIT, HeaderValue::from(self.limit));
            headers.insert(HEADER_REMAINING, HeaderValue::from(self.remaining));
            headers.insert(HEADER_RESET, HeaderValue::from(reset_at_ms / 1000));
        }
        if let Some(retry_after) = self.retry_after_secs {
            headers.insert(HEADER_RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }

    /// Denial payload for this verdict, `None` when admitted.
    #[must_use]
    pub fn denial_body(&self) -> Option<DenialBody> {
        match self.decision {
            Decision::Admitted => None,
            Decision::DeniedOverLimit => Some(DenialBody {
                error: DenialCode::RateLimited,
                message: "rate limit exceeded, retry later".to_string(),
                retry_after_secs: self.retry_after_secs,
            }),
            Decision::DeniedBlocked => Some(DenialBody {
                error: DenialCode::Blocked,
                message: "temporarily blocked due to repeated rate limit violations".to_string(),
                retry_after_secs: self.retry_after_secs,
            }),
        }
    }

    /// Build the full 429 response for a denied verdict, `None` when
    /// admitted.
    #[must_use]
    pub fn deny_response(&self) -> Option<Response<String>> {
        let body = self.denial_body()?;
        let payload = serde_json::to_string(&body).unwrap_or_default();

        let mut response = Response::new(payload);
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.apply_headers(response.headers_mut());

        Some(response)
    }
}
