//! Redis-backed counter store.
//!
//! Shares rate-limiting state across all serving processes. Uses
//! `redis::aio::ConnectionManager` so connections are established once at
//! startup and reused (and re-established) across requests.
//!
//! ## Atomicity
//!
//! `increment` and `record_violation` run a small Lua script so the
//! increment and the conditional expiry land in one round trip; two
//! concurrent requests can never both reset the same window. Block flags are
//! plain `SET PX` values (last write wins) read back via `PTTL`.
//!
//! ## Failure posture
//!
//! This store reports errors as [`StoreError`] and nothing else; outage
//! bookkeeping, timeouts, and degradation policy belong to
//! [`FailoverStore`](super::FailoverStore).

use super::{CounterStore, WindowCounter};
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::time::Duration;

/// Increment a counter and bind its TTL in one atomic step.
///
/// Returns `{count, pttl_ms}`. The second expiry branch repairs a counter
/// that lost its TTL (e.g. manual operator fiddling) instead of letting it
/// count forever.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Redis-backed implementation of [`CounterStore`].
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
    increment_script: Script,
    clock: SystemClock,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection
    /// fails.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> StoreResult<Self> {
        let client = Client::open(url).map_err(map_redis_err)?;
        let connection = ConnectionManager::new(client).await.map_err(map_redis_err)?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
            increment_script: Script::new(INCREMENT_SCRIPT),
            clock: SystemClock,
        })
    }

    fn window_key(&self, key: &str) -> String {
        format!("{}:win:{}", self.key_prefix, key)
    }

    fn violation_key(&self, key: &str) -> String {
        format!("{}:vio:{}", self.key_prefix, key)
    }

    fn block_key(&self, key: &str) -> String {
        format!("{}:blk:{}", self.key_prefix, key)
    }

    async fn scripted_increment(&self, full_key: &str, window: Duration) -> StoreResult<(u64, u64)> {
        let mut conn = self.connection.clone();
        let window_ms = window.as_millis() as u64;

        let (count, ttl_ms): (u64, i64) = self
            .increment_script
            .key(full_key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok((count, ttl_ms.max(0) as u64))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<WindowCounter> {
        let (count, ttl_ms) = self.scripted_increment(&self.window_key(key), window).await?;
        Ok(WindowCounter {
            count,
            window_expires_at_ms: self.clock.now_ms() + ttl_ms,
        })
    }

    async fn is_blocked(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut conn = self.connection.clone();
        let ttl_ms: i64 = conn
            .pttl(self.block_key(key))
            .await
            .map_err(map_redis_err)?;

        // PTTL returns -2 for a missing key and -1 for a key without expiry.
        Ok((ttl_ms > 0).then_some(ttl_ms as u64))
    }

    async fn block(&self, key: &str, duration: Duration) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let blocked_until_ms = self.clock.now_ms() + duration.as_millis() as u64;
        let _: () = conn
            .pset_ex(
                self.block_key(key),
                blocked_until_ms,
                duration.as_millis() as u64,
            )
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn unblock(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(self.block_key(key))
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn record_violation(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let (count, _) = self
            .scripted_increment(&self.violation_key(key), window)
            .await?;
        Ok(count)
    }
}

fn map_redis_err(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Protocol(err.to_string())
    }
}
