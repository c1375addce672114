//! Idempotency cache for mutating requests
//!
//! A request carrying an idempotency key is identified by a fingerprint:
//! SHA-256 over method, path, raw body and key. The first successful (2xx)
//! response for a fingerprint is remembered and replayed verbatim for
//! retries until it expires. Failed responses are never cached, so a
//! failed call may be retried for real.
//!
//! The body is part of the fingerprint. Reusing a key with a different
//! body is therefore a new request, not a conflict.

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Request header carrying the client token
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Longest accepted key
pub const MAX_KEY_LENGTH: usize = 255;

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync + 'static {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move forward by `by`
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Cache retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Entry lifetime (seconds)
    pub ttl_secs: u64,

    /// Entry count above which stale entries are purged
    pub cleanup_threshold: usize,

    /// Age after which an entry is purged during cleanup (seconds)
    pub stale_after_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60, // 24 hours
            cleanup_threshold: 10_000,
            stale_after_secs: 60 * 60, // 1 hour
        }
    }
}

impl IdempotencyConfig {
    /// Entry lifetime
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    /// Cleanup age
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(Error::Config("idempotency.ttl_secs must be greater than zero".into()));
        }
        if self.stale_after_secs > self.ttl_secs {
            return Err(Error::Config(
                "idempotency.stale_after_secs must not exceed ttl_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Check a client-supplied key: non-empty, bounded, visible ASCII only
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Idempotency key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Idempotency key longer than {} characters",
            MAX_KEY_LENGTH
        )));
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(Error::InvalidInput(
            "Idempotency key must be visible ASCII".into(),
        ));
    }
    Ok(())
}

/// Lowercase hex SHA-256 of method, path, body and key, in that order
pub fn fingerprint(method: &str, path: &str, body: &[u8], key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(body);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// A response as it will be replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// HTTP status
    pub status_code: u16,

    /// Headers to replay (name, value)
    pub headers: Vec<(String, String)>,

    /// Raw body
    pub body: Bytes,

    /// When the cache accepted it
    pub created_at: DateTime<Utc>,
}

impl CachedResponse {
    /// New response; `created_at` is restamped by the cache on store
    pub fn new(status_code: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status_code,
            headers,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    /// 2xx?
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Result of [`IdempotencyCache::execute`]
#[derive(Debug, Clone)]
pub struct Execution {
    /// Response to send
    pub response: CachedResponse,

    /// True when served from the cache without running the handler
    pub replayed: bool,
}

/// Shared response cache keyed by fingerprint
pub struct IdempotencyCache<C: Clock = SystemClock> {
    entries: RwLock<HashMap<String, CachedResponse>>,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    config: IdempotencyConfig,
    clock: C,
    metrics: Option<Metrics>,
}

impl<C: Clock> std::fmt::Debug for IdempotencyCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCache")
            .field("entries", &self.entries.read().len())
            .field("in_flight", &self.in_flight.len())
            .field("config", &self.config)
            .finish()
    }
}

impl IdempotencyCache<SystemClock> {
    /// Cache on the wall clock
    pub fn new(config: IdempotencyConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> IdempotencyCache<C> {
    /// Cache on an explicit clock
    pub fn with_clock(config: IdempotencyConfig, clock: C) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: DashMap::new(),
            config,
            clock,
            metrics: None,
        }
    }

    /// Count hits and misses on `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Live cached response for `fingerprint`, if any.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn lookup(&self, fingerprint: &str) -> Option<CachedResponse> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(fingerprint) {
                None => return None,
                Some(entry) if now - entry.created_at <= self.config.ttl() => {
                    return Some(entry.clone())
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Re-check: a fresh response may have replaced it meanwhile
        if let Some(entry) = entries.get(fingerprint) {
            if now - entry.created_at > self.config.ttl() {
                entries.remove(fingerprint);
                tracing::debug!(fingerprint, "Expired idempotency entry removed");
            } else {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Remember `response` unless it is a failure. Returns whether it was stored.
    pub fn store(&self, fingerprint: &str, mut response: CachedResponse) -> bool {
        if !response.is_success() {
            return false;
        }

        let now = self.clock.now();
        response.created_at = now;

        let mut entries = self.entries.write();
        entries.insert(fingerprint.to_string(), response);

        if entries.len() > self.config.cleanup_threshold {
            let stale_after = self.config.stale_after();
            let before = entries.len();
            entries.retain(|_, entry| now - entry.created_at <= stale_after);
            tracing::info!(
                removed = before - entries.len(),
                remaining = entries.len(),
                "Idempotency cache cleanup"
            );
        }
        true
    }

    /// Replay the cached response for `fingerprint`, or run `handler` and
    /// cache its response.
    ///
    /// Concurrent calls with the same fingerprint run one at a time, so a
    /// duplicate that races the first call replays its response.
    pub async fn execute<F, Fut>(&self, fingerprint: &str, handler: F) -> Execution
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedResponse>,
    {
        let flight = InFlight::join(&self.in_flight, fingerprint);
        let _turn = flight.gate.lock().await;

        if let Some(response) = self.lookup(fingerprint) {
            tracing::debug!(fingerprint, "Idempotency cache hit");
            if let Some(metrics) = &self.metrics {
                metrics.record_idempotency_hit();
            }
            return Execution {
                response,
                replayed: true,
            };
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_idempotency_miss();
        }
        let response = handler().await;
        if self.store(fingerprint, response.clone()) {
            tracing::debug!(fingerprint, status = response.status_code, "Response cached");
        }
        Execution {
            response,
            replayed: false,
        }
    }

    /// Fingerprints with a call running or queued
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of cached responses
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.created_at <= ttl);
        before - entries.len()
    }
}

/// Membership in the per-fingerprint gate for one `execute` call.
///
/// Dropping it, including when the caller's future is cancelled, removes
/// the gate once no other call shares it.
struct InFlight<'a> {
    table: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    fingerprint: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn join(table: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>, fingerprint: &'a str) -> Self {
        let gate = table
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Self {
            table,
            fingerprint,
            gate,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // The table's handle plus ours
        self.table.remove_if(self.fingerprint, |_, gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2
        });
    }
}
