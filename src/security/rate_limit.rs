//! Per-key token-bucket rate limiting.
//!
//! # Locking
//! ```text
//! RateLimiterRegistry (DashMap shard locks)   lookup / insert / evict only
//!     └── Bucket (Mutex)                      refill + consume arithmetic
//! ```
//! A request never holds a shard lock while it waits on a bucket lock, so
//! traffic on one key cannot stall another. The reaper holds a shard lock
//! and then a bucket lock; evicted buckets are tombstoned so an `allow`
//! that raced the eviction retries against a fresh bucket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time;

use crate::error::GatewayError;
use crate::http::request::request_id_of;
use crate::observability::metrics;
use crate::routing::RouteClass;
use crate::security::auth::bearer_token;

const NANOS_PER_MINUTE: u128 = 60_000_000_000;

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    capacity: u32,
    last_refill: Instant,
    last_seen: Instant,
    evicted: bool,
}

impl BucketState {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            last_refill: now,
            last_seen: now,
            evicted: false,
        }
    }

    /// Add whole tokens earned since `last_refill`.
    ///
    /// `last_refill` advances only by the time those tokens represent, so
    /// fractions of a token carry over to the next call.
    fn refill(&mut self, capacity: u32, now: Instant) {
        if capacity != self.capacity {
            self.capacity = capacity;
            self.tokens = self.tokens.min(capacity);
        }
        if capacity == 0 || now <= self.last_refill {
            return;
        }

        let elapsed = now.duration_since(self.last_refill).as_nanos();
        let earned = elapsed * u128::from(capacity) / NANOS_PER_MINUTE;
        if earned == 0 {
            return;
        }

        let room = u128::from(capacity - self.tokens);
        if earned >= room {
            self.tokens = capacity;
            self.last_refill = now;
        } else {
            // earned < capacity, so it fits in u32
            self.tokens += earned as u32;
            let spent = earned * NANOS_PER_MINUTE / u128::from(capacity);
            self.last_refill += Duration::from_nanos(spent as u64);
        }
    }

    fn try_consume(&mut self, capacity: u32, now: Instant) -> bool {
        self.refill(capacity, now);
        if now > self.last_seen {
            self.last_seen = now;
        }
        if self.tokens == 0 {
            return false;
        }
        // A full bucket earns nothing, so the refill clock starts here.
        if self.tokens == self.capacity && now > self.last_refill {
            self.last_refill = now;
        }
        self.tokens -= 1;
        true
    }
}

/// Rate-limiting state for one key.
#[derive(Debug)]
pub struct Bucket {
    state: Mutex<BucketState>,
}

impl Bucket {
    fn new(capacity: u32, now: Instant) -> Self {
        Self {
            state: Mutex::new(BucketState::full(capacity, now)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tokens currently held, without refilling.
    pub fn tokens(&self) -> u32 {
        self.lock().tokens
    }
}

/// Owns every bucket. Construct one per gateway and share it by `Arc`.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Arc<Bucket>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token for `key`, creating a full bucket on first sight.
    ///
    /// Returns `false` when the bucket is empty. A zero capacity never admits.
    pub fn allow(&self, key: &str, capacity_per_minute: u32) -> bool {
        self.allow_at(key, capacity_per_minute, Instant::now())
    }

    /// [`Self::allow`] against an explicit clock reading.
    pub fn allow_at(&self, key: &str, capacity_per_minute: u32, now: Instant) -> bool {
        loop {
            let bucket = self.bucket_for(key, capacity_per_minute, now);
            let mut state = bucket.lock();
            if state.evicted {
                continue;
            }
            return state.try_consume(capacity_per_minute, now);
        }
    }

    fn bucket_for(&self, key: &str, capacity: u32, now: Instant) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }
        // entry() takes the shard write lock, so racing creators share one bucket.
        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Bucket::new(capacity, now)));
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &str) -> Option<Arc<Bucket>> {
        self.buckets.get(key).map(|b| Arc::clone(b.value()))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Evict buckets that are full and have been idle for at least `idle_after`.
    /// Returns the number evicted.
    pub fn reap(&self, idle_after: Duration) -> usize {
        self.reap_at(Instant::now(), idle_after)
    }

    pub fn reap_at(&self, now: Instant, idle_after: Duration) -> usize {
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let mut state = bucket.lock();
            let capacity = state.capacity;
            state.refill(capacity, now);
            let idle = now.saturating_duration_since(state.last_seen) >= idle_after;
            if idle && state.tokens >= state.capacity {
                state.evicted = true;
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }
}

/// Periodic eviction of idle, full buckets.
pub struct BucketReaper {
    registry: Arc<RateLimiterRegistry>,
    interval: Duration,
    idle_after: Duration,
}

impl BucketReaper {
    /// A bucket idle for `idle_multiple` scan intervals is eligible.
    pub fn new(registry: Arc<RateLimiterRegistry>, interval: Duration, idle_multiple: u32) -> Self {
        Self {
            registry,
            interval,
            idle_after: interval * idle_multiple,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            idle_secs = self.idle_after.as_secs(),
            "Bucket reaper starting"
        );

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; nothing is idle yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.registry.reap(self.idle_after);
                    let remaining = self.registry.len();
                    metrics::record_buckets(remaining, evicted);
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining, "Evicted idle rate-limit buckets");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Bucket reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Identity a bucket is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKey {
    /// Bearer token presented by the caller.
    Token(String),
    /// Caller's network address when no bearer token is present.
    Address(String),
}

impl ClientKey {
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        match bearer_token(headers) {
            Some(token) => ClientKey::Token(token.to_string()),
            None => ClientKey::Address(
                peer.map(|addr| addr.ip().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        }
    }

    /// Registry key: one bucket per client per route class.
    pub fn scoped(&self, route: RouteClass) -> String {
        match self {
            ClientKey::Token(token) => format!("{}:token:{}", route.name(), token),
            ClientKey::Address(addr) => format!("{}:addr:{}", route.name(), addr),
        }
    }

    /// Loggable description. Tokens are never printed.
    pub fn describe(&self) -> String {
        match self {
            ClientKey::Token(_) => "bearer".to_string(),
            ClientKey::Address(addr) => addr.clone(),
        }
    }
}

/// Per-route limiter state handed to [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RouteLimit {
    pub registry: Arc<RateLimiterRegistry>,
    pub route: RouteClass,
    /// `None` leaves the route unlimited.
    pub capacity: Option<u32>,
}

/// Seconds until an empty bucket earns one token.
fn retry_after_secs(capacity: u32) -> u64 {
    let capacity = u64::from(capacity.max(1));
    (60 + capacity - 1) / capacity
}

pub async fn rate_limit_middleware(
    State(limit): State<RouteLimit>,
    request: Request,
    next: Next,
) -> Response {
    let Some(capacity) = limit.capacity else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientKey::from_parts(request.headers(), peer);

    if limit.registry.allow(&client.scoped(limit.route), capacity) {
        return next.run(request).await;
    }

    let request_id = request_id_of(&request);
    tracing::warn!(
        request_id = %request_id,
        route = limit.route.name(),
        client = %client.describe(),
        capacity,
        "Rate limit exceeded"
    );
    metrics::record_rate_limited(limit.route.name());
    GatewayError::RateLimited {
        retry_after_secs: retry_after_secs(capacity),
    }
    .into_response_for(&request_id)
}
