//! Outbound call mediation: per-platform rate limiting plus bounded retry.
//!
//! HTTP adapters own a [`Throttle`] and pass every request they send through
//! it, so each request takes one token and a retry repeats only the request
//! that failed. Adapters without HTTP traffic are wrapped in a
//! [`ThrottledProvider`] instead. Platforms never share capacity. Waiting on
//! the limiter or on a backoff sleep is the only place a run suspends.

use crate::api::Provider;
use crate::error::AdapterError;
use crate::models::{LikedSet, Playlist, Track};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use rand::Rng;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Blocks the caller until the platform has capacity for one more request.
#[async_trait]
pub trait Limiter: Send + Sync {
    async fn acquire(&self);
}

/// Never waits. Used by tests and by the file adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl Limiter for Unlimited {
    async fn acquire(&self) {}
}

/// Token bucket refilled at a fixed number of requests per second.
pub struct TokenBucket {
    inner: DirectRateLimiter,
}

impl TokenBucket {
    pub fn per_second(requests: u32) -> Self {
        let n = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: RateLimiter::direct(Quota::per_second(n)),
        }
    }
}

#[async_trait]
impl Limiter for TokenBucket {
    async fn acquire(&self) {
        self.inner.until_ready().await;
    }
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`, plus up to `jitter`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exp = self.base_delay.saturating_mul(1u32 << shift);
        exp.min(self.max_delay) + self.jitter_sample()
    }

    /// A platform's retry-after hint replaces the computed backoff.
    pub fn delay_for(&self, err: &AdapterError, attempt: u32) -> Duration {
        match err {
            AdapterError::RateLimited {
                retry_after: Some(hint),
            } => (*hint).min(self.max_delay),
            _ => self.backoff(attempt),
        }
    }

    fn jitter_sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Each attempt first waits on `limiter`.
    pub async fn run<T, F, Fut>(
        &self,
        limiter: &dyn Limiter,
        platform: &str,
        op: &str,
        mut f: F,
    ) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            limiter.acquire().await;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let wait = self.delay_for(&e, attempt);
                    log::warn!(
                        "{} {} attempt {} failed: {}. Retrying in {:?}...",
                        platform,
                        op,
                        attempt,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        log::error!("{} {}: giving up after {} attempts: {}", platform, op, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// One platform's limiter and retry policy, shared by everything its adapter sends.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<dyn Limiter>,
    retry: RetryPolicy,
}

impl Throttle {
    pub fn new(limiter: Arc<dyn Limiter>, retry: RetryPolicy) -> Self {
        Self { limiter, retry }
    }

    /// No waiting, single attempt.
    pub fn unlimited() -> Self {
        Self::new(Arc::new(Unlimited), RetryPolicy::no_retry())
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn run<T, F, Fut>(&self, platform: &str, op: &str, f: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        self.retry.run(self.limiter.as_ref(), platform, op, f).await
    }
}

/// Provider decorator routing every call through a limiter and a retry
/// policy. For adapters that issue no HTTP requests of their own (the
/// export-file and in-memory adapters); one operation is one token.
pub struct ThrottledProvider {
    inner: Arc<dyn Provider>,
    throttle: Throttle,
}

impl ThrottledProvider {
    pub fn new(inner: Arc<dyn Provider>, limiter: Arc<dyn Limiter>, retry: RetryPolicy) -> Self {
        Self {
            inner,
            throttle: Throttle::new(limiter, retry),
        }
    }

    async fn call<T, F, Fut>(&self, op: &str, f: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        self.throttle.run(self.inner.name(), op, f).await
    }
}

#[async_trait]
impl Provider for ThrottledProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn country_code(&self) -> Option<&str> {
        self.inner.country_code()
    }

    async fn list_playlists(&self, owner: Option<&str>) -> Result<Vec<Playlist>, AdapterError> {
        self.call("list_playlists", || self.inner.list_playlists(owner)).await
    }

    async fn get_or_create_playlist(&self, name: &str) -> Result<Playlist, AdapterError> {
        self.call("get_or_create_playlist", || self.inner.get_or_create_playlist(name))
            .await
    }

    async fn list_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>, AdapterError> {
        self.call("list_tracks", || self.inner.list_tracks(playlist)).await
    }

    async fn add_tracks(&self, playlist: &Playlist, tracks: &[Track]) -> Result<(), AdapterError> {
        self.call("add_tracks", || self.inner.add_tracks(playlist, tracks)).await
    }

    async fn search(&self, track: &Track) -> Result<Vec<Track>, AdapterError> {
        self.call("search", || self.inner.search(track)).await
    }

    async fn get_likes(&self) -> Result<LikedSet, AdapterError> {
        self.call("get_likes", || self.inner.get_likes()).await
    }

    async fn add_like(&self, track: &Track) -> Result<(), AdapterError> {
        self.call("add_like", || self.inner.add_like(track)).await
    }
}
