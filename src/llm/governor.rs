//! Shared rate governor for the inference service
//!
//! Bounds aggregate traffic to two independent budgets: requests per minute and
//! tokens per minute. Each budget is a continuously refilled token bucket whose
//! capacity is the configured burst. One governor instance is shared by every
//! gateway in the process, so concurrent runs draw from the same budgets.
//!
//! # Example
//!
//! ```rust,ignore
//! use lekha::llm::governor::{AdmissionControl, GovernorConfig, RateGovernor};
//!
//! let governor = RateGovernor::new(GovernorConfig::default());
//! let permit = governor.acquire(1_200).await?;
//! // ... perform the call ...
//! governor.release(permit, 950);
//! ```

use crate::types::AppError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the rate governor
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Request budget refill rate (default: 30)
    pub requests_per_minute: u32,
    /// Token budget refill rate (default: 14000)
    pub tokens_per_minute: u32,
    /// Request bucket capacity (default: requests_per_minute)
    pub burst_requests: u32,
    /// Token bucket capacity (default: tokens_per_minute)
    pub burst_tokens: u32,
    /// Upper bound on how long `acquire` may wait; `None` waits indefinitely
    pub acquire_timeout: Option<Duration>,
    /// Largest correction a single `release` may apply (default: 2000)
    pub max_drift_tokens: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            tokens_per_minute: 14_000,
            burst_requests: 30,
            burst_tokens: 14_000,
            acquire_timeout: Some(Duration::from_secs(120)),
            max_drift_tokens: 2_000,
        }
    }
}

impl GovernorConfig {
    pub fn with_requests_per_minute(mut self, rpm: u32, burst: u32) -> Self {
        self.requests_per_minute = rpm;
        self.burst_requests = burst;
        self
    }

    pub fn with_tokens_per_minute(mut self, tpm: u32, burst: u32) -> Self {
        self.tokens_per_minute = tpm;
        self.burst_tokens = burst;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_max_drift(mut self, tokens: u32) -> Self {
        self.max_drift_tokens = tokens;
        self
    }

    /// Lift zero rates and bursts to 1. A zero budget would never admit anyone.
    fn normalized(mut self) -> Self {
        for (name, value) in [
            ("requests_per_minute", &mut self.requests_per_minute),
            ("tokens_per_minute", &mut self.tokens_per_minute),
            ("burst_requests", &mut self.burst_requests),
            ("burst_tokens", &mut self.burst_tokens),
        ] {
            if *value == 0 {
                tracing::warn!(field = name, "Zero rate budget, using 1");
                *value = 1;
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GovernorError {
    #[error("Timed out after {waited:?} waiting for rate budget")]
    Timeout { waited: Duration },
}

impl From<GovernorError> for AppError {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::Timeout { waited } => AppError::RateTimeout {
                waited_ms: waited.as_millis() as u64,
            },
        }
    }
}

/// Proof of admission. Hand it back to `release` with the actual token count.
#[derive(Debug)]
pub struct RatePermit {
    id: u64,
    estimated_tokens: u32,
    waited: Duration,
}

impl RatePermit {
    /// Token cost debited at admission (after clamping to capacity)
    pub fn estimated_tokens(&self) -> u32 {
        self.estimated_tokens
    }

    /// How long the caller was suspended before admission
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Admission control seam. The gateway only depends on this trait, so tests can
/// inject a deterministic fake.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Suspend until both budgets have headroom, then debit them atomically.
    async fn acquire(&self, estimated_tokens: u32) -> Result<RatePermit, GovernorError>;

    /// Reconcile the estimate against actual consumption.
    fn release(&self, permit: RatePermit, actual_tokens: u32);
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    level: f64,
    refill_per_sec: f64,
}

impl Bucket {
    fn new(capacity: u32, per_minute: u32) -> Self {
        Self {
            capacity: capacity as f64,
            level: capacity as f64,
            refill_per_sec: per_minute as f64 / 60.0,
        }
    }

    fn refill(&mut self, elapsed: Duration) {
        self.level = (self.level + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
    }

    fn wait_for(&self, amount: f64) -> Duration {
        let deficit = amount - self.level;
        if deficit <= 0.0 {
            return Duration::ZERO;
        }
        if self.refill_per_sec <= 0.0 {
            return WINDOW;
        }
        // Round up to whole milliseconds so a woken caller always finds the headroom
        let millis = (deficit / self.refill_per_sec * 1000.0).ceil().max(1.0);
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug)]
struct Buckets {
    requests: Bucket,
    tokens: Bucket,
    last_refill: Instant,
}

impl Buckets {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.requests.refill(elapsed);
        self.tokens.refill(elapsed);
        self.last_refill = now;
    }
}

/// Accounting record kept inside the governor only.
#[derive(Debug, Clone, Copy)]
struct RateToken {
    requests: u32,
    tokens: i64,
    at: Instant,
}

/// Point-in-time view of governor accounting.
#[derive(Debug, Clone, Default)]
pub struct GovernorStats {
    pub admitted: u64,
    pub total_wait: Duration,
    pub max_wait: Duration,
    pub requests_available: f64,
    pub tokens_available: f64,
    pub requests_last_minute: u32,
    pub tokens_last_minute: i64,
}

/// Dual token-bucket rate governor
pub struct RateGovernor {
    config: GovernorConfig,
    /// Serializes acquirers so two callers never spend the same headroom
    admission: tokio::sync::Mutex<()>,
    buckets: Mutex<Buckets>,
    ledger: Mutex<VecDeque<RateToken>>,
    next_permit: AtomicU64,
    admitted: AtomicU64,
    total_wait_ms: AtomicU64,
    max_wait_ms: AtomicU64,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let config = config.normalized();
        let buckets = Buckets {
            requests: Bucket::new(config.burst_requests, config.requests_per_minute),
            tokens: Bucket::new(config.burst_tokens, config.tokens_per_minute),
            last_refill: Instant::now(),
        };
        Self {
            config,
            admission: tokio::sync::Mutex::new(()),
            buckets: Mutex::new(buckets),
            ledger: Mutex::new(VecDeque::new()),
            next_permit: AtomicU64::new(1),
            admitted: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
            max_wait_ms: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn stats(&self) -> GovernorStats {
        let (requests_available, tokens_available) = {
            let mut buckets = self.buckets.lock();
            buckets.refill(Instant::now());
            (buckets.requests.level, buckets.tokens.level)
        };
        let (requests_last_minute, tokens_last_minute) = {
            let mut ledger = self.ledger.lock();
            Self::prune(&mut ledger, Instant::now());
            ledger.iter().fold((0u32, 0i64), |(r, t), entry| {
                (r + entry.requests, t + entry.tokens)
            })
        };
        GovernorStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            total_wait: Duration::from_millis(self.total_wait_ms.load(Ordering::Relaxed)),
            max_wait: Duration::from_millis(self.max_wait_ms.load(Ordering::Relaxed)),
            requests_available,
            tokens_available,
            requests_last_minute,
            tokens_last_minute,
        }
    }

    fn prune(ledger: &mut VecDeque<RateToken>, now: Instant) {
        while let Some(front) = ledger.front() {
            if now.saturating_duration_since(front.at) > WINDOW {
                ledger.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&self, requests: u32, tokens: i64) {
        let now = Instant::now();
        let mut ledger = self.ledger.lock();
        Self::prune(&mut ledger, now);
        ledger.push_back(RateToken {
            requests,
            tokens,
            at: now,
        });
    }

    async fn admit(&self, estimated_tokens: u32) -> RatePermit {
        let started = Instant::now();
        let capacity = self.config.burst_tokens;
        let cost = if estimated_tokens > capacity {
            tracing::warn!(
                estimated_tokens,
                capacity,
                "Estimated tokens exceed bucket capacity, clamping"
            );
            capacity
        } else {
            estimated_tokens
        };

        let _admission = self.admission.lock().await;
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                buckets.refill(Instant::now());
                let wait = buckets
                    .requests
                    .wait_for(1.0)
                    .max(buckets.tokens.wait_for(cost as f64));
                if wait.is_zero() {
                    buckets.requests.level -= 1.0;
                    buckets.tokens.level -= cost as f64;
                    None
                } else {
                    Some(wait)
                }
            };

            match wait {
                Some(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis() as u64, cost, "Waiting for rate budget");
                    tokio::time::sleep(wait).await;
                }
                None => break,
            }
        }

        self.record(1, cost as i64);
        let waited = started.elapsed();
        let waited_ms = waited.as_millis() as u64;
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms.fetch_add(waited_ms, Ordering::Relaxed);
        self.max_wait_ms.fetch_max(waited_ms, Ordering::Relaxed);

        RatePermit {
            id: self.next_permit.fetch_add(1, Ordering::Relaxed),
            estimated_tokens: cost,
            waited,
        }
    }
}

#[async_trait]
impl AdmissionControl for RateGovernor {
    async fn acquire(&self, estimated_tokens: u32) -> Result<RatePermit, GovernorError> {
        let started = Instant::now();
        match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.admit(estimated_tokens))
                .await
                .map_err(|_| GovernorError::Timeout {
                    waited: started.elapsed(),
                }),
            None => Ok(self.admit(estimated_tokens).await),
        }
    }

    fn release(&self, permit: RatePermit, actual_tokens: u32) {
        let drift = self.config.max_drift_tokens as i64;
        let raw = actual_tokens as i64 - permit.estimated_tokens as i64;
        let correction = raw.clamp(-drift, drift);
        if correction != raw {
            tracing::debug!(
                permit = permit.id,
                raw,
                correction,
                "Clamped token correction to drift bound"
            );
        }
        if correction == 0 {
            return;
        }

        {
            let mut buckets = self.buckets.lock();
            buckets.refill(Instant::now());
            let tokens = &mut buckets.tokens;
            tokens.level = (tokens.level - correction as f64).clamp(-(drift as f64), tokens.capacity);
        }
        self.record(0, correction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn small_governor() -> RateGovernor {
        RateGovernor::new(
            GovernorConfig::default()
                .with_requests_per_minute(60, 2)
                .with_tokens_per_minute(600, 100)
                .with_acquire_timeout(None)
                .with_max_drift(50),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_immediately_with_headroom() {
        let governor = small_governor();
        let permit = governor.acquire(40).await.unwrap();
        assert_eq!(permit.waited(), Duration::ZERO);
        assert_eq!(permit.estimated_tokens(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_burst_still_admits() {
        let governor = RateGovernor::new(
            GovernorConfig::default()
                .with_requests_per_minute(60, 0)
                .with_tokens_per_minute(600, 0)
                .with_acquire_timeout(Some(Duration::from_secs(5))),
        );
        assert_eq!(governor.config().burst_requests, 1);
        assert_eq!(governor.config().burst_tokens, 1);

        let permit = governor.acquire(10).await.unwrap();
        assert_eq!(permit.estimated_tokens(), 1);
        // the next request waits for a refill instead of timing out
        let second = governor.acquire(1).await.unwrap();
        assert!(second.waited() > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_when_request_bucket_empty() {
        let governor = small_governor();
        governor.acquire(1).await.unwrap();
        governor.acquire(1).await.unwrap();

        // 60 rpm refills one request per second
        let third = governor.acquire(1).await.unwrap();
        assert!(third.waited() >= Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_when_token_bucket_short() {
        let governor = small_governor();
        governor.acquire(100).await.unwrap();

        // 600 tpm refills 10 tokens per second; a 50-token call needs 5s
        let permit = governor.acquire(50).await.unwrap();
        assert!(permit.waited() >= Duration::from_secs(5));
        assert!(permit.waited() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimate_above_capacity_is_clamped() {
        let governor = small_governor();
        let permit = governor.acquire(10_000).await.unwrap();
        assert_eq!(permit.estimated_tokens(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_condition() {
        let governor = RateGovernor::new(
            GovernorConfig::default()
                .with_requests_per_minute(1, 1)
                .with_acquire_timeout(Some(Duration::from_secs(5))),
        );
        governor.acquire(10).await.unwrap();

        let err = governor.acquire(10).await.unwrap_err();
        assert!(matches!(err, GovernorError::Timeout { .. }));
        let app: AppError = err.into();
        assert!(matches!(app, AppError::RateTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_returns_overestimate_within_drift() {
        let governor = small_governor();
        let permit = governor.acquire(100).await.unwrap();
        governor.release(permit, 70);

        let stats = governor.stats();
        assert!((stats.tokens_available - 30.0).abs() < 0.01);
        assert_eq!(stats.tokens_last_minute, 70);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_correction_is_clamped() {
        let governor = small_governor();
        let permit = governor.acquire(10).await.unwrap();
        // Under-estimated by 500, drift bound is 50
        governor.release(permit, 510);

        let stats = governor.stats();
        assert!((stats.tokens_available - 40.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquirers_never_double_spend() {
        let governor = Arc::new(small_governor());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let g = governor.clone();
            handles.push(tokio::spawn(async move { g.acquire(40).await.unwrap().waited() }));
        }

        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }

        // 160 tokens against a 100-token bucket: someone has to wait
        assert!(waits.iter().any(|w| !w.is_zero()));
        assert_eq!(governor.stats().admitted, 4);
    }
}
