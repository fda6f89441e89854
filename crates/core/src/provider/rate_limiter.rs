//! Token bucket rate limiting for provider queries.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use super::types::ProviderError;

/// Token bucket sized to a requests-per-minute budget.
///
/// The bucket starts full. Tokens refill continuously at
/// `requests_per_minute / 60` per second.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f32,
    tokens: f32,
    refill_per_sec: f32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or return how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        if self.refill_per_sec <= 0.0 {
            return Err(Duration::from_secs(60));
        }
        Err(Duration::from_secs_f32((1.0 - self.tokens) / self.refill_per_sec))
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// Per-provider limiter. A budget of 0 requests per minute means unlimited.
#[derive(Debug)]
pub struct ProviderRateLimiter {
    provider: String,
    bucket: Option<Mutex<TokenBucket>>,
}

impl ProviderRateLimiter {
    pub fn new(provider: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            provider: provider.into(),
            bucket: (requests_per_minute > 0)
                .then(|| Mutex::new(TokenBucket::new(requests_per_minute))),
        }
    }

    /// Reserve one request, failing with [`ProviderError::RateLimited`] when
    /// the budget is spent. Never waits.
    pub async fn try_acquire(&self) -> Result<(), ProviderError> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        bucket
            .lock()
            .await
            .try_acquire()
            .map_err(|wait| ProviderError::RateLimited {
                provider: self.provider.clone(),
                retry_after_ms: wait.as_millis() as u64,
            })
    }
}
