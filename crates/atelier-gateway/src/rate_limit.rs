use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    touched: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            touched: now,
        }
    }

    /// Credit the time since the last visit, then spend one token if there is one.
    fn try_take(&mut self, capacity: f64, refill_per_sec: f64, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.touched);
        self.tokens = (self.tokens + idle.as_secs_f64() * refill_per_sec).min(capacity);
        self.touched = now;
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

/// Per-client admission control for `POST /api/orchestrate`.
///
/// Clients are keyed by the string the auth layer resolves (API key,
/// forwarded address or the shared anonymous bucket).
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    clients: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// A client may send `max_burst` orchestrations back to back, then one
    /// more every `1 / per_second` seconds.
    pub fn new(max_burst: f64, per_second: f64) -> Self {
        Self {
            capacity: max_burst.max(1.0),
            refill_per_sec: per_second.max(0.0),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// `false` when `client` has used up its allowance.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> bool {
        let mut clients = self.clients.lock();
        let bucket = clients
            .entry(client.to_owned())
            .or_insert_with(|| TokenBucket::full(self.capacity, now));
        bucket.try_take(self.capacity, self.refill_per_sec, now)
    }

    /// Forget clients not seen for `max_idle`. Returns how many were evicted.
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        self.evict_idle(max_idle, Instant::now())
    }

    fn evict_idle(&self, max_idle: Duration, now: Instant) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, bucket| now.saturating_duration_since(bucket.touched) < max_idle);
        before - clients.len()
    }
}
