use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{Error, Result};

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct BucketLimits {
    pub capacity: u32,
    pub window: Duration,
}

#[derive(Debug)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
    limits: BucketLimits,
}

impl RateBucket {
    fn full(limits: BucketLimits, now: Instant) -> Self {
        Self {
            tokens: limits.capacity as f64,
            last_refill: now,
            limits,
        }
    }

    fn refill(&mut self, now: Instant) {
        // Clock readings that go backwards are treated as no elapsed time.
        let elapsed = now.saturating_duration_since(self.last_refill);
        let window_secs = self.limits.window.as_secs_f64().max(1e-6);
        let capacity = self.limits.capacity as f64;
        let gained = elapsed.as_secs_f64() / window_secs * capacity;
        self.tokens = (self.tokens + gained).min(capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    fn take(&mut self, now: Instant) -> Decision {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Decision {
                allowed: true,
                retry_after_ms: None,
            };
        }

        let per_token_ms =
            self.limits.window.as_millis() as f64 / self.limits.capacity.max(1) as f64;
        let retry_after = ((1.0 - self.tokens) * per_token_ms).ceil() as u64;
        Decision {
            allowed: false,
            retry_after_ms: Some(retry_after),
        }
    }
}

/// Per-key token buckets; one operation kind cannot drain another's budget.
pub struct RequestBudget {
    buckets: DashMap<String, RateBucket>,
    defaults: BucketLimits,
    overrides: HashMap<String, BucketLimits>,
}

impl RequestBudget {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            defaults: BucketLimits { capacity, window },
            overrides: HashMap::new(),
        }
    }

    pub fn with_limit(mut self, key: &str, capacity: u32, window: Duration) -> Self {
        self.overrides
            .insert(key.to_string(), BucketLimits { capacity, window });
        self
    }

    pub fn is_allowed(&self, key: &str) -> Decision {
        self.is_allowed_at(key, Instant::now())
    }

    pub fn is_allowed_at(&self, key: &str, now: Instant) -> Decision {
        let limits = self.overrides.get(key).copied().unwrap_or(self.defaults);
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket::full(limits, now));
        let decision = bucket.take(now);
        if !decision.allowed {
            tracing::debug!(
                "Budget for '{}' exhausted, retry after {:?} ms",
                key,
                decision.retry_after_ms
            );
        }
        decision
    }

    /// Consumes one slot for `key` or fails with `RateLimitExceeded`.
    pub fn check(&self, key: &str) -> Result<()> {
        let decision = self.is_allowed(key);
        if decision.allowed {
            Ok(())
        } else {
            Err(Error::RateLimitExceeded {
                key: key.to_string(),
                retry_after_ms: decision.retry_after_ms.unwrap_or(0),
            })
        }
    }

    pub fn remaining(&self, key: &str) -> Option<f64> {
        self.buckets.get(key).map(|b| b.tokens)
    }
}

impl Default for RequestBudget {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_call_denied_with_full_window_wait() {
        let budget = RequestBudget::new(1, Duration::from_millis(60_000));
        let start = Instant::now();

        let first = budget.is_allowed_at("analysis", start);
        let second = budget.is_allowed_at("analysis", start + Duration::from_millis(1));

        assert!(first.allowed);
        assert!(!second.allowed);
        let wait = second.retry_after_ms.unwrap();
        assert!((59_990..=60_000).contains(&wait), "wait was {}", wait);
    }

    #[test]
    fn test_keys_are_isolated() {
        let budget = RequestBudget::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(budget.is_allowed_at("audit", now).allowed);
        assert!(!budget.is_allowed_at("audit", now).allowed);
        assert!(budget.is_allowed_at("chat", now).allowed);
    }

    #[test]
    fn test_never_exceeds_capacity_within_window() {
        let capacity = 5;
        let window = Duration::from_millis(1_000);
        let budget = RequestBudget::new(capacity, window);
        let start = Instant::now();

        // Hammer the bucket every 10ms for three windows.
        let mut allowed_at = Vec::new();
        for step in 0..300u64 {
            let now = start + Duration::from_millis(step * 10);
            if budget.is_allowed_at("k", now).allowed {
                allowed_at.push(step * 10);
            }
            let tokens = budget.remaining("k").unwrap();
            assert!(tokens >= 0.0 && tokens <= capacity as f64);
        }

        // A token bucket admits its full burst plus one window of refill, so
        // any rolling window sees at most twice the capacity.
        assert!(allowed_at.len() <= capacity as usize * 4);
        for (i, &t) in allowed_at.iter().enumerate() {
            let in_window = allowed_at[i..]
                .iter()
                .take_while(|&&other| other < t + 1_000)
                .count();
            assert!(in_window <= capacity as usize * 2);
        }
    }

    #[test]
    fn test_sub_millisecond_calls_still_refill() {
        let budget = RequestBudget::new(10, Duration::from_millis(100));
        let start = Instant::now();
        let allowed = (0..400u64)
            .filter(|step| {
                let now = start + Duration::from_micros(step * 500);
                budget.is_allowed_at("k", now).allowed
            })
            .count();
        // 10 up front plus 10 per 100ms over 200ms.
        assert!(allowed >= 28, "allowed {}", allowed);
        assert!(allowed <= 30, "allowed {}", allowed);
    }

    #[test]
    fn test_burst_at_one_instant_is_capped() {
        let budget = RequestBudget::new(3, Duration::from_secs(60));
        let now = Instant::now();
        let allowed = (0..10)
            .filter(|_| budget.is_allowed_at("analysis", now).allowed)
            .count();
        assert_eq!(allowed, 3);
        assert_eq!(budget.remaining("analysis"), Some(0.0));
    }

    #[test]
    fn test_tokens_refill_after_window() {
        let budget = RequestBudget::new(2, Duration::from_secs(10));
        let now = Instant::now();
        assert!(budget.is_allowed_at("chat", now).allowed);
        assert!(budget.is_allowed_at("chat", now).allowed);
        assert!(!budget.is_allowed_at("chat", now).allowed);
        assert!(budget
            .is_allowed_at("chat", now + Duration::from_secs(5))
            .allowed);
    }

    #[test]
    fn test_check_maps_denial_to_error() {
        let budget = RequestBudget::new(1, Duration::from_secs(60)).with_limit(
            "video",
            1,
            Duration::from_secs(3_600),
        );
        assert!(budget.check("video").is_ok());
        let err = budget.check("video").unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded { ref key, .. } if key == "video"));
        assert!(err.retry_after_ms().unwrap() > 3_000_000);
    }
}
