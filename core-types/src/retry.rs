// Copyright (c) James Kassemi, SC, US. All rights reserved.

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Jittered exponential backoff for outbound collaborator calls.
///
/// Attempt `n` sleeps `base * 2^n` milliseconds, capped at `max_delay_ms`,
/// then widened by up to `jitter_pct` in either direction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base_delay_ms.max(1),
            max_delay_ms: max_delay_ms.max(base_delay_ms.max(1)),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Tuned for the internal collaborator services: short, few attempts,
    /// so one slow dependency cannot stall a whole scheduler cycle.
    pub fn default_http() -> Self {
        Self::new(3, 200, 2_000, 0.25)
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let capped = self
            .base_delay_ms
            .saturating_mul(1_u64 << attempt.min(16))
            .min(self.max_delay_ms);
        if self.jitter_pct == 0.0 {
            return Duration::from_millis(capped);
        }
        let spread = (capped as f64 * self.jitter_pct) as i64;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(capped.saturating_add_signed(offset))
    }

    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_http()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{advance, pause};

    #[test]
    fn new_clamps_degenerate_parameters() {
        let policy = RetryPolicy::new(0, 0, 0, 5.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 1.0);
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = RetryPolicy::new(4, 100, 300, 0.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        pause();
        let policy = RetryPolicy::new(3, 10, 10, 0.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let advancer = tokio::spawn(async {
            advance(Duration::from_millis(10)).await;
            advance(Duration::from_millis(10)).await;
        });

        let result: Result<u32, &str> = policy
            .retry_async(|attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err("transient") } else { Ok(7) }
                }
            })
            .await;

        advancer.await.unwrap();
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        pause();
        let policy = RetryPolicy::new(2, 5, 5, 0.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let advancer = tokio::spawn(async { advance(Duration::from_millis(5)).await });

        let result: Result<(), &str> = policy
            .retry_async(|_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                }
            })
            .await;

        advancer.await.unwrap();
        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
