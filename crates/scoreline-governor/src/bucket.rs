//! Token bucket with a FIFO wait list.
//!
//! Tokens refill continuously in proportion to elapsed time, capped at the
//! burst capacity. Callers that find the bucket empty queue up in arrival
//! order; a drain task wakes them on a fixed cadence of `1 / refill_rate`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
    draining: bool,
}

impl BucketInner {
    fn refill(&mut self, max_tokens: f64, refill_per_sec: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(max_tokens);
        self.last_refill = now;
    }
}

/// Process-wide admission control for upstream calls.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Mutex<BucketInner>>,
    max_tokens: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(max_tokens: u32, refill_per_sec: f64) -> Self {
        let max_tokens = f64::from(max_tokens.max(1));
        Self {
            inner: Arc::new(Mutex::new(BucketInner {
                tokens: max_tokens,
                last_refill: Instant::now(),
                waiters: VecDeque::new(),
                draining: false,
            })),
            max_tokens,
            refill_per_sec,
        }
    }

    /// Take one token without waiting. Fails if anyone is already queued.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.refill(self.max_tokens, self.refill_per_sec);
        if inner.waiters.is_empty() && inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, in FIFO order with other waiters.
    pub async fn acquire(&self, context: &str) {
        let rx = {
            let mut inner = self.inner.lock();
            inner.refill(self.max_tokens, self.refill_per_sec);
            if inner.waiters.is_empty() && inner.tokens >= 1.0 {
                inner.tokens -= 1.0;
                return;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            if !inner.draining {
                inner.draining = true;
                self.spawn_drain();
            }
            debug!(
                "Rate limited: {} queued ({} waiting)",
                context,
                inner.waiters.len()
            );
            rx
        };

        if rx.await.is_err() {
            warn!("Token bucket drain stopped while {} was waiting", context);
        }
    }

    fn spawn_drain(&self) {
        let inner = Arc::clone(&self.inner);
        let max_tokens = self.max_tokens;
        let refill_per_sec = self.refill_per_sec;
        let cadence = Duration::from_secs_f64(1.0 / refill_per_sec);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + cadence, cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut guard = inner.lock();
                guard.refill(max_tokens, refill_per_sec);
                while guard.tokens >= 1.0 {
                    let Some(waiter) = guard.waiters.pop_front() else {
                        break;
                    };
                    // A dropped receiver means the caller gave up; keep the token.
                    if waiter.send(()).is_ok() {
                        guard.tokens -= 1.0;
                    }
                }
                if guard.waiters.is_empty() {
                    guard.draining = false;
                    break;
                }
            }
        });
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut inner = self.inner.lock();
        inner.refill(self.max_tokens, self.refill_per_sec);
        inner.tokens
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_throttle() {
        let bucket = TokenBucket::new(5, 1.0);
        let start = Instant::now();

        let mut handles = Vec::new();
        for i in 0..6 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                bucket.acquire(&format!("call-{}", i)).await;
                Instant::now().duration_since(start)
            }));
        }

        let mut elapsed = Vec::new();
        for handle in handles {
            elapsed.push(handle.await.unwrap());
        }
        elapsed.sort();

        for e in &elapsed[..5] {
            assert!(*e < Duration::from_millis(10), "burst call waited {:?}", e);
        }
        let sixth = elapsed[5];
        assert!(sixth >= Duration::from_millis(990), "sixth resolved after {:?}", sixth);
        assert!(sixth <= Duration::from_millis(1_100), "sixth resolved after {:?}", sixth);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_resolve_in_fifo_order() {
        let bucket = TokenBucket::new(1, 2.0);
        bucket.acquire("warmup").await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let bucket = bucket.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                bucket.acquire("queued").await;
                order.lock().push(i);
            }));
            // Make arrival order deterministic.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_burst() {
        let bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.try_acquire());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((bucket.available() - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_respects_queue() {
        let bucket = TokenBucket::new(1, 1.0);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
