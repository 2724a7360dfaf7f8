//! Circuit breaker with a sliding failure window and a single half-open probe.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use scoreline_core::{GovernorConfig, OpsEvent, OpsLevel, SharedOps};
use serde::Serialize;
use tokio::time::Instant;

const COMPONENT: &str = "governor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The one call allowed after the cool-down; its result decides the state.
    Probe,
}

struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: usize,
    window: Duration,
    open_duration: Duration,
    ops: SharedOps,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, window: Duration, open_duration: Duration, ops: SharedOps) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_started: None,
            }),
            failure_threshold: failure_threshold.max(1) as usize,
            window,
            open_duration,
            ops,
        }
    }

    pub fn from_config(config: &GovernorConfig, ops: SharedOps) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_secs(config.failure_window_secs),
            Duration::from_secs(config.open_secs),
            ops,
        )
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// True while calls are refused outright (open and still cooling down).
    pub fn is_blocking(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner
                .opened_at
                .map_or(false, |at| at.elapsed() < self.open_duration)
    }

    /// Failures currently inside the sliding window.
    pub fn recent_failures(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, self.window);
        inner.failures.len()
    }

    /// Time left before an open circuit allows its probe.
    pub fn open_remaining(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => {
                Some(self.open_duration.saturating_sub(at.elapsed()))
            }
            _ => None,
        }
    }

    /// Decide whether a call may proceed. `None` means the circuit is open
    /// and the call must not be made.
    pub fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.open_duration);
                if !cooled {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_started = Some(Instant::now());
                self.ops
                    .emit(OpsEvent::new(COMPONENT, "circuit_half_open", OpsLevel::Info));
                Some(Admission::Probe)
            }
            CircuitState::HalfOpen => {
                // A probe abandoned mid-flight must not wedge the breaker.
                let stuck = inner
                    .probe_started
                    .map_or(true, |at| at.elapsed() >= self.open_duration);
                if stuck {
                    inner.probe_started = Some(Instant::now());
                    Some(Admission::Probe)
                } else {
                    None
                }
            }
        }
    }

    /// Record a call that reached the provider and got an answer.
    pub fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        if admission == Admission::Probe || inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            inner.opened_at = None;
            inner.probe_started = None;
            self.ops
                .emit(OpsEvent::new(COMPONENT, "circuit_closed", OpsLevel::Info));
        }
    }

    /// Record a failed call (retries already exhausted).
    pub fn on_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if admission == Admission::Probe {
            self.open(&mut inner, now, "probe_failed");
            return;
        }

        inner.failures.push_back(now);
        Self::prune(&mut inner, self.window);
        if inner.state == CircuitState::Closed && inner.failures.len() >= self.failure_threshold {
            self.open(&mut inner, now, "threshold_reached");
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant, reason: &str) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.probe_started = None;
        self.ops.emit(
            OpsEvent::new(COMPONENT, "circuit_opened", OpsLevel::Warn)
                .with("reason", reason)
                .with("failures", inner.failures.len())
                .with("open_secs", self.open_duration.as_secs()),
        );
    }

    fn prune(inner: &mut BreakerInner, window: Duration) {
        while let Some(front) = inner.failures.front() {
            if front.elapsed() > window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreline_core::MemorySink;

    fn breaker(sink: &std::sync::Arc<MemorySink>) -> CircuitBreaker {
        CircuitBreaker::new(
            5,
            Duration::from_secs(60),
            Duration::from_secs(120),
            sink.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let sink = MemorySink::new();
        let cb = breaker(&sink);
        for _ in 0..4 {
            cb.on_failure(Admission::Normal);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.on_failure(Admission::Normal);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.admit().is_none());
        assert!(cb.is_blocking());
        assert_eq!(sink.count("circuit_opened"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_expire() {
        let sink = MemorySink::new();
        let cb = breaker(&sink);
        for _ in 0..4 {
            cb.on_failure(Admission::Normal);
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        cb.on_failure(Admission::Normal);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.recent_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let sink = MemorySink::new();
        let cb = breaker(&sink);
        for _ in 0..5 {
            cb.on_failure(Admission::Normal);
        }
        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(cb.admit().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cb.is_blocking());
        assert_eq!(cb.admit(), Some(Admission::Probe));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Only one probe at a time.
        assert!(cb.admit().is_none());

        cb.on_success(Admission::Probe);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.recent_failures(), 0);
        assert_eq!(cb.admit(), Some(Admission::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_and_restarts_cooldown() {
        let sink = MemorySink::new();
        let cb = breaker(&sink);
        for _ in 0..5 {
            cb.on_failure(Admission::Normal);
        }
        tokio::time::advance(Duration::from_secs(120)).await;
        let admission = cb.admit().unwrap();
        cb.on_failure(admission);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cb.admit().is_none());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cb.admit(), Some(Admission::Probe));
        assert_eq!(sink.count("circuit_opened"), 2);
        assert_eq!(sink.count("circuit_half_open"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_does_not_wedge() {
        let sink = MemorySink::new();
        let cb = breaker(&sink);
        for _ in 0..5 {
            cb.on_failure(Admission::Normal);
        }
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(cb.admit(), Some(Admission::Probe));
        // Probe never reports back.
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(cb.admit(), Some(Admission::Probe));
    }
}
