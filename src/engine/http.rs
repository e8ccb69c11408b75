// Cannoh Engine: HTTP retry policy and circuit breaker
//
// Used by the AI client. Retryable statuses are retried with exponential
// backoff (1s doubling, capped at 30s, ±25% jitter); an integer `Retry-After`
// wins when it asks for longer. The breaker fails fast after a run of
// consecutive failures until its cooldown has passed.

use log::warn;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub const MAX_RETRIES: u32 = 3;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
const MIN_DELAY: Duration = Duration::from_millis(100);

/// Rate limits, server errors and "overloaded" (529).
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Integer seconds only; HTTP-date values fall back to computed backoff.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse().ok()
}

/// Delay before retry number `attempt + 1`.
pub fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let exponential = BASE_DELAY
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(MAX_DELAY)
        .min(MAX_DELAY);
    let requested = retry_after_secs
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
        .unwrap_or_default();
    jittered(exponential.max(requested), rand::random::<f64>())
}

/// `unit` in [0, 1) maps onto a factor in [0.75, 1.25).
fn jittered(delay: Duration, unit: f64) -> Duration {
    delay.mul_f64(0.75 + unit * 0.5).max(MIN_DELAY)
}

/// Sleep out the backoff and return how long that was.
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let delay = backoff_delay(attempt, retry_after_secs);
    tokio::time::sleep(delay).await;
    delay
}

#[derive(Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_since: Option<Instant>,
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker { threshold: threshold.max(1), cooldown, state: Mutex::new(BreakerState::default()) }
    }

    /// `Err(remaining)` while open. Once the cooldown is over, requests go
    /// through again; one more failure re-opens it.
    pub fn check(&self) -> Result<(), Duration> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Result<(), Duration> {
        let state = self.state.lock();
        match state.open_since {
            Some(since) => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed < self.cooldown { Err(self.cooldown - elapsed) } else { Ok(()) }
            }
            None => Ok(()),
        }
    }

    pub fn record_success(&self) {
        *self.state.lock() = BreakerState::default();
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    fn record_failure_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.open_since = Some(now);
            warn!(
                "[circuit-breaker] Open after {} consecutive failures, cooling down {}s",
                state.consecutive_failures,
                self.cooldown.as_secs()
            );
        }
    }
}
