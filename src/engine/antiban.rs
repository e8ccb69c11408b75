// Cannoh Engine: Outbound rate limiter (anti-ban)
//
// Sliding one-minute window over every message the bot sends, plus a pause
// after each send. Keeps the account under WhatsApp's spam heuristics.

use crate::engine::config::AntiBanSettings;
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

pub struct OutboundLimiter {
    settings: AntiBanSettings,
    /// Send times inside the current window, oldest first.
    sent: Mutex<VecDeque<Instant>>,
}

impl OutboundLimiter {
    pub fn new(settings: AntiBanSettings) -> Self {
        OutboundLimiter { settings, sent: Mutex::new(VecDeque::new()) }
    }

    fn prune(sent: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = sent.front() {
            if now.duration_since(*front) >= WINDOW {
                sent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a slot at `now`, or report how long until one frees up.
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut sent = self.sent.lock();
        Self::prune(&mut sent, now);
        if sent.len() < self.settings.max_messages_per_minute as usize {
            sent.push_back(now);
            return Ok(());
        }
        let oldest = sent.front().copied().unwrap_or(now);
        Err(WINDOW.saturating_sub(now.duration_since(oldest)))
    }

    /// Wait for a free slot, then apply the per-message pause.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => break,
                Err(wait) => {
                    debug!("[antiban] Minute budget used, waiting {}ms", wait.as_millis());
                    tokio::time::sleep(wait.max(Duration::from_millis(50))).await;
                }
            }
        }
        let pause = self.pacing_delay();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    /// Fixed delay plus, when enabled, up to the same amount again at random.
    pub fn pacing_delay(&self) -> Duration {
        let base = self.settings.delay_between_messages;
        let extra = if self.settings.random_delay {
            (rand::random::<f64>() * base as f64) as u64
        } else {
            0
        };
        Duration::from_millis(base + extra)
    }

    /// Share of the minute budget in use, in [0, 1].
    pub fn load(&self) -> f64 {
        let mut sent = self.sent.lock();
        Self::prune(&mut sent, Instant::now());
        let max = self.settings.max_messages_per_minute.max(1) as f64;
        (sent.len() as f64 / max).min(1.0)
    }
}
