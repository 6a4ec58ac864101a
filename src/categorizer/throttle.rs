//! Request throttling for the categorization service.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);
const WAIT_MARGIN: Duration = Duration::from_millis(100);

/// Sliding-window limiter bounding categorization calls to `rpm_limit`
/// per trailing 60 seconds.
///
/// In-memory only; every process run starts with an empty window.
pub struct RateLimiter {
    rpm_limit: usize,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(rpm_limit: usize) -> Self {
        Self {
            rpm_limit,
            timestamps: VecDeque::new(),
        }
    }

    /// Block until a call is admitted, then record its timestamp.
    pub async fn acquire(&mut self) {
        let wait = self.wait_needed(Instant::now());
        if !wait.is_zero() {
            log::info!(
                "Throttling: {} RPM limit reached, waiting {:.2}s",
                self.rpm_limit,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        }
        self.record(Instant::now());
    }

    /// Prune entries older than the window, then compute how long the next
    /// call must wait. Split out from `acquire` so the arithmetic can be
    /// exercised with synthetic instants.
    fn wait_needed(&mut self, now: Instant) -> Duration {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        let oldest = match self.timestamps.front() {
            Some(&t) if self.timestamps.len() >= self.rpm_limit => t,
            _ => return Duration::ZERO,
        };

        // 60s - (now - oldest) + margin, clamped at zero.
        match WINDOW.checked_sub(now.duration_since(oldest)) {
            Some(remaining) => remaining + WAIT_MARGIN,
            None => Duration::ZERO,
        }
    }

    fn record(&mut self, at: Instant) {
        self.timestamps.push_back(at);
    }
}

/// Session-scoped one-way latch. The first quota-exhaustion failure trips
/// it; while tripped, every categorization request short-circuits without
/// touching the network. Never resets within a run.
#[derive(Debug, Default)]
pub struct QuotaBreaker {
    tripped: bool,
}

impl QuotaBreaker {
    pub fn trip(&mut self) {
        if !self.tripped {
            log::warn!(
                "Categorization service quota exhausted; \
                 no further categorization will be attempted this run"
            );
            self.tripped = true;
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}
