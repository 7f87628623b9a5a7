//! Adaptive request pacing for rate-limited endpoints.
//!
//! One `RateLimiter` tracks a single scalar delay, widening it on rate-limit
//! signals and narrowing it on successes. The component is purely advisory:
//! it never errors and never rejects a call, it only tells the caller how
//! long to wait. Not designed for concurrent mutation; give each worker its
//! own instance or wrap it in a mutex.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const HISTORY_CAP: usize = 50;
const RECENT_WINDOW: usize = 10;
/// Softer multiplier for timeouts and transport errors, as opposed to the
/// configured backoff factor reserved for explicit rate-limit signals.
const FAILURE_NUDGE: f64 = 1.2;
const MAX_BACKOFF_EXPONENT: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    RateLimited,
    Timeout,
    Failure,
}

/// One recorded remote-call outcome. Immutable once pushed to history.
#[derive(Clone, Debug)]
pub struct RequestOutcome {
    pub at: Instant,
    pub kind: OutcomeKind,
    /// Delay that was in effect when the call was issued.
    pub delay_used: Duration,
    pub provider: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PacingConfig {
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub increase_factor: f64,
    pub decrease_factor: f64,
    /// Consecutive successes after which the delay snaps back to
    /// `initial_delay`, preventing drift toward `min_delay` from a long
    /// streak of cheap calls.
    pub stable_period: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(120),
            increase_factor: 1.5,
            decrease_factor: 0.8,
            stable_period: 5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PacingStats {
    pub total_requests: u64,
    pub current_delay: Duration,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    /// Success share over the last ten outcomes; zero with no history.
    pub recent_success_rate: f64,
    /// Mean `delay_used` over the last ten outcomes.
    pub average_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    config: PacingConfig,
    current_delay: Duration,
    last_call: Option<Instant>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    history: VecDeque<RequestOutcome>,
    total_requests: u64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: PacingConfig) -> Self {
        let current_delay = config
            .initial_delay
            .clamp(config.min_delay, config.max_delay);
        Self {
            config,
            current_delay,
            last_call: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            history: VecDeque::with_capacity(HISTORY_CAP),
            total_requests: 0,
        }
    }

    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Time still to wait before the next call may be issued. Zero when no
    /// call has been recorded yet.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_call {
            None => Duration::ZERO,
            Some(prev) => self.current_delay.saturating_sub(now.duration_since(prev)),
        }
    }

    /// Sleep until the current delay has elapsed since the last recorded
    /// call. Returns the duration actually waited. The sole suspension point
    /// of this component; the underlying sleep is cancel-safe.
    pub async fn wait_if_needed(&mut self) -> Duration {
        self.wait_with_deadline(None).await
    }

    /// Like [`wait_if_needed`](Self::wait_if_needed), but never sleeps past
    /// `deadline`, so a caller-level timeout cannot be starved by pacing.
    pub async fn wait_with_deadline(&mut self, deadline: Option<Instant>) -> Duration {
        let now = Instant::now();
        let mut wait = self.remaining(now);
        if let Some(deadline) = deadline {
            wait = wait.min(deadline.saturating_duration_since(now));
        }
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis(), "pacing wait");
            tokio::time::sleep(wait).await;
        }
        wait
    }

    pub fn record(&mut self, kind: OutcomeKind) {
        self.record_for(kind, None);
    }

    /// Record a call outcome and adapt the delay.
    pub fn record_for(&mut self, kind: OutcomeKind, provider: Option<&str>) {
        let delay_used = self.current_delay;
        self.total_requests += 1;
        self.last_call = Some(Instant::now());
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(RequestOutcome {
            at: Instant::now(),
            kind,
            delay_used,
            provider: provider.map(str::to_owned),
        });

        match kind {
            OutcomeKind::Success => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                self.current_delay = self
                    .scaled(self.config.decrease_factor)
                    .max(self.config.min_delay);
                if self.consecutive_successes >= self.config.stable_period {
                    self.current_delay = self.config.initial_delay;
                    self.consecutive_successes = 0;
                    tracing::debug!(
                        delay_secs = self.current_delay.as_secs_f64(),
                        "stable period reached, delay reset"
                    );
                }
            }
            OutcomeKind::RateLimited => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                let exponent = i32::try_from(self.consecutive_failures)
                    .unwrap_or(i32::MAX)
                    .min(MAX_BACKOFF_EXPONENT);
                let factor = self.config.increase_factor.powi(exponent);
                self.current_delay = self.scaled(factor).min(self.config.max_delay);
                tracing::debug!(
                    delay_secs = self.current_delay.as_secs_f64(),
                    failures = self.consecutive_failures,
                    "rate limited, backing off"
                );
            }
            OutcomeKind::Timeout | OutcomeKind::Failure => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= 2 {
                    self.current_delay = self.scaled(FAILURE_NUDGE).min(self.config.max_delay);
                }
            }
        }
    }

    fn scaled(&self, factor: f64) -> Duration {
        Duration::from_secs_f64(self.current_delay.as_secs_f64() * factor)
    }

    #[must_use]
    pub fn statistics(&self) -> PacingStats {
        let recent: Vec<&RequestOutcome> = self
            .history
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .collect();
        let (success_rate, average_delay) = if recent.is_empty() {
            (0.0, Duration::ZERO)
        } else {
            let successes = recent
                .iter()
                .filter(|o| o.kind == OutcomeKind::Success)
                .count();
            let total_delay: Duration = recent.iter().map(|o| o.delay_used).sum();
            #[allow(clippy::cast_precision_loss)]
            let rate = successes as f64 / recent.len() as f64;
            let avg = total_delay / u32::try_from(recent.len()).unwrap_or(1);
            (rate, avg)
        };
        PacingStats {
            total_requests: self.total_requests,
            current_delay: self.current_delay,
            consecutive_successes: self.consecutive_successes,
            consecutive_failures: self.consecutive_failures,
            recent_success_rate: success_rate,
            average_delay,
        }
    }

    /// Restore the initial delay and forget all history and counters.
    pub fn reset(&mut self) {
        self.current_delay = self
            .config
            .initial_delay
            .clamp(self.config.min_delay, self.config.max_delay);
        self.last_call = None;
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
        self.history.clear();
        self.total_requests = 0;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}
