//! Rate-limit governor: one shared backoff window per collaborator.
//!
//! Advisory only. Tasks consult it before retrying; nothing blocks on it.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct GovernorState {
    backoff_until: Option<Instant>,
    consecutive: u32,
}

#[derive(Debug)]
pub struct RateLimitGovernor {
    name: &'static str,
    /// Used when a rate-limit signal carries no retry hint.
    fallback: Duration,
    state: Mutex<GovernorState>,
}

impl RateLimitGovernor {
    pub fn new(name: &'static str, fallback: Duration) -> Self {
        Self {
            name,
            fallback,
            state: Mutex::new(GovernorState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record a throttling signal. A later deadline always wins.
    pub fn observe_rate_limit(&self, retry_after: Option<Duration>) {
        let wait = retry_after.unwrap_or(self.fallback);
        let until = Instant::now() + wait;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.consecutive += 1;
        if state.backoff_until.is_none_or(|current| until > current) {
            state.backoff_until = Some(until);
        }
        debug!(
            collaborator = self.name,
            delay_ms = wait.as_millis() as u64,
            consecutive = state.consecutive,
            "rate limit observed"
        );
    }

    /// Clear the backoff window.
    pub fn observe_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.backoff_until.is_some() {
            debug!(collaborator = self.name, "rate limit cleared");
        }
        state.backoff_until = None;
        state.consecutive = 0;
    }

    /// Remaining shared backoff; zero when not throttled.
    pub fn current_delay(&self) -> Duration {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .backoff_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn consecutive_rate_limits(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .consecutive
    }
}
