//! Reconnection policy: two independent retry tracks.
//!
//! The auth track (close code 4001) delegates each retry to a token refresh
//! and ends the session once its budget is spent. The generic track covers
//! every other abnormal close with jittered exponential backoff. The two
//! counters are never combined.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;

use crate::state::CloseOutcome;

/// Refresh attempts allowed before a rejected credential ends the session.
pub const MAX_AUTH_RETRY: u32 = 3;
/// Delay before reconnecting with a freshly refreshed token.
pub const AUTH_RECONNECT_DELAY: Duration = Duration::from_millis(500);
/// Upper bound for any backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Multiplicative jitter applied to each backoff delay.
pub const JITTER: RangeInclusive<f64> = 0.75..=1.25;

/// What the manager should do after a close or a refresh result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CloseAction {
    /// Run the token refresher; its result comes back later.
    RefreshToken,
    /// Budget exhausted: end the user session.
    Terminate,
    /// Schedule `connect()` after the delay.
    Reconnect(Duration),
    /// Stay closed until an external trigger.
    Idle,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    reconnect_interval: Duration,
    max_reconnect_attempts: u32,
    reconnect_attempts: u32,
    auth_retry_count: u32,
}

impl ReconnectPolicy {
    pub fn new(reconnect_interval: Duration, max_reconnect_attempts: u32) -> Self {
        Self {
            reconnect_interval,
            max_reconnect_attempts,
            reconnect_attempts: 0,
            auth_retry_count: 0,
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn auth_retry_count(&self) -> u32 {
        self.auth_retry_count
    }

    /// A successful open clears both tracks.
    pub fn on_open(&mut self) {
        self.reconnect_attempts = 0;
        self.auth_retry_count = 0;
    }

    pub fn on_close(&mut self, outcome: CloseOutcome) -> CloseAction {
        self.on_close_with_jitter(outcome, random_jitter())
    }

    /// Same as [`on_close`](Self::on_close) with a fixed jitter factor.
    pub fn on_close_with_jitter(&mut self, outcome: CloseOutcome, jitter: f64) -> CloseAction {
        match outcome {
            CloseOutcome::AuthRejected => {
                if self.auth_retry_count < MAX_AUTH_RETRY {
                    self.auth_retry_count += 1;
                    CloseAction::RefreshToken
                } else {
                    self.auth_retry_count = 0;
                    CloseAction::Terminate
                }
            }
            // Any non-auth close clears the auth-failure history.
            CloseOutcome::Abnormal { .. } => {
                self.auth_retry_count = 0;
                self.backoff_with_jitter(jitter)
            }
            CloseOutcome::Normal { .. } => {
                self.auth_retry_count = 0;
                CloseAction::Idle
            }
        }
    }

    /// A refreshed credential reconnects quickly, bypassing the backoff.
    pub fn on_refresh_succeeded(&self) -> CloseAction {
        CloseAction::Reconnect(AUTH_RECONNECT_DELAY)
    }

    /// A failed refresh falls through to the generic track.
    pub fn on_refresh_failed(&mut self) -> CloseAction {
        self.backoff_with_jitter(random_jitter())
    }

    pub fn backoff_with_jitter(&mut self, jitter: f64) -> CloseAction {
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            return CloseAction::Idle;
        }
        self.reconnect_attempts += 1;
        CloseAction::Reconnect(backoff_delay(
            self.reconnect_interval,
            self.reconnect_attempts,
            jitter,
        ))
    }
}

/// `min(base × 2^(attempt−1) × jitter, 60s)`.
pub fn backoff_delay(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let millis = base.as_millis() as f64 * 2f64.powi(exponent) * jitter;
    let capped = millis.min(MAX_BACKOFF.as_millis() as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

fn random_jitter() -> f64 {
    rand::rng().random_range(JITTER)
}
