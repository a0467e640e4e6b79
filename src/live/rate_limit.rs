//! Sliding-window rate limits.
//!
//! - `MessageRateLimiter`: inbound data messages per session
//! - `ConnectionBudget`: new connection attempts across all sessions
//!
//! Both take the current instant explicitly so the paused tokio clock drives
//! them in tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::error::TradeloopError;

pub const DEFAULT_MESSAGE_LIMIT: usize = 5;
pub const DEFAULT_MESSAGE_WINDOW: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONNECTION_LIMIT: usize = 300;
pub const DEFAULT_CONNECTION_WINDOW: Duration = Duration::from_secs(5 * 60);

fn evict_expired(stamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(&oldest) = stamps.front() {
        if now.saturating_duration_since(oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRateLimiter {
    limit: usize,
    window: Duration,
    accepted: VecDeque<Instant>,
}

impl MessageRateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            accepted: VecDeque::with_capacity(limit),
        }
    }

    /// Accept a message at `now` unless `limit` were already accepted within the window.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        evict_expired(&mut self.accepted, self.window, now);
        if self.accepted.len() < self.limit {
            self.accepted.push_back(now);
            true
        } else {
            false
        }
    }
}

impl Default for MessageRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_LIMIT, DEFAULT_MESSAGE_WINDOW)
    }
}

/// System-wide budget of new connection attempts, shared by `Arc`.
#[derive(Debug)]
pub struct ConnectionBudget {
    limit: usize,
    window: Duration,
    attempts: Mutex<VecDeque<Instant>>,
}

impl ConnectionBudget {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            attempts: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an attempt at `now`, or return how long until one is allowed.
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        evict_expired(&mut attempts, self.window, now);

        if attempts.len() < self.limit {
            attempts.push_back(now);
            return Ok(());
        }

        let retry_after = attempts
            .front()
            .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
            .unwrap_or(self.window);
        Err(retry_after)
    }

    pub fn try_acquire(&self) -> Result<(), TradeloopError> {
        self.try_acquire_at(Instant::now())
            .map_err(|retry_after| TradeloopError::RateLimited {
                retry_after_secs: retry_after.as_secs_f64().ceil().max(1.0) as u64,
            })
    }

    pub fn in_window(&self, now: Instant) -> usize {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        evict_expired(&mut attempts, self.window, now);
        attempts.len()
    }
}

impl Default for ConnectionBudget {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_LIMIT, DEFAULT_CONNECTION_WINDOW)
    }
}
