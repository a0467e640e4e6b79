//! Reconnect policy and connection state machine.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// `min(base × 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected,
    Reconnecting { attempt: u32 },
    Stopped { reason: String },
}

/// Connection lifecycle driven by connect/disconnect events.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn attempt(&self) -> Option<u32> {
        match self.state {
            ConnectionState::Reconnecting { attempt } => Some(attempt),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, ConnectionState::Stopped { .. })
    }

    /// A connection came up; the attempt counter resets.
    pub fn on_connected(&mut self) {
        if !self.is_stopped() {
            self.state = ConnectionState::Connected;
        }
    }

    /// A connection dropped or an attempt failed.
    ///
    /// Returns the delay before the next attempt, or `None` once the attempt
    /// budget is spent and the machine has stopped.
    pub fn on_failure(&mut self, reason: &str) -> Option<Duration> {
        let attempt = match self.state {
            ConnectionState::Idle | ConnectionState::Connected => 0,
            ConnectionState::Reconnecting { attempt } => attempt + 1,
            ConnectionState::Stopped { .. } => return None,
        };

        if attempt >= self.policy.max_attempts {
            self.state = ConnectionState::Stopped {
                reason: format!(
                    "gave up after {} reconnect attempts: {}",
                    self.policy.max_attempts, reason
                ),
            };
            return None;
        }

        self.state = ConnectionState::Reconnecting { attempt };
        Some(self.policy.delay_for(attempt))
    }

    pub fn stop(&mut self, reason: impl Into<String>) {
        if !self.is_stopped() {
            self.state = ConnectionState::Stopped {
                reason: reason.into(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_sequence_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..5)
            .map(|a| policy.delay_for(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![5000, 10000, 20000, 40000, 60000]);
    }

    #[test]
    fn delay_saturates_for_huge_attempts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(64), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn failures_walk_attempts_then_stop() {
        let mut machine = ReconnectMachine::new(ReconnectPolicy {
            max_attempts: 3,
            ..ReconnectPolicy::default()
        });
        machine.on_connected();
        assert_eq!(machine.on_failure("closed"), Some(Duration::from_secs(5)));
        assert_eq!(machine.attempt(), Some(0));
        assert_eq!(machine.on_failure("refused"), Some(Duration::from_secs(10)));
        assert_eq!(machine.on_failure("refused"), Some(Duration::from_secs(20)));
        assert_eq!(machine.on_failure("refused"), None);

        match machine.state() {
            ConnectionState::Stopped { reason } => assert!(reason.contains("refused")),
            other => panic!("expected Stopped, got {other:?}"),
        }
        assert_eq!(machine.on_failure("again"), None);
    }

    #[test]
    fn successful_reconnect_resets_counter() {
        let mut machine = ReconnectMachine::new(ReconnectPolicy::default());
        machine.on_connected();
        machine.on_failure("closed");
        machine.on_failure("refused");
        assert_eq!(machine.attempt(), Some(1));

        machine.on_connected();
        assert_eq!(machine.state(), &ConnectionState::Connected);
        assert_eq!(machine.on_failure("closed"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn stop_is_terminal() {
        let mut machine = ReconnectMachine::new(ReconnectPolicy::default());
        machine.stop("requested");
        machine.on_connected();
        assert!(machine.is_stopped());
    }
}
