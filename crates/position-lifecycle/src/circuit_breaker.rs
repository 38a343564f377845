use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default time a tripped breaker stays tripped.
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Entry halt set by the lifecycle fail-safe.
///
/// Blocks new entries only. Exits and monitoring keep running while tripped.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    cooldown: Duration,
    status: BreakerStatus,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_COOLDOWN_MINUTES))
    }
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            status: BreakerStatus::default(),
        }
    }

    pub fn trip(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        tracing::error!(reason = %reason, cooldown_minutes = self.cooldown.num_minutes(), "Circuit breaker tripped");
        self.status = BreakerStatus {
            triggered: true,
            triggered_at: Some(now),
            reason: Some(reason),
        };
    }

    /// True while the cooldown is running. Clears the breaker once it has
    /// elapsed.
    pub fn is_tripped(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.triggered {
            return false;
        }
        let expired = match self.status.triggered_at {
            Some(at) => now - at >= self.cooldown,
            None => true,
        };
        if expired {
            tracing::info!(reason = ?self.status.reason, "Circuit breaker cleared after cooldown");
            self.status = BreakerStatus::default();
            return false;
        }
        true
    }

    /// Time left until the breaker clears, if tripped.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let at = self.status.triggered_at?;
        if !self.status.triggered {
            return None;
        }
        let left = self.cooldown - (now - at);
        (left > Duration::zero()).then_some(left)
    }

    pub fn status(&self) -> &BreakerStatus {
        &self.status
    }

    /// Reinstate a persisted status. The cooldown still applies.
    pub fn restore(&mut self, status: BreakerStatus) {
        self.status = status;
    }
}
