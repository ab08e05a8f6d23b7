//! Session health tracking
//!
//! Health is checked on demand by `ProxyGateway::check_health`; there is no
//! background timer. A failed check drops the session so the next call
//! reconnects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A check slower than this, and more than twice the running average,
/// marks the server degraded
const DEGRADED_LATENCY_MS: u64 = 1_000;

/// Outcome of the most recent check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Ping answered in normal time
    Healthy,
    /// Ping answered, but slowly
    Degraded,
    /// Ping failed or no session was open
    Unhealthy,
    /// Never checked
    #[default]
    Unknown,
}

/// Check history for the remote server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerHealth {
    pub status: HealthStatus,
    pub last_latency_ms: Option<u64>,
    /// Exponentially weighted average (1/5 weight per check)
    pub average_latency_ms: Option<u64>,
    pub checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub failures_in_row: u32,
    pub successes_in_row: u32,
    pub checks: u64,
}

impl ServerHealth {
    pub(crate) fn record_success(&mut self, latency_ms: u64) {
        let average = self
            .average_latency_ms
            .map_or(latency_ms, |avg| (avg * 4 + latency_ms) / 5);
        let slow = latency_ms > DEGRADED_LATENCY_MS && latency_ms > average * 2;

        self.status = if slow { HealthStatus::Degraded } else { HealthStatus::Healthy };
        self.last_latency_ms = Some(latency_ms);
        self.average_latency_ms = Some(average);
        self.last_error = None;
        self.failures_in_row = 0;
        self.successes_in_row += 1;
        self.touch();
    }

    pub(crate) fn record_failure(&mut self, error: impl Into<String>) {
        self.status = HealthStatus::Unhealthy;
        self.last_latency_ms = None;
        self.last_error = Some(error.into());
        self.successes_in_row = 0;
        self.failures_in_row += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.checked_at = Some(Utc::now());
        self.checks += 1;
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}
