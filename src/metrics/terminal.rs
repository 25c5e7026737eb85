//! Individual terminal metrics collection

use crate::common::{SupervisorId, TerminalIdentity};
use std::time::Duration;
use tokio::time::Instant;

/// Counters for one supervisor
#[derive(Debug, Clone)]
pub struct TerminalMetrics {
    pub id: SupervisorId,
    pub terminal: TerminalIdentity,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub connections: u64,
    pub disconnects: u64,
    pub probes_sent: u64,
    pub probes_failed: u64,
    pub server_events: u64,
    pub heartbeats: u64,
    pub failed: bool,
    connected_total: Duration,
    connected_since: Option<Instant>,
}

impl TerminalMetrics {
    pub fn new(id: SupervisorId, terminal: TerminalIdentity) -> Self {
        Self {
            id,
            terminal,
            connect_attempts: 0,
            connect_failures: 0,
            connections: 0,
            disconnects: 0,
            probes_sent: 0,
            probes_failed: 0,
            server_events: 0,
            heartbeats: 0,
            failed: false,
            connected_total: Duration::ZERO,
            connected_since: None,
        }
    }

    pub fn record_connected(&mut self, at: Instant) {
        self.connections += 1;
        self.connected_since = Some(at);
    }

    /// Close the current connected interval, if any
    pub fn record_left_connected(&mut self, at: Instant) {
        if let Some(since) = self.connected_since.take() {
            self.connected_total += at.saturating_duration_since(since);
        }
    }

    /// Total time spent connected, including a still-open interval
    pub fn uptime(&self, now: Instant) -> Duration {
        match self.connected_since {
            Some(since) => self.connected_total + now.saturating_duration_since(since),
            None => self.connected_total,
        }
    }

    /// Share of probes that were written successfully (0.0 to 100.0)
    pub fn probe_success_rate(&self) -> f64 {
        if self.probes_sent == 0 {
            return 100.0;
        }
        let ok = self.probes_sent.saturating_sub(self.probes_failed);
        (ok as f64 / self.probes_sent as f64) * 100.0
    }

    /// Check if the terminal saw any connection trouble
    pub fn had_trouble(&self) -> bool {
        self.failed || self.connect_failures > 0 || self.disconnects > 0 || self.probes_failed > 0
    }
}
