//! Aggregate metrics collection across all supervisors

use crate::common::{SupervisorId, TerminalIdentity};
use crate::metrics::terminal::TerminalMetrics;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Thread-safe fleet-wide metrics
#[derive(Debug, Default)]
pub struct FleetMetrics {
    pub total_connect_attempts: AtomicU64,
    pub total_connect_failures: AtomicU64,
    pub total_connections: AtomicU64,
    pub total_disconnects: AtomicU64,
    pub total_auth_rejections: AtomicU64,
    pub total_failed_supervisors: AtomicU64,
    pub total_probes_sent: AtomicU64,
    pub total_probes_failed: AtomicU64,
    pub total_server_events: AtomicU64,
    pub total_heartbeats: AtomicU64,
    terminal_metrics: Arc<RwLock<HashMap<SupervisorId, TerminalMetrics>>>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a supervisor before it starts
    pub async fn init_terminal(&self, id: SupervisorId, terminal: TerminalIdentity) {
        let mut metrics = self.terminal_metrics.write().await;
        metrics.insert(id, TerminalMetrics::new(id, terminal));
    }

    async fn update(&self, id: SupervisorId, f: impl FnOnce(&mut TerminalMetrics)) {
        let mut metrics = self.terminal_metrics.write().await;
        if let Some(terminal_metrics) = metrics.get_mut(&id) {
            f(terminal_metrics);
        }
    }

    pub async fn record_connect_attempt(&self, id: SupervisorId) {
        self.total_connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.update(id, |m| m.connect_attempts += 1).await;
    }

    pub async fn record_connect_failure(&self, id: SupervisorId) {
        self.total_connect_failures.fetch_add(1, Ordering::Relaxed);
        self.update(id, |m| m.connect_failures += 1).await;
    }

    pub async fn record_auth_rejected(&self, id: SupervisorId) {
        self.total_auth_rejections.fetch_add(1, Ordering::Relaxed);
        self.update(id, |m| m.connect_failures += 1).await;
    }

    pub async fn record_connected(&self, id: SupervisorId) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        self.update(id, |m| m.record_connected(now)).await;
    }

    /// The supervisor left Connected, whether through a drop or a shutdown
    pub async fn record_left_connected(&self, id: SupervisorId, dropped: bool) {
        if dropped {
            self.total_disconnects.fetch_add(1, Ordering::Relaxed);
        }
        let now = Instant::now();
        self.update(id, |m| {
            m.record_left_connected(now);
            if dropped {
                m.disconnects += 1;
            }
        })
        .await;
    }

    pub async fn record_failed(&self, id: SupervisorId) {
        self.total_failed_supervisors.fetch_add(1, Ordering::Relaxed);
        self.update(id, |m| m.failed = true).await;
    }

    pub async fn record_probe(&self, id: SupervisorId, ok: bool) {
        self.total_probes_sent.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.total_probes_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.update(id, |m| {
            m.probes_sent += 1;
            if !ok {
                m.probes_failed += 1;
            }
        })
        .await;
    }

    pub fn record_server_event(&self) {
        self.total_server_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.total_heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    /// Get read-only copies of per-terminal metrics, ordered by supervisor id
    pub async fn get_terminal_metrics(&self) -> Vec<TerminalMetrics> {
        let metrics = self.terminal_metrics.read().await;
        let mut all: Vec<TerminalMetrics> = metrics.values().cloned().collect();
        all.sort_by_key(|m| m.id);
        all
    }

    /// Average share of the run each terminal spent connected (0.0 to 100.0)
    pub async fn availability(&self, run_duration: std::time::Duration) -> f64 {
        let metrics = self.terminal_metrics.read().await;
        if metrics.is_empty() || run_duration.is_zero() {
            return 0.0;
        }
        let now = Instant::now();
        let total: f64 = metrics
            .values()
            .map(|m| (m.uptime(now).as_secs_f64() / run_duration.as_secs_f64()).min(1.0))
            .sum();
        total / metrics.len() as f64 * 100.0
    }
}
