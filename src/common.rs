//! Shared identity types and the fleet-wide connected set

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The (merchant id, terminal id) pair that addresses one terminal in logs and status output.
///
/// Ordering is by merchant id, then terminal id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TerminalIdentity {
    pub merchant_id: String,
    pub terminal_id: String,
}

impl TerminalIdentity {
    pub fn new(merchant_id: impl Into<String>, terminal_id: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            terminal_id: terminal_id.into(),
        }
    }
}

impl std::fmt::Display for TerminalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MID:{} TID:{}", self.merchant_id, self.terminal_id)
    }
}

/// Position of a supervisor in the configured terminal list.
///
/// The terminal list may repeat a pair, so this, not the identity, keys per-supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SupervisorId(pub usize);

impl From<usize> for SupervisorId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SupervisorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct ConnectedEntry {
    terminal: TerminalIdentity,
    since: DateTime<Utc>,
}

/// Thread-safe set of currently connected terminals.
///
/// Supervisors add themselves on entering Connected and remove themselves on leaving it.
/// Every operation takes the lock for the map update only.
#[derive(Debug, Clone, Default)]
pub struct ConnectedSet {
    inner: Arc<RwLock<HashMap<SupervisorId, ConnectedEntry>>>,
}

impl ConnectedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a supervisor as connected, returning the recorded start time
    pub async fn insert(&self, id: SupervisorId, terminal: TerminalIdentity) -> DateTime<Utc> {
        let since = Utc::now();
        let mut entries = self.inner.write().await;
        entries.insert(id, ConnectedEntry { terminal, since });
        since
    }

    /// Remove a supervisor; returns whether it was present
    pub async fn remove(&self, id: SupervisorId) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Point-in-time copy ordered by merchant id then terminal id
    pub async fn snapshot(&self) -> Vec<(TerminalIdentity, DateTime<Utc>)> {
        let mut entries: Vec<(SupervisorId, TerminalIdentity, DateTime<Utc>)> = {
            let entries = self.inner.read().await;
            entries
                .iter()
                .map(|(id, entry)| (*id, entry.terminal.clone(), entry.since))
                .collect()
        };

        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        entries
            .into_iter()
            .map(|(_, terminal, since)| (terminal, since))
            .collect()
    }

    /// Ordered identities only
    pub async fn terminals(&self) -> Vec<TerminalIdentity> {
        self.snapshot()
            .await
            .into_iter()
            .map(|(terminal, _)| terminal)
            .collect()
    }
}
