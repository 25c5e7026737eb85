//! Client module for terminal connections
//!
//! This module provides:
//! - Transport traits the lifecycle logic is written against
//! - The Socket.IO packet codec and the WebSocket transport
//! - The per-terminal connection supervisor and its keep-alive driver
//! - The fleet coordinator that runs one supervisor per terminal

pub mod keepalive;
pub mod manager;
pub mod protocol;
pub mod supervisor;
pub mod tls;
pub mod websocket;

// Re-export public types for easier access
pub use keepalive::KeepAliveDriver;
pub use manager::{Fleet, RunningFleet, ShutdownReport};
pub use supervisor::{Supervisor, SupervisorHandle, SupervisorState};
pub use websocket::WebSocketConnector;

use crate::common::TerminalIdentity;
use crate::config::ConnectionConfig;
use crate::errors::Result;

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Everything needed to open one terminal's connection.
///
/// `Debug` shows only the masked endpoint.
#[derive(Clone)]
pub struct ConnectTarget {
    pub terminal: TerminalIdentity,
    pub url: Url,
    pub masked: String,
}

impl ConnectTarget {
    pub fn new(config: &ConnectionConfig, terminal: TerminalIdentity) -> Result<Self> {
        let url = config.endpoint_for(&terminal)?;
        let masked = config.masked_endpoint(&terminal);
        Ok(Self {
            terminal,
            url,
            masked,
        })
    }
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("terminal", &self.terminal)
            .field("url", &self.masked)
            .finish()
    }
}

/// Something received from the server while a session is open
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A named Socket.IO event; `data` is the JSON-rendered payload
    ServerEvent { name: String, data: String },
    /// Transport-native heartbeat observed and answered
    Heartbeat,
}

/// Opens authenticated sessions
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and authenticate.
    ///
    /// Returns `AuthRejected` when the gateway refuses the token and `ConnectFailed` for
    /// anything that may succeed on a later attempt.
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>>;
}

/// One open, authenticated connection
#[async_trait]
pub trait Session: Send {
    /// Handle the keep-alive driver uses to probe this session
    fn prober(&self) -> Arc<dyn Prober>;

    /// Next inbound event. An error means the session is gone.
    async fn next_event(&mut self) -> Result<SessionEvent>;

    /// Best-effort graceful close
    async fn close(&mut self) -> Result<()>;
}

/// Sends application-level liveness probes on an open session
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_target_debug_is_masked() {
        let config = ConnectionConfig::with_token("secret123");
        let target = ConnectTarget::new(&config, TerminalIdentity::new("mid1", "tid1")).unwrap();

        let rendered = format!("{:?}", target);
        assert!(!rendered.contains("secret123"));
        assert!(rendered.contains("token=***"));
        assert!(target.url.as_str().contains("secret123"));
    }
}
