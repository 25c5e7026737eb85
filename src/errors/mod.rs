//! Domain-specific error types for the terminal harness
//!
//! This module provides structured error types using `thiserror`. The variants
//! mirror how a failure is handled: configuration problems abort the process,
//! connect failures are retried, auth rejections are permanent for one terminal,
//! and transport errors start a reconnect episode.

use thiserror::Error;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Startup configuration errors (missing token, bad terminal list, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport refused, timed out, or failed the handshake
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The gateway rejected the token
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Mid-session transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A supervisor did not stop within the shutdown grace period
    #[error("Shutdown timeout: {0}")]
    ShutdownTimeout(String),

    /// The fleet as a whole could not keep running
    #[error("Fleet error: {0}")]
    Fleet(String),

    /// Malformed or unsupported Engine.IO / Socket.IO packet
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// File and signal I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// TLS configuration errors
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

/// Result type using HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Process exit code for a clean shutdown
pub const EXIT_OK: i32 = 0;
/// Process exit code for invalid startup configuration
pub const EXIT_CONFIG: i32 = 1;
/// Process exit code for a fatal error during operation
pub const EXIT_FATAL: i32 = 2;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_config_context(self, msg: &str) -> Result<T>;
    fn with_transport_context(self, msg: &str) -> Result<T>;
    fn with_protocol_context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_config_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| HarnessError::Config(format!("{}: {}", msg, e)))
    }

    fn with_transport_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| HarnessError::Transport(format!("{}: {}", msg, e)))
    }

    fn with_protocol_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| HarnessError::Protocol(format!("{}: {}", msg, e)))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn with_config_context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| HarnessError::Config(msg.to_string()))
    }

    fn with_transport_context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| HarnessError::Transport(msg.to_string()))
    }

    fn with_protocol_context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| HarnessError::Protocol(msg.to_string()))
    }
}

// Convenience constructors
impl HarnessError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        HarnessError::Config(msg.into())
    }

    pub fn connect<S: Into<String>>(msg: S) -> Self {
        HarnessError::ConnectFailed(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        HarnessError::Transport(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        HarnessError::Protocol(msg.into())
    }

    /// Short name of the error kind, used in lifecycle events
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Config(_) => "ConfigError",
            HarnessError::ConnectFailed(_) => "ConnectFailed",
            HarnessError::AuthRejected(_) => "AuthRejected",
            HarnessError::Transport(_) | HarnessError::WebSocket(_) => "TransportError",
            HarnessError::ShutdownTimeout(_) => "ShutdownTimeout",
            HarnessError::Fleet(_) => "FleetError",
            HarnessError::Protocol(_) | HarnessError::Json(_) => "ProtocolError",
            HarnessError::UrlParse(_) | HarnessError::Io(_) | HarnessError::Tls(_) => "ConnectFailed",
        }
    }

    /// Whether another connect attempt with the same credentials could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, HarnessError::AuthRejected(_) | HarnessError::Config(_))
    }

    /// Process exit code for an error that ends the process
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Config(_) => EXIT_CONFIG,
            _ => EXIT_FATAL,
        }
    }
}

impl HarnessError {
    /// Classify a non-101 answer to the WebSocket upgrade request
    pub fn from_handshake_status(status: http::StatusCode) -> Self {
        // 401/403 mean the token is bad, not that the gateway is down
        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            HarnessError::AuthRejected(format!("gateway answered {}", status))
        } else {
            HarnessError::ConnectFailed(format!("gateway answered {}", status))
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HarnessError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        if let tokio_tungstenite::tungstenite::Error::Http(response) = &err {
            return HarnessError::from_handshake_status(response.status());
        }
        HarnessError::WebSocket(Box::new(err))
    }
}
