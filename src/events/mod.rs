//! Lifecycle events and the sink that renders them
//!
//! Supervisors and the fleet coordinator never log connection lifecycle directly. They push
//! [`LifecycleEvent`]s into an unbounded channel and a single [`EventSink`] task renders them,
//! so producers never block on output and each producer's own order is kept.

pub mod format;

use crate::common::TerminalIdentity;
use crate::constants::REDACTED;

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};

/// `Disconnected` reason for a requested close
pub const SHUTDOWN_REASON: &str = "shutdown";

/// What happened
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A supervisor started; `target` is already masked
    Connecting { target: String },
    Connected,
    Disconnected { reason: String },
    Error {
        kind: &'static str,
        attempt: Option<(u32, u32)>,
    },
    ReconnectAttempt { attempt: u32, max: u32 },
    StatusTick { connected: Vec<TerminalIdentity> },
    /// Any named server event, including plain `message` events
    ServerEvent { name: String, data: String },
    /// Engine.IO ping answered with a pong
    Heartbeat,
}

/// One immutable lifecycle record
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// `None` for fleet-wide events
    pub terminal: Option<TerminalIdentity>,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl LifecycleEvent {
    pub fn terminal(terminal: &TerminalIdentity, kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            terminal: Some(terminal.clone()),
            kind,
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }

    pub fn fleet(kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            terminal: None,
            kind,
            timestamp: Utc::now(),
            detail: detail.into(),
        }
    }

    /// Level this event is rendered at
    pub fn level(&self) -> Level {
        match &self.kind {
            EventKind::Error {
                kind: "ShutdownTimeout",
                ..
            } => Level::WARN,
            EventKind::Error { .. } => Level::ERROR,
            EventKind::Disconnected { reason } if reason == SHUTDOWN_REASON => Level::INFO,
            EventKind::Disconnected { .. } => Level::WARN,
            EventKind::ReconnectAttempt { attempt, .. } if *attempt > 1 => Level::WARN,
            EventKind::Heartbeat => Level::DEBUG,
            _ => Level::INFO,
        }
    }

    /// Message text, including the terminal prefix for terminal-scoped events
    pub fn message(&self) -> String {
        let body = match &self.kind {
            EventKind::Connecting { target } => format!("Connecting to {}", target),
            EventKind::Connected => "Connected to server".to_string(),
            EventKind::Disconnected { reason } => format!("Disconnected from server ({})", reason),
            EventKind::Error {
                kind,
                attempt: Some((attempt, max)),
            } => format!("{} (attempt {}/{})", kind, attempt, max),
            EventKind::Error { kind, attempt: None } => kind.to_string(),
            EventKind::ReconnectAttempt { attempt, max } => {
                format!("Connection attempt {}/{}", attempt, max)
            }
            EventKind::StatusTick { connected } if connected.is_empty() => {
                "STATUS: No terminals connected".to_string()
            }
            EventKind::StatusTick { connected } => format!(
                "STATUS: {} terminals connected: [{}]",
                connected.len(),
                connected
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            EventKind::ServerEvent { name, data } if name == "message" => {
                format!("Message: {}", data)
            }
            EventKind::ServerEvent { name, data } => format!("Event: {}, Data: {}", name, data),
            EventKind::Heartbeat => "PING received, PONG sent".to_string(),
        };

        let body = if self.detail.is_empty() {
            body
        } else {
            format!("{}: {}", body, self.detail)
        };

        match &self.terminal {
            Some(terminal) => format!("[{}] {}", terminal, body),
            None => body,
        }
    }
}

/// Replaces every occurrence of the token in rendered text.
///
/// Both the literal token and its percent-encoded form are masked, so a URL echoed back
/// in a transport error is covered too.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new(token: &str) -> Self {
        let mut secrets = Vec::new();
        if !token.is_empty() {
            let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
            if encoded != token {
                secrets.push(encoded);
            }
            secrets.push(token.to_string());
        }
        Self { secrets }
    }

    pub fn scrub<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(text);
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = Cow::Owned(out.replace(secret.as_str(), REDACTED));
            }
        }
        out
    }
}

/// Producer side of the event channel, cloned into every supervisor
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl EventSender {
    /// Never blocks; events emitted after the sink is gone are dropped
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

/// Consumer side: renders events as log lines
#[derive(Debug)]
pub struct EventSink {
    rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    redactor: Redactor,
}

/// Create a connected sender/sink pair
pub fn channel(redactor: Redactor) -> (EventSender, EventSink) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventSink { rx, redactor })
}

impl EventSink {
    /// Receive the next raw event without rendering it
    pub async fn next(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }

    /// Render one event to the final, redacted log line text
    pub fn render(&self, event: &LifecycleEvent) -> String {
        self.redactor.scrub(&event.message()).into_owned()
    }

    /// Render events until every sender has been dropped
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            let line = self.render(&event);
            match event.level() {
                Level::ERROR => error!("{}", line),
                Level::WARN => warn!("{}", line),
                Level::INFO => info!("{}", line),
                _ => debug!("{}", line),
            }
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
