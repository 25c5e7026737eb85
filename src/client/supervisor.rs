//! Per-terminal connection supervisor
//!
//! One supervisor owns one terminal's connection for the whole run: it connects with a
//! bounded number of attempts, keeps the session alive, reconnects after a drop and closes
//! the session on stop. Every state change goes through [`Supervisor::transition`], which
//! also keeps the fleet's [`ConnectedSet`] in step with the Connected state.

use crate::client::keepalive::KeepAliveDriver;
use crate::client::{ConnectTarget, Connector, Session, SessionEvent};
use crate::common::{ConnectedSet, SupervisorId, TerminalIdentity};
use crate::config::ConnectionConfig;
use crate::errors::{HarnessError, Result};
use crate::events::{EventKind, EventSender, LifecycleEvent, SHUTDOWN_REASON};
use crate::metrics::FleetMetrics;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Failed,
}

impl SupervisorState {
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Idle)
                | (Connected, Reconnecting)
                | (Connected, Disconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Failed)
                | (Reconnecting, Disconnecting)
                | (Disconnecting, Idle)
        )
    }
}

/// Collaborators shared by every supervisor in a fleet
#[derive(Clone)]
pub struct SupervisorContext {
    pub config: Arc<ConnectionConfig>,
    pub connector: Arc<dyn Connector>,
    pub connected: ConnectedSet,
    pub events: EventSender,
    pub metrics: Arc<FleetMetrics>,
}

enum Establish {
    Connected(Box<dyn Session>),
    Stopped,
    GaveUp(HarnessError),
}

enum Ending {
    Stopped(Box<dyn Session>),
    Lost(HarnessError),
}

pub struct Supervisor {
    id: SupervisorId,
    target: ConnectTarget,
    ctx: SupervisorContext,
    state: watch::Sender<SupervisorState>,
    stop: CancellationToken,
}

impl Supervisor {
    pub fn new(
        id: SupervisorId,
        target: ConnectTarget,
        ctx: SupervisorContext,
        stop: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            id,
            target,
            ctx,
            state,
            stop,
        }
    }

    /// Run on its own task
    pub fn start(self) -> SupervisorHandle {
        let id = self.id;
        let terminal = self.target.terminal.clone();
        let state = self.state.subscribe();
        let stop = self.stop.clone();
        let task = tokio::spawn(self.run());
        SupervisorHandle {
            id,
            terminal,
            state,
            stop,
            task: Some(task),
        }
    }

    fn emit(&self, kind: EventKind, detail: impl Into<String>) {
        self.ctx
            .events
            .emit(LifecycleEvent::terminal(&self.target.terminal, kind, detail));
    }

    fn current(&self) -> SupervisorState {
        *self.state.borrow()
    }

    async fn transition(&self, next: SupervisorState) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            current,
            next
        );

        if current == SupervisorState::Connected {
            self.ctx.connected.remove(self.id).await;
            self.ctx
                .metrics
                .record_left_connected(self.id, next == SupervisorState::Reconnecting)
                .await;
        }
        if next == SupervisorState::Connected {
            self.ctx
                .connected
                .insert(self.id, self.target.terminal.clone())
                .await;
            self.ctx.metrics.record_connected(self.id).await;
        }

        self.state.send_replace(next);
        debug!(
            "[{}] Supervisor {} {:?} -> {:?}",
            self.target.terminal, self.id, current, next
        );
    }

    /// Drive the lifecycle until stopped or out of attempts; returns the final state
    pub async fn run(self) -> SupervisorState {
        self.transition(SupervisorState::Connecting).await;
        self.emit(
            EventKind::Connecting {
                target: self.target.masked.clone(),
            },
            "",
        );

        loop {
            let session = match self.establish().await {
                Establish::Connected(session) => session,
                Establish::Stopped => return self.shut_down(None).await,
                Establish::GaveUp(err) => return self.give_up(err).await,
            };

            self.transition(SupervisorState::Connected).await;
            self.emit(EventKind::Connected, "");

            match self.maintain(session).await {
                Ending::Stopped(session) => return self.shut_down(Some(session)).await,
                Ending::Lost(err) => {
                    self.transition(SupervisorState::Reconnecting).await;
                    self.emit(
                        EventKind::Disconnected {
                            reason: err.kind().to_string(),
                        },
                        err.to_string(),
                    );
                }
            }
        }
    }

    /// One bounded sequence of connect attempts
    async fn establish(&self) -> Establish {
        let config = &self.ctx.config;
        let max = config.max_retry_attempts;

        for attempt in 1..=max {
            self.emit(EventKind::ReconnectAttempt { attempt, max }, "");
            self.ctx.metrics.record_connect_attempt(self.id).await;

            let outcome = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Establish::Stopped,
                outcome = timeout(config.connect_timeout, self.ctx.connector.connect(&self.target)) => outcome,
            };

            let err = match outcome {
                Ok(Ok(session)) => return Establish::Connected(session),
                Ok(Err(err)) => err,
                Err(_) => HarnessError::connect(format!(
                    "attempt timed out after {:.1}s",
                    config.connect_timeout.as_secs_f64()
                )),
            };

            if !err.is_retryable() {
                if let HarnessError::AuthRejected(_) = err {
                    self.ctx.metrics.record_auth_rejected(self.id).await;
                }
                return Establish::GaveUp(err);
            }

            self.ctx.metrics.record_connect_failure(self.id).await;
            self.emit(
                EventKind::Error {
                    kind: err.kind(),
                    attempt: Some((attempt, max)),
                },
                err.to_string(),
            );

            if attempt < max {
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => return Establish::Stopped,
                    _ = sleep(config.retry_delay) => {}
                }
            }
        }

        Establish::GaveUp(HarnessError::connect(format!(
            "failed to connect after {} attempts",
            max
        )))
    }

    async fn maintain(&self, mut session: Box<dyn Session>) -> Ending {
        let (failures_tx, mut failures) = mpsc::channel(1);
        let keepalive = KeepAliveDriver::start(
            self.id,
            session.prober(),
            self.ctx.config.keepalive_interval,
            failures_tx,
            self.ctx.metrics.clone(),
            &self.stop,
        );

        let lost = loop {
            let step = tokio::select! {
                biased;
                _ = self.stop.cancelled() => None,
                Some(err) = failures.recv() => Some(Err(err)),
                event = session.next_event() => Some(event),
            };

            match step {
                None => break None,
                Some(Ok(event)) => self.forward(event),
                Some(Err(err)) => break Some(err),
            }
        };

        keepalive.stop().await;
        match lost {
            None => Ending::Stopped(session),
            Some(err) => Ending::Lost(err),
        }
    }

    fn forward(&self, event: SessionEvent) {
        match event {
            SessionEvent::ServerEvent { name, data } => {
                self.ctx.metrics.record_server_event();
                self.emit(EventKind::ServerEvent { name, data }, "");
            }
            SessionEvent::Heartbeat => {
                self.ctx.metrics.record_heartbeat();
                self.emit(EventKind::Heartbeat, "");
            }
        }
    }

    async fn shut_down(&self, session: Option<Box<dyn Session>>) -> SupervisorState {
        if self.current() == SupervisorState::Connecting {
            self.transition(SupervisorState::Idle).await;
            return SupervisorState::Idle;
        }

        self.transition(SupervisorState::Disconnecting).await;
        if let Some(mut session) = session {
            let close_timeout = self.ctx.config.close_timeout;
            let detail = match timeout(close_timeout, session.close()).await {
                Ok(Ok(())) => String::new(),
                Ok(Err(e)) => format!("close failed: {}", e),
                Err(_) => format!(
                    "close timed out after {:.1}s",
                    close_timeout.as_secs_f64()
                ),
            };
            self.emit(
                EventKind::Disconnected {
                    reason: SHUTDOWN_REASON.to_string(),
                },
                detail,
            );
        }
        self.transition(SupervisorState::Idle).await;
        SupervisorState::Idle
    }

    async fn give_up(&self, err: HarnessError) -> SupervisorState {
        self.transition(SupervisorState::Failed).await;
        self.ctx.metrics.record_failed(self.id).await;
        self.emit(
            EventKind::Error {
                kind: err.kind(),
                attempt: None,
            },
            format!("giving up: {}", err),
        );
        SupervisorState::Failed
    }
}

/// Owner-side view of a running supervisor
pub struct SupervisorHandle {
    id: SupervisorId,
    terminal: TerminalIdentity,
    state: watch::Receiver<SupervisorState>,
    stop: CancellationToken,
    task: Option<JoinHandle<SupervisorState>>,
}

impl SupervisorHandle {
    pub fn id(&self) -> SupervisorId {
        self.id
    }

    pub fn terminal(&self) -> &TerminalIdentity {
        &self.terminal
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Ask the supervisor to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Resolves once the supervisor task has ended, for any reason
    pub async fn finished(&self) {
        let mut state = self.state.clone();
        while state.changed().await.is_ok() {}
    }

    /// Stop and wait for the final state
    pub async fn stop(mut self) -> SupervisorState {
        self.stop.cancel();
        match self.task.take() {
            Some(task) => self.joined(task.await),
            None => self.state(),
        }
    }

    /// Stop and wait until `deadline`; a supervisor still running then is aborted
    pub async fn stop_by(mut self, deadline: Instant) -> Result<SupervisorState> {
        self.stop.cancel();
        let Some(mut task) = self.task.take() else {
            return Ok(self.state());
        };

        match timeout_at(deadline, &mut task).await {
            Ok(joined) => Ok(self.joined(joined)),
            Err(_) => {
                task.abort();
                Err(HarnessError::ShutdownTimeout(format!(
                    "supervisor {} did not stop within the grace period (last state {:?})",
                    self.id,
                    self.state()
                )))
            }
        }
    }

    fn joined(
        &self,
        joined: std::result::Result<SupervisorState, tokio::task::JoinError>,
    ) -> SupervisorState {
        match joined {
            Ok(state) => state,
            Err(e) => {
                error!("[{}] Supervisor {} task failed: {}", self.terminal, self.id, e);
                SupervisorState::Failed
            }
        }
    }
}
