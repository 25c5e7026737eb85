//! Fleet coordinator: one supervisor per terminal plus the periodic status report

use crate::client::supervisor::{Supervisor, SupervisorContext, SupervisorHandle, SupervisorState};
use crate::client::{ConnectTarget, Connector};
use crate::common::{ConnectedSet, SupervisorId, TerminalIdentity};
use crate::config::ConnectionConfig;
use crate::errors::{HarnessError, Result};
use crate::events::{EventKind, EventSender, LifecycleEvent};
use crate::metrics::FleetMetrics;

use futures_util::future::join_all;
use std::future::{Future, pending};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a fleet shutdown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    /// Size of the connected set when shutdown began
    pub connected: usize,
    /// Supervisors that reached Idle
    pub stopped: usize,
    /// Supervisors that had already given up
    pub failed: usize,
    /// Supervisors aborted after the grace period
    pub abandoned: Vec<TerminalIdentity>,
}

impl ShutdownReport {
    /// Every supervisor gave up before shutdown was requested
    pub fn all_failed(&self) -> bool {
        self.failed > 0 && self.stopped == 0 && self.abandoned.is_empty()
    }
}

/// Owns the shared collaborators for a run
pub struct Fleet {
    ctx: SupervisorContext,
}

impl Fleet {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>, events: EventSender) -> Self {
        Self {
            ctx: SupervisorContext {
                config: Arc::new(config),
                connector,
                connected: ConnectedSet::new(),
                events,
                metrics: Arc::new(FleetMetrics::new()),
            },
        }
    }

    pub fn connected(&self) -> ConnectedSet {
        self.ctx.connected.clone()
    }

    pub fn metrics(&self) -> Arc<FleetMetrics> {
        self.ctx.metrics.clone()
    }

    /// Start one supervisor per entry, in list order, then the status loop.
    ///
    /// Every endpoint is resolved before anything is spawned, so a bad template fails the
    /// whole start instead of leaving a partial fleet behind.
    pub async fn start(&self, terminals: Vec<TerminalIdentity>) -> Result<RunningFleet> {
        let (running, _) = self.start_until(terminals, &mut pending::<()>()).await?;
        Ok(running)
    }

    /// Like [`Fleet::start`], but stops launching supervisors once `interrupt` resolves.
    ///
    /// The supervisors started so far are still returned, together with the interrupt's output,
    /// so the caller can shut them down.
    async fn start_until<I>(
        &self,
        terminals: Vec<TerminalIdentity>,
        interrupt: &mut I,
    ) -> Result<(RunningFleet, Option<I::Output>)>
    where
        I: Future + Unpin,
    {
        let targets = terminals
            .into_iter()
            .map(|terminal| ConnectTarget::new(&self.ctx.config, terminal))
            .collect::<Result<Vec<_>>>()?;

        let root = CancellationToken::new();
        let stagger = self.ctx.config.start_stagger;
        let mut supervisors = Vec::with_capacity(targets.len());
        let mut interrupted = None;

        for (index, target) in targets.into_iter().enumerate() {
            let id = SupervisorId::from(index);
            self.ctx
                .metrics
                .init_terminal(id, target.terminal.clone())
                .await;

            let supervisor = Supervisor::new(id, target, self.ctx.clone(), root.child_token());
            supervisors.push(supervisor.start());

            // Small delay between starts to avoid a thundering herd on the gateway
            if !stagger.is_zero() {
                tokio::select! {
                    biased;
                    output = &mut *interrupt => {
                        interrupted = Some(output);
                        break;
                    }
                    _ = tokio::time::sleep(stagger) => {}
                }
            }
        }

        let status = tokio::spawn(status_loop(
            self.ctx.connected.clone(),
            self.ctx.events.clone(),
            self.ctx.config.status_interval,
            root.child_token(),
        ));

        let running = RunningFleet {
            supervisors,
            status,
            root,
            ctx: self.ctx.clone(),
        };
        Ok((running, interrupted))
    }

    /// Run until `signal` resolves or every supervisor has ended, then shut down.
    ///
    /// `signal` is watched from the first supervisor launch on; a signal during the staggered
    /// start stops launching and shuts down the supervisors already running.
    pub async fn run<F>(&self, terminals: Vec<TerminalIdentity>, signal: F) -> Result<ShutdownReport>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let count = terminals.len();
        let mut signal = pin!(signal);
        let (running, interrupted) = self.start_until(terminals, &mut signal).await?;

        let signal_result = match interrupted {
            Some(result) => {
                info!(
                    "Shutdown signal received after starting {} of {} terminal supervisors",
                    running.handles().len(),
                    count
                );
                result
            }
            None => {
                info!("Started {} terminal supervisors", count);
                tokio::select! {
                    result = &mut signal => {
                        info!("Shutdown signal received, disconnecting all terminals...");
                        result
                    }
                    _ = running.all_finished() => {
                        warn!("No terminal supervisors left running");
                        Ok(())
                    }
                }
            }
        };

        let report = running.shutdown().await;
        info!(
            "Shutdown complete: {} stopped, {} failed, {} abandoned",
            report.stopped,
            report.failed,
            report.abandoned.len()
        );

        signal_result
            .map_err(|e| HarnessError::Fleet(format!("Signal handling failed: {}", e)))?;
        Ok(report)
    }
}

/// A started fleet
pub struct RunningFleet {
    supervisors: Vec<SupervisorHandle>,
    status: JoinHandle<()>,
    root: CancellationToken,
    ctx: SupervisorContext,
}

impl RunningFleet {
    pub fn handles(&self) -> &[SupervisorHandle] {
        &self.supervisors
    }

    /// Resolves once every supervisor task has ended
    pub async fn all_finished(&self) {
        join_all(self.supervisors.iter().map(|h| h.finished())).await;
    }

    /// Stop every supervisor concurrently and wait at most the grace period.
    ///
    /// Supervisors still running at the deadline are aborted and removed from the connected
    /// set, so the set is empty once this returns.
    pub async fn shutdown(self) -> ShutdownReport {
        let deadline = Instant::now() + self.ctx.config.shutdown_grace;
        let connected = self.ctx.connected.len().await;
        self.root.cancel();

        let results = join_all(self.supervisors.into_iter().map(|handle| {
            let id = handle.id();
            let terminal = handle.terminal().clone();
            async move { (id, terminal, handle.stop_by(deadline).await) }
        }))
        .await;

        let mut report = ShutdownReport {
            connected,
            ..Default::default()
        };
        for (id, terminal, result) in results {
            match result {
                Ok(SupervisorState::Failed) => report.failed += 1,
                Ok(_) => report.stopped += 1,
                Err(err) => {
                    self.ctx.connected.remove(id).await;
                    self.ctx.events.emit(LifecycleEvent::terminal(
                        &terminal,
                        EventKind::Error {
                            kind: err.kind(),
                            attempt: None,
                        },
                        err.to_string(),
                    ));
                    report.abandoned.push(terminal);
                }
            }
        }

        let _ = self.status.await;
        report
    }
}

/// Snapshot of the connected set as a status event
pub async fn status_event(connected: &ConnectedSet) -> LifecycleEvent {
    LifecycleEvent::fleet(
        EventKind::StatusTick {
            connected: connected.terminals().await,
        },
        "",
    )
}

async fn status_loop(
    connected: ConnectedSet,
    events: EventSender,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        events.emit(status_event(&connected).await);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_event_lists_connected_in_order() {
        let connected = ConnectedSet::new();
        connected
            .insert(SupervisorId(1), TerminalIdentity::new("mid2", "test-mid2"))
            .await;
        connected
            .insert(SupervisorId(0), TerminalIdentity::new("mid1", "test-mid1"))
            .await;

        let event = status_event(&connected).await;
        assert!(event.terminal.is_none());
        assert_eq!(
            event.message(),
            "STATUS: 2 terminals connected: [MID:mid1 TID:test-mid1, MID:mid2 TID:test-mid2]"
        );
    }

    #[tokio::test]
    async fn test_status_event_when_empty() {
        let event = status_event(&ConnectedSet::new()).await;
        assert_eq!(event.message(), "STATUS: No terminals connected");
    }

    #[test]
    fn test_report_all_failed() {
        let report = ShutdownReport {
            failed: 2,
            ..Default::default()
        };
        assert!(report.all_failed());

        let mixed = ShutdownReport {
            stopped: 1,
            failed: 2,
            ..Default::default()
        };
        assert!(!mixed.all_failed());
        assert!(!ShutdownReport::default().all_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_loop_ticks_until_cancelled() {
        let connected = ConnectedSet::new();
        let (events, mut sink) = crate::events::channel(crate::events::Redactor::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(status_loop(
            connected,
            events,
            Duration::from_secs(25),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(60)).await;
        cancel.cancel();
        task.await.unwrap();

        let mut ticks = 0;
        while let Some(event) = sink.next().await {
            assert!(matches!(event.kind, EventKind::StatusTick { .. }));
            ticks += 1;
        }
        assert_eq!(ticks, 2);
    }
}
