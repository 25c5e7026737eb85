//! Periodic application-level probes on a live session

use crate::client::Prober;
use crate::common::SupervisorId;
use crate::errors::HarnessError;
use crate::metrics::FleetMetrics;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sends a probe every `interval` until stopped or until a probe fails.
///
/// The first probe goes out one interval after start. A failed probe is reported once on
/// `failures` and the driver exits; it never reconnects on its own.
pub struct KeepAliveDriver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl KeepAliveDriver {
    pub fn start(
        id: SupervisorId,
        prober: Arc<dyn Prober>,
        interval: Duration,
        failures: mpsc::Sender<HarnessError>,
        metrics: Arc<FleetMetrics>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = prober.probe() => result,
                };

                metrics.record_probe(id, result.is_ok()).await;
                if let Err(e) = result {
                    debug!("Supervisor {} keep-alive failed: {}", id, e);
                    let _ = failures.send(e).await;
                    break;
                }
            }
        });

        Self { cancel, handle }
    }

    /// Stop and wait for the driver task; at most one in-flight probe is abandoned
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProber {
        calls: AtomicU32,
        fail_on: Option<u32>,
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(n) == self.fail_on {
                return Err(HarnessError::transport("socket closed"));
            }
            Ok(())
        }
    }

    fn prober(fail_on: Option<u32>) -> Arc<CountingProber> {
        Arc::new(CountingProber {
            calls: AtomicU32::new(0),
            fail_on,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_on_interval() {
        let p = prober(None);
        let (tx, _rx) = mpsc::channel(1);
        let metrics = Arc::new(FleetMetrics::new());
        let driver = KeepAliveDriver::start(
            SupervisorId(0),
            p.clone(),
            Duration::from_secs(20),
            tx,
            metrics.clone(),
            &CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(42)).await;
        assert_eq!(p.calls.load(Ordering::SeqCst), 3);

        driver.stop().await;
        assert_eq!(metrics.total_probes_sent.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported_once_and_driver_exits() {
        let p = prober(Some(2));
        let (tx, mut rx) = mpsc::channel(1);
        let driver = KeepAliveDriver::start(
            SupervisorId(0),
            p.clone(),
            Duration::from_secs(1),
            tx,
            Arc::new(FleetMetrics::new()),
            &CancellationToken::new(),
        );

        let err = rx.recv().await.unwrap();
        assert_eq!(err.kind(), "TransportError");
        // sender dropped with the task
        assert!(rx.recv().await.is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
        driver.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_driver() {
        let p = prober(None);
        let parent = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(1);
        let driver = KeepAliveDriver::start(
            SupervisorId(0),
            p.clone(),
            Duration::from_secs(1),
            tx,
            Arc::new(FleetMetrics::new()),
            &parent,
        );

        parent.cancel();
        assert!(rx.recv().await.is_none());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
        driver.stop().await;
    }
}
