//! OS signal handling
//!
//! [`ShutdownSignal::install`] registers the listeners immediately, so a signal that arrives
//! while the fleet is still starting is not left to the default OS action. On Unix the first
//! SIGINT, SIGTERM or SIGQUIT completes [`ShutdownSignal::recv`]; elsewhere only Ctrl-C does.

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Registered shutdown listeners
#[cfg(unix)]
pub struct ShutdownSignal {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
}

#[cfg(unix)]
impl ShutdownSignal {
    /// Must be called from within the runtime
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    pub async fn recv(mut self) -> std::io::Result<()> {
        tokio::select! {
            _ = self.sigint.recv() => {},
            _ = self.sigterm.recv() => {},
            _ = self.sigquit.recv() => {},
        }
        Ok(())
    }
}

#[cfg(windows)]
pub struct ShutdownSignal {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    pub async fn recv(mut self) -> std::io::Result<()> {
        self.ctrl_c.recv().await;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_before_first_poll_is_caught() {
        let shutdown = ShutdownSignal::install().unwrap();

        // delivered before recv() is ever polled
        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .expect("Failed to run kill");
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown.recv())
            .await
            .expect("SIGTERM was not observed")
            .unwrap();
    }
}
