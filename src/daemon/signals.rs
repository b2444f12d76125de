// Signal handling for graceful daemon shutdown and pattern reload

use crate::error::{Result, WildgateError};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};

/// What a received signal asks the daemon to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// SIGTERM or SIGINT: finish the in-flight observation and exit
    Shutdown,
    /// SIGHUP: reload the wildcard pattern set immediately
    Reload,
}

/// Listens for the Unix signals the daemon reacts to
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate()).map_err(|e| WildgateError::Io {
            source: e,
            context: "Failed to setup SIGTERM handler".to_string(),
        })?;
        let sigint = signal(SignalKind::interrupt()).map_err(|e| WildgateError::Io {
            source: e,
            context: "Failed to setup SIGINT handler".to_string(),
        })?;
        let sighup = signal(SignalKind::hangup()).map_err(|e| WildgateError::Io {
            source: e,
            context: "Failed to setup SIGHUP handler".to_string(),
        })?;

        Ok(Self {
            sigterm,
            sigint,
            sighup,
        })
    }

    /// Wait for the next signal of interest
    pub async fn wait(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                DaemonSignal::Shutdown
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                DaemonSignal::Shutdown
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                DaemonSignal::Reload
            }
        }
    }
}
