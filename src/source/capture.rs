//! Acquisition source backed by the supervised packet-capture subprocess

use crate::daemon::supervisor::{CaptureCommand, CaptureSupervisor};
use crate::error::Result;
use tokio::io::{BufReader, Lines};
use tokio::process::ChildStdout;
use tokio::sync::{mpsc, watch};

/// Reads lines from the capture child's stdout, handing control back to the
/// supervisor whenever the stream closes.
pub struct CaptureSource {
    supervisor: CaptureSupervisor,
    lines: Lines<BufReader<ChildStdout>>,
}

impl CaptureSource {
    /// Start the supervised capture process. Failing to start it at all is
    /// fatal for the run; later exits are handled by restarting.
    pub async fn open(command: CaptureCommand) -> Result<Self> {
        let mut supervisor = CaptureSupervisor::new(command);
        let lines = supervisor.start().await?;
        Ok(Self { supervisor, lines })
    }

    /// Source task body: feed captured lines into the channel until
    /// shutdown, restarting the child whenever its stream ends.
    pub async fn run(mut self, tx: mpsc::Sender<String>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                line = self.lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            // Pipeline went away; stop producing.
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        // End of stream: the child exited. The supervisor's
                        // restart floor bounds how fast this can loop.
                        match self.supervisor.restart().await {
                            Ok(lines) => self.lines = lines,
                            Err(e) => {
                                tracing::error!("Capture restart failed: {}", e);
                            }
                        }
                    }
                }
            }
        }

        self.supervisor.terminate().await;
    }
}
