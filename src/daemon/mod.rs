// Daemon module: lifecycle and main loop of the discovery engine

mod pipeline;
mod process;
mod signals;
pub mod supervisor;

pub use pipeline::{DiscoveryPipeline, PipelineStats};
pub use process::ProcessManager;
pub use signals::{DaemonSignal, SignalHandler};
pub use supervisor::{CaptureCommand, CaptureSupervisor, SupervisorState};

use crate::config::{expand_tilde, Config, SourceMode};
use crate::error::{Result, WildgateError};
use crate::extract::{CaptureLineExtractor, LineExtractor, ResolverLogExtractor};
use crate::ledger::DiscoveryLedger;
use crate::source::{CaptureSource, TailSource};
use crate::table::PfTable;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Daemon status for the `status` command
#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { pid: Option<i32> },
    Stopped,
}

/// Owns one run of the discovery daemon
pub struct Daemon {
    config: Config,
    process_manager: ProcessManager,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let pid_file = expand_tilde(&config.paths.pid_file);
        let process_manager = ProcessManager::new(pid_file);
        Self {
            config,
            process_manager,
        }
    }

    /// Run the pipeline in the foreground until a shutdown signal.
    /// Used directly by `test` mode and by the daemonized child.
    pub async fn run_foreground(&mut self, mode: Option<SourceMode>) -> Result<()> {
        self.process_manager.acquire()?;
        tracing::info!("Discovery daemon starting");

        let result = self.run_pipeline(mode.unwrap_or(self.config.source.mode)).await;

        if let Err(e) = self.process_manager.release() {
            tracing::error!("Failed to release PID file: {}", e);
        }
        result
    }

    async fn run_pipeline(&self, mode: SourceMode) -> Result<()> {
        let ledger = DiscoveryLedger::open(&expand_tilde(&self.config.paths.discovered_file))?;
        tracing::info!("Loaded {} known domains", ledger.len());

        let sink = PfTable::new(
            self.config.table.name.clone(),
            self.config.table.control_command.clone(),
            Duration::from_secs(self.config.table.timeout_secs),
        );

        let extractor: Box<dyn LineExtractor> = match mode {
            SourceMode::Capture => Box::new(CaptureLineExtractor::new()?),
            SourceMode::Log => Box::new(ResolverLogExtractor::new()?),
        };

        let (tx, mut rx) = mpsc::channel::<String>(self.config.pipeline.channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let source_handle = match mode {
            SourceMode::Log => {
                let tail = TailSource::open(
                    &expand_tilde(&self.config.source.resolver_log),
                    &expand_tilde(&self.config.paths.offset_file),
                    Duration::from_millis(self.config.source.poll_interval_ms),
                )?;
                tracing::info!("Tailing resolver log {:?}", self.config.source.resolver_log);
                tokio::spawn(tail.run(tx, shutdown_rx))
            }
            SourceMode::Capture => {
                let command = CaptureCommand::from_config(&self.config.capture);
                let capture = CaptureSource::open(command).await?;
                tokio::spawn(capture.run(tx, shutdown_rx))
            }
        };

        let mut pipeline = DiscoveryPipeline::new(
            expand_tilde(&self.config.paths.patterns_file),
            ledger,
            sink,
            extractor,
        );

        let mut signal_handler = SignalHandler::new()?;
        let mut reload_timer = tokio::time::interval(Duration::from_secs(
            self.config.pipeline.reload_interval_secs,
        ));
        reload_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // An interval's first tick completes immediately; the patterns were
        // just loaded, so consume it.
        reload_timer.tick().await;

        tracing::info!("Discovery pipeline running ({:?} source)", mode);

        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => pipeline.process_line(&line).await,
                    None => {
                        tracing::warn!("Acquisition source stopped, shutting down");
                        break;
                    }
                },

                _ = reload_timer.tick() => pipeline.reload_patterns(),

                sig = signal_handler.wait() => match sig {
                    DaemonSignal::Shutdown => break,
                    DaemonSignal::Reload => pipeline.reload_patterns(),
                },
            }
        }

        // Graceful teardown: the source persists its offset and the
        // supervisor terminates the capture child before the task ends.
        let _ = shutdown_tx.send(true);
        drop(rx);
        if let Err(e) = source_handle.await {
            tracing::error!("Source task failed: {}", e);
        }

        pipeline.log_summary();
        tracing::info!("Discovery daemon stopped");
        Ok(())
    }

    /// Fork into the background and run the pipeline there.
    /// Refuses to proceed when an instance is already running.
    pub fn start_daemon(&mut self, mode: Option<SourceMode>) -> Result<()> {
        if self.process_manager.is_running() {
            return Err(WildgateError::Daemon(
                "Daemon is already running".to_string(),
            ));
        }

        let log_file = expand_tilde(&self.config.paths.log_file);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to create log directory: {:?}", parent),
            })?;
        }

        let stdout = std::fs::File::create(&log_file).map_err(|e| WildgateError::Io {
            source: e,
            context: format!("Failed to create log file: {:?}", log_file),
        })?;
        let stderr = std::fs::File::create(log_file.with_extension("err")).map_err(|e| {
            WildgateError::Io {
                source: e,
                context: "Failed to create error log file".to_string(),
            }
        })?;

        let daemon = daemonize::Daemonize::new()
            .working_directory(std::env::current_dir().map_err(|e| WildgateError::Io {
                source: e,
                context: "Failed to get current directory".to_string(),
            })?)
            .stdout(stdout)
            .stderr(stderr);

        daemon
            .start()
            .map_err(|e| WildgateError::Daemon(format!("Failed to daemonize: {}", e)))?;

        // In the daemon process now; bring up the runtime and run.
        let runtime = tokio::runtime::Runtime::new().map_err(|e| WildgateError::Io {
            source: e,
            context: "Failed to create tokio runtime".to_string(),
        })?;
        runtime.block_on(async {
            if let Err(e) = self.run_foreground(mode).await {
                tracing::error!("Daemon error: {}", e);
            }
        });

        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        if self.process_manager.is_running() {
            DaemonStatus::Running {
                pid: self.process_manager.read_pid().ok(),
            }
        } else {
            DaemonStatus::Stopped
        }
    }

    pub fn process_manager(&self) -> &ProcessManager {
        &self.process_manager
    }
}
