//! Supervision of the packet-capture subprocess
//!
//! Owns the capture child's lifecycle: spawn, detect exit, restart with a
//! bounded rate, and terminate gracefully on shutdown. The state machine is
//! `Stopped -> Starting -> Running -> (Exited | Terminating) -> Stopped`.

use crate::config::CaptureConfig;
use crate::error::{Result, WildgateError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

/// Mandatory minimum delay between consecutive capture process starts, so a
/// crash loop cannot starve the host.
pub const RESTART_FLOOR: Duration = Duration::from_secs(1);

/// How long to wait for the child after a graceful termination request
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Exited,
    Terminating,
}

/// The fixed argument set handed to the capture binary
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CaptureCommand {
    /// Build the capture invocation from configuration:
    /// `tcpdump -l -n -v -i <iface> -s <snaplen> <filter>`
    /// (line-buffered, no name resolution, verbose enough to show answers).
    pub fn from_config(config: &CaptureConfig) -> Self {
        let interface = detect_interface(config.interface.as_deref());
        Self {
            program: config.command.clone(),
            args: vec![
                "-l".to_string(),
                "-n".to_string(),
                "-v".to_string(),
                "-i".to_string(),
                interface,
                "-s".to_string(),
                config.snap_len.to_string(),
                config.filter.clone(),
            ],
        }
    }
}

/// Pick the capture interface: configured value, else the first
/// non-loopback interface the kernel exposes, else a logged fallback.
pub fn detect_interface(configured: Option<&str>) -> String {
    if let Some(interface) = configured {
        return interface.to_string();
    }

    if let Ok(entries) = std::fs::read_dir("/sys/class/net") {
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo")
            .collect();
        names.sort();
        if let Some(name) = names.into_iter().next() {
            tracing::info!("Detected capture interface: {}", name);
            return name;
        }
    }

    tracing::warn!("Falling back to eth0 for capture interface");
    "eth0".to_string()
}

/// Owns the capture subprocess; the live child is replaced wholesale on
/// every restart.
pub struct CaptureSupervisor {
    command: CaptureCommand,
    state: SupervisorState,
    child: Option<Child>,
    last_start: Option<Instant>,
}

impl CaptureSupervisor {
    pub fn new(command: CaptureCommand) -> Self {
        Self {
            command,
            state: SupervisorState::Stopped,
            child: None,
            last_start: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Launch the capture process and hand back its line-buffered stdout.
    ///
    /// Enforces the restart floor: a start attempt within `RESTART_FLOOR`
    /// of the previous one waits out the remainder first.
    pub async fn start(&mut self) -> Result<Lines<BufReader<ChildStdout>>> {
        self.state = SupervisorState::Starting;

        if let Some(last) = self.last_start {
            let elapsed = last.elapsed();
            if elapsed < RESTART_FLOOR {
                tokio::time::sleep(RESTART_FLOOR - elapsed).await;
            }
        }
        // Stamped per attempt, not per success, so a command that fails to
        // spawn is rate-limited the same way as one that crashes.
        self.last_start = Some(Instant::now());

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.state = SupervisorState::Stopped;
                WildgateError::Source(format!(
                    "Failed to start capture process {:?}: {}",
                    self.command.program, e
                ))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            WildgateError::Source("Capture process has no stdout handle".to_string())
        })?;

        // Capture tools write their banner and packet counts to stderr;
        // it is logged but never parsed.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("capture stderr: {}", line);
                }
            });
        }

        tracing::info!(
            "Capture process started (pid {:?}): {:?} {}",
            child.id(),
            self.command.program,
            self.command.args.join(" ")
        );

        self.child = Some(child);
        self.state = SupervisorState::Running;
        Ok(BufReader::new(stdout).lines())
    }

    /// Handle end-of-stream from the child: reap it and start a fresh one,
    /// never sooner than the restart floor allows.
    pub async fn restart(&mut self) -> Result<Lines<BufReader<ChildStdout>>> {
        self.state = SupervisorState::Exited;
        tracing::warn!("Capture process exited, restarting");

        if let Some(mut child) = self.child.take() {
            let _ = child.wait().await;
        }

        self.start().await
    }

    /// Graceful shutdown: SIGTERM, bounded wait, then kill
    pub async fn terminate(&mut self) {
        self.state = SupervisorState::Terminating;

        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }

            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(_) => tracing::info!("Capture process terminated"),
                Err(_) => {
                    tracing::warn!("Capture process did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }

        self.state = SupervisorState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_command() -> CaptureCommand {
        CaptureCommand {
            program: PathBuf::from("echo"),
            args: vec!["capture-line".to_string()],
        }
    }

    #[tokio::test]
    async fn test_start_reads_child_output() {
        let mut supervisor = CaptureSupervisor::new(echo_command());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        let mut lines = supervisor.start().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("capture-line"));
        assert_eq!(lines.next_line().await.unwrap(), None);

        supervisor.terminate().await;
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_respects_floor() {
        let mut supervisor = CaptureSupervisor::new(echo_command());

        let begin = Instant::now();
        let mut lines = supervisor.start().await.unwrap();
        while lines.next_line().await.unwrap().is_some() {}

        // The short-lived child exits immediately; the replacement must not
        // start before the floor has elapsed since the first spawn.
        let mut lines = supervisor.restart().await.unwrap();
        assert!(begin.elapsed() >= RESTART_FLOOR);
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("capture-line"));

        supervisor.terminate().await;
    }

    #[tokio::test]
    async fn test_unstartable_command_is_an_error() {
        let mut supervisor = CaptureSupervisor::new(CaptureCommand {
            program: PathBuf::from("/nonexistent/capture-binary"),
            args: vec![],
        });

        assert!(supervisor.start().await.is_err());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_capture_command_from_config() {
        let config = CaptureConfig {
            command: PathBuf::from("tcpdump"),
            interface: Some("igb1".to_string()),
            snap_len: 512,
            filter: "udp port 53 and src port 53".to_string(),
        };
        let command = CaptureCommand::from_config(&config);

        assert_eq!(command.program, PathBuf::from("tcpdump"));
        assert_eq!(
            command.args,
            vec!["-l", "-n", "-v", "-i", "igb1", "-s", "512", "udp port 53 and src port 53"]
        );
    }

    #[test]
    fn test_detect_interface_prefers_configured() {
        assert_eq!(detect_interface(Some("igb1")), "igb1");
    }
}
