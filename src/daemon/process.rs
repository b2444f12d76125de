// PID-file handling: single-instance enforcement and daemon signalling

use crate::error::{Result, WildgateError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Manages the daemon's PID and lock files.
///
/// A second `start` while an instance is running must refuse to proceed;
/// a lock left behind by a crashed instance is reclaimed after verifying
/// its PID no longer exists.
#[derive(Clone)]
pub struct ProcessManager {
    pid_file: PathBuf,
    lock_file: PathBuf,
}

impl ProcessManager {
    pub fn new(pid_file: PathBuf) -> Self {
        let lock_file = pid_file.with_extension("lock");
        Self {
            pid_file,
            lock_file,
        }
    }

    /// Whether the recorded PID refers to a live process
    pub fn is_running(&self) -> bool {
        match self.read_pid() {
            Ok(pid) => kill(Pid::from_raw(pid), None).is_ok(),
            Err(_) => false,
        }
    }

    /// Claim single-instance ownership and record our PID.
    /// Fails when another instance is running or the state directory is
    /// unwritable; both refusals happen before anything else starts.
    pub fn acquire(&self) -> Result<()> {
        if self.is_running() {
            let pid = self.read_pid().unwrap_or_default();
            return Err(WildgateError::Daemon(format!(
                "Daemon is already running (PID {})",
                pid
            )));
        }

        if let Some(parent) = self.pid_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to create state directory: {:?}", parent),
            })?;
        }

        if self.lock_file.exists() {
            // is_running() said no above, so this lock is stale.
            tracing::warn!("Removing stale lock file {:?}", self.lock_file);
            std::fs::remove_file(&self.lock_file).map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to remove stale lock: {:?}", self.lock_file),
            })?;
        }

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_file)
            .map_err(|_| {
                WildgateError::Daemon(
                    "Failed to acquire lock, another instance may be starting".to_string(),
                )
            })?;

        let pid = std::process::id();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.pid_file)
            .map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to create PID file: {:?}", self.pid_file),
            })?;
        file.write_all(pid.to_string().as_bytes())
            .map_err(|e| WildgateError::Io {
                source: e,
                context: "Failed to write PID file".to_string(),
            })?;

        Ok(())
    }

    /// Drop single-instance ownership
    pub fn release(&self) -> Result<()> {
        for path in [&self.pid_file, &self.lock_file] {
            if path.exists() {
                std::fs::remove_file(path).map_err(|e| WildgateError::Io {
                    source: e,
                    context: format!("Failed to remove {:?}", path),
                })?;
            }
        }
        Ok(())
    }

    pub fn read_pid(&self) -> Result<i32> {
        let contents =
            std::fs::read_to_string(&self.pid_file).map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to read PID file: {:?}", self.pid_file),
            })?;

        contents
            .trim()
            .parse()
            .map_err(|_| WildgateError::Daemon("Invalid PID in file".to_string()))
    }

    /// Send a signal to the recorded daemon process
    pub fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self.read_pid()?;
        kill(Pid::from_raw(pid), sig).map_err(|e| {
            WildgateError::Daemon(format!("Failed to signal process {}: {}", pid, e))
        })?;
        Ok(())
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }
}
