//! Blocking tail of a growing resolver log with persisted read offsets

use crate::error::{Result, WildgateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Persisted read position, rewritten wholly after each batch.
///
/// `file_identity` is the inode of the file the offset belongs to; a
/// mismatch on restore means the log was rotated and reading restarts at
/// byte zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailState {
    pub byte_offset: u64,
    pub file_identity: u64,
    pub saved_at: DateTime<Utc>,
}

/// Follows a growing log file, resuming from the recorded offset across
/// restarts and re-processing no bytes already consumed.
pub struct TailSource {
    log_path: PathBuf,
    state_path: PathBuf,
    poll_interval: Duration,
    reader: BufReader<File>,
    offset: u64,
    identity: u64,
    persisted_offset: Option<u64>,
}

impl TailSource {
    /// Open the log and restore the recorded read position.
    ///
    /// Fatal if the log file cannot be opened at all. With no recorded
    /// state the source starts at the current end of file (history is not
    /// replayed); with state recorded for a different file identity it
    /// starts from byte zero.
    pub fn open(log_path: &Path, state_path: &Path, poll_interval: Duration) -> Result<Self> {
        let metadata = std::fs::metadata(log_path).map_err(|e| {
            WildgateError::Source(format!("Cannot open log file {:?}: {}", log_path, e))
        })?;
        let identity = metadata.ino();

        let offset = match Self::load_state(state_path) {
            Some(state) if state.file_identity == identity => {
                if state.byte_offset > metadata.len() {
                    tracing::warn!("Log file shrank below recorded offset, restarting from 0");
                    0
                } else {
                    tracing::debug!("Resuming tail at byte {}", state.byte_offset);
                    state.byte_offset
                }
            }
            Some(_) => {
                tracing::info!("Log file identity changed (rotated), reading from start");
                0
            }
            None => metadata.len(),
        };

        let mut file = File::open(log_path).map_err(|e| {
            WildgateError::Source(format!("Cannot open log file {:?}: {}", log_path, e))
        })?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| WildgateError::Io {
            source: e,
            context: format!("Failed to seek log file: {:?}", log_path),
        })?;

        Ok(Self {
            log_path: log_path.to_path_buf(),
            state_path: state_path.to_path_buf(),
            poll_interval,
            reader: BufReader::new(file),
            offset,
            identity,
            persisted_offset: None,
        })
    }

    fn load_state(state_path: &Path) -> Option<TailState> {
        let content = std::fs::read_to_string(state_path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring unparseable tail state {:?}: {}", state_path, e);
                None
            }
        }
    }

    /// Rewrite the state record wholly with the current position
    pub fn persist_state(&mut self) -> Result<()> {
        if self.persisted_offset == Some(self.offset) {
            return Ok(());
        }

        let state = TailState {
            byte_offset: self.offset,
            file_identity: self.identity,
            saved_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&state).map_err(|e| WildgateError::Json {
            source: e,
            context: "Failed to serialize tail state".to_string(),
        })?;
        std::fs::write(&self.state_path, content).map_err(|e| WildgateError::Io {
            source: e,
            context: format!("Failed to write tail state: {:?}", self.state_path),
        })?;

        self.persisted_offset = Some(self.offset);
        Ok(())
    }

    /// Read every complete line currently available, advancing the offset.
    /// A trailing partial line is left unconsumed for the next poll.
    pub fn read_batch(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();

        loop {
            let mut buf = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| WildgateError::Io {
                    source: e,
                    context: format!("Failed to read log file: {:?}", self.log_path),
                })?;
            if n == 0 {
                break;
            }

            if buf.last() == Some(&b'\n') {
                self.offset += n as u64;
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if !line.is_empty() {
                    lines.push(line);
                }
            } else {
                // Partial line at end of file; rewind so the next poll sees
                // it whole once the writer finishes it.
                self.reader
                    .seek(SeekFrom::Start(self.offset))
                    .map_err(|e| WildgateError::Io {
                        source: e,
                        context: format!("Failed to seek log file: {:?}", self.log_path),
                    })?;
                break;
            }
        }

        Ok(lines)
    }

    /// Re-stat the log path and reopen from byte zero when its identity
    /// changed (rotation) or it shrank below the current offset.
    pub fn check_rotation(&mut self) -> Result<()> {
        // The file may briefly not exist mid-rotation; keep the current
        // handle and try again on the next poll.
        let Ok(metadata) = std::fs::metadata(&self.log_path) else {
            return Ok(());
        };

        if metadata.ino() != self.identity {
            tracing::info!("Log file rotated, reopening {:?} from start", self.log_path);
            let file = File::open(&self.log_path).map_err(|e| {
                WildgateError::Source(format!("Cannot reopen log file {:?}: {}", self.log_path, e))
            })?;
            self.reader = BufReader::new(file);
            self.identity = metadata.ino();
            self.offset = 0;
        } else if metadata.len() < self.offset {
            tracing::info!("Log file truncated, restarting from start");
            self.reader
                .seek(SeekFrom::Start(0))
                .map_err(|e| WildgateError::Io {
                    source: e,
                    context: format!("Failed to seek log file: {:?}", self.log_path),
                })?;
            self.offset = 0;
        }

        Ok(())
    }

    /// Source task body: feed lines into the channel until shutdown.
    ///
    /// The loop never blocks longer than the poll interval, so a shutdown
    /// signal is honored promptly, and the offset is flushed before exit so
    /// a restart resumes without reprocessing or skipping lines.
    pub async fn run(mut self, tx: mpsc::Sender<String>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = match self.read_batch() {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Tail source failed: {}", e);
                    break;
                }
            };

            if batch.is_empty() {
                if let Err(e) = self.persist_state() {
                    tracing::warn!("Failed to persist tail state: {}", e);
                }
                if let Err(e) = self.check_rotation() {
                    tracing::error!("Tail source failed: {}", e);
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for line in batch {
                if tx.send(line).await.is_err() {
                    // Pipeline went away; stop producing.
                    if let Err(e) = self.persist_state() {
                        tracing::warn!("Failed to persist tail state: {}", e);
                    }
                    return;
                }
            }
            if let Err(e) = self.persist_state() {
                tracing::warn!("Failed to persist tail state: {}", e);
            }
        }

        if let Err(e) = self.persist_state() {
            tracing::warn!("Failed to persist tail state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    fn append(path: &Path, data: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn test_fresh_start_skips_history() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("dns.log");
        let state = temp_dir.path().join("offset.json");
        append(&log, "old-line-1\nold-line-2\n");

        let mut source = TailSource::open(&log, &state, POLL).unwrap();
        assert!(source.read_batch().unwrap().is_empty());

        append(&log, "new-line\n");
        assert_eq!(source.read_batch().unwrap(), vec!["new-line"]);
    }

    #[test]
    fn test_resume_from_recorded_offset() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("dns.log");
        let state = temp_dir.path().join("offset.json");
        append(&log, "seen-before\n");

        {
            let mut source = TailSource::open(&log, &state, POLL).unwrap();
            append(&log, "first\nsecond\n");
            assert_eq!(source.read_batch().unwrap(), vec!["first", "second"]);
            source.persist_state().unwrap();
        }

        // A restart with matching identity resumes exactly where it left
        // off: nothing is re-processed, nothing is skipped.
        append(&log, "third\n");
        let mut resumed = TailSource::open(&log, &state, POLL).unwrap();
        assert_eq!(resumed.read_batch().unwrap(), vec!["third"]);
    }

    #[test]
    fn test_rotated_file_reads_from_start() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("dns.log");
        let state = temp_dir.path().join("offset.json");
        append(&log, "before-rotation\n");

        {
            let mut source = TailSource::open(&log, &state, POLL).unwrap();
            source.read_batch().unwrap();
            source.persist_state().unwrap();
        }

        // Replace the file so its inode changes; the replacement is created
        // while the old file still exists so the inodes cannot collide.
        let staged = temp_dir.path().join("dns.log.new");
        append(&staged, "after-rotation\n");
        std::fs::rename(&staged, &log).unwrap();

        let mut source = TailSource::open(&log, &state, POLL).unwrap();
        assert_eq!(source.read_batch().unwrap(), vec!["after-rotation"]);
    }

    #[test]
    fn test_check_rotation_mid_run() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("dns.log");
        let state = temp_dir.path().join("offset.json");
        append(&log, "first\n");

        let mut source = TailSource::open(&log, &state, POLL).unwrap();
        assert!(source.read_batch().unwrap().is_empty());

        let staged = temp_dir.path().join("dns.log.new");
        append(&staged, "rotated\n");
        std::fs::rename(&staged, &log).unwrap();
        source.check_rotation().unwrap();

        assert_eq!(source.read_batch().unwrap(), vec!["rotated"]);
    }

    #[test]
    fn test_partial_line_left_for_next_poll() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("dns.log");
        let state = temp_dir.path().join("offset.json");
        append(&log, "");

        let mut source = TailSource::open(&log, &state, POLL).unwrap();
        append(&log, "incomplete");
        assert!(source.read_batch().unwrap().is_empty());

        append(&log, " line\nnext\n");
        assert_eq!(source.read_batch().unwrap(), vec!["incomplete line", "next"]);
    }

    #[test]
    fn test_missing_log_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let result = TailSource::open(
            &temp_dir.path().join("absent.log"),
            &temp_dir.path().join("offset.json"),
            POLL,
        );
        assert!(matches!(result, Err(WildgateError::Source(_))));
    }
}
