//! Firewall table sink
//!
//! Thin abstraction over the external firewall address table. The table is
//! a flat set of IP literals mutated through a control binary; results
//! surface as booleans with logged messages rather than structured errors
//! because the sink is a control-plane call outside this process.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Destination for discovered addresses.
///
/// `add` must be idempotent: adding an address already present reports
/// success. Failure means the underlying control call errored or timed out.
#[async_trait]
pub trait TableSink {
    async fn add(&self, addr: &str) -> bool;
    async fn list_count(&self) -> usize;
}

/// PF table driven through `pfctl -t <table> -T add|show`
pub struct PfTable {
    table: String,
    control: PathBuf,
    timeout: Duration,
}

impl PfTable {
    pub fn new(table: impl Into<String>, control: PathBuf, timeout: Duration) -> Self {
        Self {
            table: table.into(),
            control,
            timeout,
        }
    }

    async fn run_control(&self, args: &[&str]) -> Option<std::process::Output> {
        let result = tokio::time::timeout(
            self.timeout,
            Command::new(&self.control)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Some(output),
            Ok(Err(e)) => {
                tracing::error!("Table control call failed: {:?} {:?}: {}", self.control, args, e);
                None
            }
            Err(_) => {
                tracing::error!(
                    "Table control call timed out after {:?}: {:?} {:?}",
                    self.timeout,
                    self.control,
                    args
                );
                None
            }
        }
    }
}

#[async_trait]
impl TableSink for PfTable {
    async fn add(&self, addr: &str) -> bool {
        let addr = addr.trim();
        if addr.is_empty() {
            return false;
        }

        let Some(output) = self
            .run_control(&["-t", &self.table, "-T", "add", addr])
            .await
        else {
            return false;
        };

        // pfctl reports "1/1 addresses added" on stderr; an address already
        // in the table exits zero with "0/1 addresses added".
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() || stderr.to_lowercase().contains("added") {
            tracing::debug!("Table add {}: {}", addr, stderr.trim());
            true
        } else {
            tracing::warn!("Table add {} rejected: {}", addr, stderr.trim());
            false
        }
    }

    async fn list_count(&self) -> usize {
        let Some(output) = self.run_control(&["-t", &self.table, "-T", "show"]).await else {
            return 0;
        };

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count()
    }
}

/// In-memory sink used by tests and dry runs
#[derive(Default)]
pub struct MemoryTable {
    addresses: Mutex<HashSet<String>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, addr: &str) -> bool {
        self.addresses.lock().await.contains(addr)
    }
}

#[async_trait]
impl TableSink for MemoryTable {
    async fn add(&self, addr: &str) -> bool {
        let addr = addr.trim();
        if addr.is_empty() {
            return false;
        }
        self.addresses.lock().await.insert(addr.to_string());
        true
    }

    async fn list_count(&self) -> usize {
        self.addresses.lock().await.len()
    }
}
