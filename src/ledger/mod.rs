//! Persistent ledger of discovered domains
//!
//! The ledger is a newline-delimited file of lowercase FQDNs with set
//! semantics. Appends are guarded by an exclusive advisory lock so that the
//! record operation stays atomic even when another daemon instance (or an
//! operator) writes the same file. Reads are lock-free snapshot reads; the
//! in-memory mirror handles same-process duplicate suppression.

use crate::error::{Result, WildgateError};
use crate::patterns::normalize_domain;
use nix::fcntl::{Flock, FlockArg};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Deduplicated, persistent set of discovered domains
pub struct DiscoveryLedger {
    path: PathBuf,
    known: HashSet<String>,
}

impl DiscoveryLedger {
    /// Open the ledger, loading the persisted set into the in-memory mirror.
    /// A missing file is an empty ledger, not an error.
    pub fn open(path: &Path) -> Result<Self> {
        let mut known = HashSet::new();

        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to read ledger: {:?}", path),
            })?;
            for line in content.lines() {
                let domain = normalize_domain(line);
                if !domain.is_empty() {
                    known.insert(domain);
                }
            }
        }

        tracing::debug!("Ledger holds {} known domains", known.len());

        Ok(Self {
            path: path.to_path_buf(),
            known,
        })
    }

    /// Whether a domain is already recorded
    pub fn contains(&self, domain: &str) -> bool {
        self.known.contains(&normalize_domain(domain))
    }

    /// Record a domain if it is not already known.
    ///
    /// Returns `Ok(true)` when the domain was appended, `Ok(false)` when it
    /// was already present. The append happens under an exclusive file lock
    /// held only for the duration of the write.
    pub fn record_if_new(&mut self, domain: &str) -> Result<bool> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Ok(false);
        }
        if self.known.contains(&domain) {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to create ledger directory: {:?}", parent),
            })?;
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to open ledger: {:?}", self.path),
            })?;

        let mut locked = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| WildgateError::Ledger(format!("Lock failed: {}", errno)))?;
        locked
            .write_all(format!("{}\n", domain).as_bytes())
            .map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to append to ledger: {:?}", self.path),
            })?;
        // Lock released on drop.
        drop(locked);

        self.known.insert(domain);
        Ok(true)
    }

    /// Snapshot read of the full persisted set, in file order.
    /// Used by the batch rescanner; takes no lock.
    pub fn list_all(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| WildgateError::Io {
            source: e,
            context: format!("Failed to read ledger: {:?}", self.path),
        })?;

        let mut seen = HashSet::new();
        let mut domains = Vec::new();
        for line in content.lines() {
            let domain = normalize_domain(line);
            if !domain.is_empty() && seen.insert(domain.clone()) {
                domains.push(domain);
            }
        }
        Ok(domains)
    }

    /// Erase all persisted entries. Administrative operation; the pipeline
    /// never removes anything itself.
    pub fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| WildgateError::Io {
                source: e,
                context: format!("Failed to remove ledger: {:?}", self.path),
            })?;
        }
        self.known.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_if_new_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("discovered.txt");
        let mut ledger = DiscoveryLedger::open(&path).unwrap();

        assert!(ledger.record_if_new("api.example.com").unwrap());
        assert!(!ledger.record_if_new("api.example.com").unwrap());
        assert!(!ledger.record_if_new("API.example.com.").unwrap());

        let persisted = std::fs::read_to_string(&path).unwrap();
        assert_eq!(persisted, "api.example.com\n");
    }

    #[test]
    fn test_known_domains_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("discovered.txt");

        {
            let mut ledger = DiscoveryLedger::open(&path).unwrap();
            ledger.record_if_new("a.example.com").unwrap();
            ledger.record_if_new("b.example.com").unwrap();
        }

        let mut reopened = DiscoveryLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains("a.example.com"));
        assert!(!reopened.record_if_new("b.example.com").unwrap());
    }

    #[test]
    fn test_list_all_preserves_order_and_dedupes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("discovered.txt");
        std::fs::write(&path, "b.example.com\na.example.com\nB.example.com.\n").unwrap();

        let ledger = DiscoveryLedger::open(&path).unwrap();
        let all = ledger.list_all().unwrap();
        assert_eq!(all, vec!["b.example.com", "a.example.com"]);
    }

    #[test]
    fn test_clear_removes_file_and_mirror() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("discovered.txt");
        let mut ledger = DiscoveryLedger::open(&path).unwrap();

        ledger.record_if_new("a.example.com").unwrap();
        ledger.clear().unwrap();

        assert!(!path.exists());
        assert!(ledger.is_empty());
        assert!(ledger.record_if_new("a.example.com").unwrap());
    }

    #[test]
    fn test_missing_file_is_empty_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = DiscoveryLedger::open(&temp_dir.path().join("absent.txt")).unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.list_all().unwrap().is_empty());
    }
}
