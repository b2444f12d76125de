//! Batch rescanner: re-resolve every discovered domain and refresh the table
//!
//! DNS answers rotate and expire, so a one-shot rescan walks the whole
//! ledger, resolves each domain again, and pushes whatever addresses come
//! back. One unresponsive domain must never stall the batch: every
//! resolution is bounded by a timeout and failures are isolated per domain.

use crate::error::{Result, WildgateError};
use crate::ledger::DiscoveryLedger;
use crate::table::TableSink;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::lookup_host;

/// Address-resolution primitive used by the rescanner
#[async_trait]
pub trait Resolver {
    /// Resolve a domain to its current A and AAAA addresses
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>>;
}

/// Resolves through the system resolver, bounded by a timeout
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>> {
        // Port 0 satisfies the socket-address form; only the IPs matter.
        let query = format!("{}:0", domain);

        let addrs = tokio::time::timeout(self.timeout, lookup_host(query))
            .await
            .map_err(|_| {
                WildgateError::Resolve(format!(
                    "Resolution of {} timed out after {:?}",
                    domain, self.timeout
                ))
            })?
            .map_err(|e| WildgateError::Resolve(format!("{}: {}", domain, e)))?;

        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Re-resolve every ledger domain and push the addresses to the sink.
/// Returns the number of addresses added; per-domain failures are logged
/// and skipped.
pub async fn rescan<S, R>(ledger: &DiscoveryLedger, sink: &S, resolver: &R) -> Result<usize>
where
    S: TableSink,
    R: Resolver,
{
    let domains = ledger.list_all()?;
    tracing::info!("Rescanning {} discovered domains", domains.len());

    let mut added = 0;
    for domain in domains {
        let addrs = match resolver.resolve(&domain).await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", domain, e);
                continue;
            }
        };

        for addr in addrs {
            if sink.add(&addr.to_string()).await {
                added += 1;
            }
        }
    }

    Ok(added)
}

/// Manually inject one domain as if it had been discovered, then resolve it
/// and push its current addresses. Returns whether the domain was new and
/// how many addresses were added.
pub async fn inject<S, R>(
    ledger: &mut DiscoveryLedger,
    sink: &S,
    resolver: &R,
    domain: &str,
) -> Result<(bool, usize)>
where
    S: TableSink,
    R: Resolver,
{
    let recorded = ledger.record_if_new(domain)?;

    let mut added = 0;
    match resolver.resolve(domain).await {
        Ok(addrs) => {
            for addr in addrs {
                if sink.add(&addr.to_string()).await {
                    added += 1;
                }
            }
        }
        Err(e) => tracing::warn!("Resolution failed for {}: {}", domain, e),
    }

    Ok((recorded, added))
}
