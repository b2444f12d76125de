// Discovery pipeline: one observation per raw source line, in arrival order

use crate::extract::LineExtractor;
use crate::ledger::DiscoveryLedger;
use crate::patterns::{normalize_domain, PatternSet};
use crate::table::TableSink;
use std::path::PathBuf;
use std::time::Instant;

/// Counters reported at shutdown and by debug logging
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub lines: u64,
    pub matched: u64,
    pub new_domains: u64,
    pub addresses_added: u64,
    pub sink_failures: u64,
}

/// The orchestrator: extract, match, record, push.
///
/// Owns the whole pipeline state for one daemon run: the current pattern
/// set, the ledger with its in-memory mirror, and the sink. Pattern reloads
/// replace the set wholesale so a reader never observes a torn state.
pub struct DiscoveryPipeline<S: TableSink> {
    patterns: PatternSet,
    patterns_path: PathBuf,
    ledger: DiscoveryLedger,
    sink: S,
    extractor: Box<dyn LineExtractor>,
    last_reload: Instant,
    stats: PipelineStats,
}

impl<S: TableSink> DiscoveryPipeline<S> {
    pub fn new(
        patterns_path: PathBuf,
        ledger: DiscoveryLedger,
        sink: S,
        extractor: Box<dyn LineExtractor>,
    ) -> Self {
        let patterns = PatternSet::load(&patterns_path);
        if patterns.is_empty() {
            tracing::warn!("No wildcard patterns configured, nothing to discover yet");
        }

        Self {
            patterns,
            patterns_path,
            ledger,
            sink,
            extractor,
            last_reload: Instant::now(),
            stats: PipelineStats::default(),
        }
    }

    /// Process one raw line from the acquisition source.
    ///
    /// Lines that yield no complete observation, and observations whose
    /// domain matches no pattern, are discarded silently at normal
    /// verbosity. A "new domain" is logged only on first sighting; address
    /// pushes are always attempted since answers rotate.
    pub async fn process_line(&mut self, line: &str) {
        self.stats.lines += 1;

        let observation = self.extractor.extract(line);
        if !observation.is_complete() {
            return;
        }
        let domain = normalize_domain(observation.domain.as_deref().unwrap_or_default());

        let Some(base) = self.patterns.matches(&domain) else {
            tracing::trace!("No pattern match for {}", domain);
            return;
        };
        let base = base.to_string();
        self.stats.matched += 1;

        match self.ledger.record_if_new(&domain) {
            Ok(true) => {
                self.stats.new_domains += 1;
                tracing::info!(
                    "New domain under {}: {} -> {:?}",
                    base,
                    domain,
                    observation.addresses
                );
            }
            Ok(false) => {}
            Err(e) => {
                // Keep going unrecorded; the next sighting retries.
                tracing::error!("Failed to record {}: {}", domain, e);
            }
        }

        for addr in &observation.addresses {
            if self.sink.add(addr).await {
                self.stats.addresses_added += 1;
            } else {
                self.stats.sink_failures += 1;
            }
        }
    }

    /// Re-read the pattern file, replacing the current set atomically.
    /// Operators can add or remove wildcard patterns without a restart.
    pub fn reload_patterns(&mut self) {
        self.patterns = PatternSet::load(&self.patterns_path);
        tracing::debug!(
            "Pattern set reloaded {}s after previous load",
            self.last_reload.elapsed().as_secs()
        );
        self.last_reload = Instant::now();
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Pipeline processed {} lines: {} matched, {} new domains, {} addresses added, {} sink failures",
            self.stats.lines,
            self.stats.matched,
            self.stats.new_domains,
            self.stats.addresses_added,
            self.stats.sink_failures
        );
    }
}
