use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use wildgate::daemon::DiscoveryPipeline;
use wildgate::extract::{CaptureLineExtractor, ResolverLogExtractor};
use wildgate::ledger::DiscoveryLedger;
use wildgate::source::TailSource;
use wildgate::table::{MemoryTable, TableSink};

fn capture_pipeline(
    temp_dir: &TempDir,
    patterns: &str,
) -> DiscoveryPipeline<MemoryTable> {
    let patterns_path = temp_dir.path().join("patterns.conf");
    std::fs::write(&patterns_path, patterns).unwrap();

    let ledger = DiscoveryLedger::open(&temp_dir.path().join("discovered.txt")).unwrap();
    DiscoveryPipeline::new(
        patterns_path,
        ledger,
        MemoryTable::new(),
        Box::new(CaptureLineExtractor::new().unwrap()),
    )
}

#[tokio::test]
async fn test_end_to_end_duplicate_observation() {
    let temp_dir = TempDir::new().unwrap();
    let mut pipeline = capture_pipeline(&temp_dir, "*.example.com\n");

    // The same response observed twice in succession: exactly one ledger
    // entry, and the second table add is an idempotent no-op.
    let line = "10.0.0.1.53 > 10.0.0.9.5353: 4411 1/0/0 \
         api.example.com. A 203.0.113.5 (44)";
    pipeline.process_line(line).await;
    pipeline.process_line(line).await;

    let stats = pipeline.stats();
    assert_eq!(stats.new_domains, 1);
    assert_eq!(stats.sink_failures, 0);
    assert_eq!(pipeline.sink().list_count().await, 1);

    let persisted =
        std::fs::read_to_string(temp_dir.path().join("discovered.txt")).unwrap();
    assert_eq!(persisted, "api.example.com\n");
}

#[tokio::test]
async fn test_mixed_traffic_only_matches_land() {
    let temp_dir = TempDir::new().unwrap();
    let mut pipeline = capture_pipeline(&temp_dir, "*.example.com\n");

    let lines = [
        // Query traffic, not a response.
        "10.0.0.9.5353 > 10.0.0.1.53: 4411+ A? api.example.com. (34)",
        // Response with no answers.
        "10.0.0.1.53 > 10.0.0.9.5353: 4411 NXDomain 0/1/0 (110)",
        // Response for a domain outside every pattern.
        "10.0.0.1.53 > 10.0.0.9.5353: 9341 1/0/0 www.other.net. A 198.51.100.7 (44)",
        // The one that should land.
        "10.0.0.1.53 > 10.0.0.9.5353: 4412 1/0/0 cdn.example.com. A 203.0.113.6 (44)",
        // Garbage.
        "::: totally unparseable :::",
    ];
    for line in lines {
        pipeline.process_line(line).await;
    }

    let stats = pipeline.stats();
    assert_eq!(stats.lines, 5);
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.new_domains, 1);

    let persisted =
        std::fs::read_to_string(temp_dir.path().join("discovered.txt")).unwrap();
    assert_eq!(persisted, "cdn.example.com\n");
}

#[tokio::test]
async fn test_resolver_log_mode_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let patterns_path = temp_dir.path().join("patterns.conf");
    std::fs::write(&patterns_path, "*.example.com\n").unwrap();

    let ledger = DiscoveryLedger::open(&temp_dir.path().join("discovered.txt")).unwrap();
    let mut pipeline = DiscoveryPipeline::new(
        patterns_path,
        ledger,
        MemoryTable::new(),
        Box::new(ResolverLogExtractor::new().unwrap()),
    );

    pipeline
        .process_line("info: reply: portal.example.com. IN 203.0.113.9 NOERROR")
        .await;
    pipeline
        .process_line("info: query: portal.example.com. IN A")
        .await;

    let stats = pipeline.stats();
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.new_domains, 1);
}

#[tokio::test]
async fn test_tail_source_feeds_pipeline_and_persists_offset() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("dns.log");
    let state = temp_dir.path().join("offset.json");
    std::fs::write(&log, "").unwrap();

    let source = TailSource::open(&log, &state, Duration::from_millis(20)).unwrap();
    let (tx, mut rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let source_handle = tokio::spawn(source.run(tx, shutdown_rx));

    let lines = "info: reply: api.example.com. IN 203.0.113.5 NOERROR\n\
         info: reply: www.example.com. IN 203.0.113.6 NOERROR\n";
    std::fs::OpenOptions::new()
        .append(true)
        .open(&log)
        .and_then(|mut f| std::io::Write::write_all(&mut f, lines.as_bytes()))
        .unwrap();

    let mut pipeline = {
        let patterns_path = temp_dir.path().join("patterns.conf");
        std::fs::write(&patterns_path, "*.example.com\n").unwrap();
        let ledger = DiscoveryLedger::open(&temp_dir.path().join("discovered.txt")).unwrap();
        DiscoveryPipeline::new(
            patterns_path,
            ledger,
            MemoryTable::new(),
            Box::new(ResolverLogExtractor::new().unwrap()),
        )
    };

    for _ in 0..2 {
        let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("line not delivered in time")
            .expect("source closed early");
        pipeline.process_line(&line).await;
    }

    shutdown_tx.send(true).unwrap();
    source_handle.await.unwrap();

    assert_eq!(pipeline.stats().new_domains, 2);

    // The offset was flushed on shutdown and points past everything read,
    // so a restart resumes without reprocessing.
    let persisted: wildgate::source::TailState =
        serde_json::from_str(&std::fs::read_to_string(&state).unwrap()).unwrap();
    assert_eq!(persisted.byte_offset, lines.len() as u64);
}

#[tokio::test]
async fn test_sink_observes_every_rotating_address() {
    let temp_dir = TempDir::new().unwrap();
    let mut pipeline = capture_pipeline(&temp_dir, "*.example.com\n");

    // Same domain, answers rotating across sightings: every address must be
    // pushed even though the domain is only recorded once.
    pipeline
        .process_line(
            "10.0.0.1.53 > 10.0.0.9.5353: 1 1/0/0 api.example.com. A 203.0.113.5 (44)",
        )
        .await;
    pipeline
        .process_line(
            "10.0.0.1.53 > 10.0.0.9.5353: 2 1/0/0 api.example.com. A 203.0.113.6 (44)",
        )
        .await;

    let stats = pipeline.stats();
    assert_eq!(stats.new_domains, 1);
    assert_eq!(stats.addresses_added, 2);
    assert!(pipeline.sink().contains("203.0.113.5").await);
    assert!(pipeline.sink().contains("203.0.113.6").await);
}
