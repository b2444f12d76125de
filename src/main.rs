use std::time::Duration;
use wildgate::cli::{Cli, Commands, ConfigAction};
use wildgate::config::{expand_tilde, Config};
use wildgate::daemon::{Daemon, DaemonStatus, ProcessManager};
use wildgate::error::{Result, WildgateError};
use wildgate::ledger::DiscoveryLedger;
use wildgate::patterns::PatternSet;
use wildgate::scan::{self, SystemResolver};
use wildgate::table::{PfTable, TableSink};

fn main() {
    init_logging();

    let cli = Cli::parse_args();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wildgate=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Start { source } => {
            let config = load_config(cli.config)?;
            println!("Starting wildgate daemon...");
            let mut daemon = Daemon::new(config);
            daemon.start_daemon(source)?;
            Ok(0)
        }
        Commands::Stop => {
            let config = load_config(cli.config)?;
            cmd_stop(&config)?;
            Ok(0)
        }
        Commands::Status { json } => {
            let config = load_config(cli.config)?;
            cmd_status(&config, json)
        }
        Commands::Test { source } => {
            let config = load_config(cli.config)?;
            println!("Running in foreground; press Ctrl+C to stop");
            let mut daemon = Daemon::new(config);
            runtime()?.block_on(daemon.run_foreground(source))?;
            Ok(0)
        }
        Commands::Scan => {
            let config = load_config(cli.config)?;
            let added = runtime()?.block_on(cmd_scan(&config))?;
            println!("Resolved {} addresses from discovered domains", added);
            Ok(0)
        }
        Commands::Clear => {
            let config = load_config(cli.config)?;
            let mut ledger =
                DiscoveryLedger::open(&expand_tilde(&config.paths.discovered_file))?;
            let count = ledger.len();
            ledger.clear()?;
            println!("Cleared {} discovered domains", count);
            Ok(0)
        }
        Commands::Add { domain } => {
            let config = load_config(cli.config)?;
            let (recorded, added) = runtime()?.block_on(cmd_add(&config, &domain))?;
            if recorded {
                println!("Added {}, resolved {} addresses", domain, added);
            } else {
                println!("Domain {} already known, resolved {} addresses", domain, added);
            }
            Ok(0)
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
            Ok(0)
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| WildgateError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => {
            let path = Config::default_path()?;
            if path.exists() {
                Config::load(&path)
            } else {
                tracing::debug!(
                    "Config file not found, using defaults. Run 'wildgate config init' to create one."
                );
                Ok(Config::default())
            }
        }
    }
}

fn cmd_stop(config: &Config) -> Result<()> {
    use std::thread::sleep;

    let pm = ProcessManager::new(expand_tilde(&config.paths.pid_file));
    if !pm.is_running() {
        println!("Daemon is not running");
        return Ok(());
    }

    println!("Sending SIGTERM to daemon...");
    pm.signal(nix::sys::signal::Signal::SIGTERM)?;

    // Give the daemon time to finish the in-flight observation, flush the
    // tail offset, and terminate the capture child.
    for _ in 0..10 {
        sleep(Duration::from_millis(500));
        if !pm.is_running() {
            println!("Daemon stopped");
            return Ok(());
        }
    }

    println!("Daemon not responding, sending SIGKILL...");
    pm.signal(nix::sys::signal::Signal::SIGKILL)?;
    sleep(Duration::from_millis(500));

    if pm.is_running() {
        println!("Warning: daemon may still be running (stale PID file?)");
    } else {
        println!("Daemon force killed");
    }
    Ok(())
}

fn cmd_status(config: &Config, json: bool) -> Result<i32> {
    let daemon = Daemon::new(config.clone());
    let status = daemon.status();

    let patterns = PatternSet::load(&expand_tilde(&config.paths.patterns_file));
    let ledger = DiscoveryLedger::open(&expand_tilde(&config.paths.discovered_file))?;
    let table = PfTable::new(
        config.table.name.clone(),
        config.table.control_command.clone(),
        Duration::from_secs(config.table.timeout_secs),
    );
    let table_count = runtime()?.block_on(table.list_count());

    let (running, pid) = match status {
        DaemonStatus::Running { pid } => (true, pid),
        DaemonStatus::Stopped => (false, None),
    };

    if json {
        let report = serde_json::json!({
            "running": running,
            "pid": pid,
            "wildcard_patterns": patterns.len(),
            "discovered_domains": ledger.len(),
            "table_addresses": table_count,
        });
        println!("{}", report);
    } else {
        println!("Wildgate Status");
        println!("===============");
        match pid {
            Some(pid) if running => println!("Daemon: Running (PID {})", pid),
            _ if running => println!("Daemon: Running"),
            _ => println!("Daemon: Stopped"),
        }
        println!("Patterns: {}", patterns.len());
        println!("Discovered domains: {}", ledger.len());
        println!("Table addresses: {}", table_count);

        let log_file = expand_tilde(&config.paths.log_file);
        if let Ok(content) = std::fs::read_to_string(&log_file) {
            let lines: Vec<&str> = content.lines().collect();
            if !lines.is_empty() {
                println!("\nRecent activity:");
                for line in lines.iter().rev().take(5).rev() {
                    println!("  {}", line);
                }
            }
        }
    }

    Ok(if running { 0 } else { 1 })
}

async fn cmd_scan(config: &Config) -> Result<usize> {
    let ledger = DiscoveryLedger::open(&expand_tilde(&config.paths.discovered_file))?;
    let table = PfTable::new(
        config.table.name.clone(),
        config.table.control_command.clone(),
        Duration::from_secs(config.table.timeout_secs),
    );
    let resolver = SystemResolver::new(Duration::from_secs(config.scan.resolve_timeout_secs));

    scan::rescan(&ledger, &table, &resolver).await
}

async fn cmd_add(config: &Config, domain: &str) -> Result<(bool, usize)> {
    let mut ledger = DiscoveryLedger::open(&expand_tilde(&config.paths.discovered_file))?;
    let table = PfTable::new(
        config.table.name.clone(),
        config.table.control_command.clone(),
        Duration::from_secs(config.table.timeout_secs),
    );
    let resolver = SystemResolver::new(Duration::from_secs(config.scan.resolve_timeout_secs));

    scan::inject(&mut ledger, &table, &resolver, domain).await
}

fn cmd_config(config_path: Option<std::path::PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| WildgateError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;
            println!("Configuration initialized at: {}", path.display());

            // Seed an empty pattern file next to the config so the daemon
            // has something to reload once the operator fills it in.
            let patterns_path = expand_tilde(&config.paths.patterns_file);
            if !patterns_path.exists() {
                if let Some(parent) = patterns_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| WildgateError::Io {
                        source: e,
                        context: format!("Failed to create config directory: {:?}", parent),
                    })?;
                }
                std::fs::write(
                    &patterns_path,
                    "# One wildcard pattern per line, e.g.\n# *.example.com\n",
                )
                .map_err(|e| WildgateError::Io {
                    source: e,
                    context: format!("Failed to write pattern file: {:?}", patterns_path),
                })?;
                println!("Pattern file initialized at: {}", patterns_path.display());
            }
        }
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            Config::load(&path)?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}
