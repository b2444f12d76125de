//! CLI command definitions and parsing
use crate::config::SourceMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "wildgate",
    version,
    about = "Wildcard DNS discovery and firewall table synchronization",
    long_about = "Wildgate watches live DNS traffic for domains matching configured wildcard \
                  patterns, persists every discovered domain, and keeps a firewall address \
                  table in sync with the resolved addresses so matching traffic can bypass \
                  the default route."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/wildgate/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start continuous discovery as a background daemon
    Start {
        /// Acquisition source, overriding the configured one
        #[arg(short, long, value_enum)]
        source: Option<SourceMode>,
    },

    /// Stop the running daemon, escalating to SIGKILL if it will not exit
    Stop,

    /// Show daemon state, pattern count, and recent activity
    Status {
        /// Emit machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run the same pipeline in the foreground, without daemonizing
    Test {
        /// Acquisition source, overriding the configured one
        #[arg(short, long, value_enum)]
        source: Option<SourceMode>,
    },

    /// Re-resolve every discovered domain and refresh the table once
    Scan,

    /// Erase the persisted set of discovered domains
    Clear,

    /// Inject one domain as if discovered, then resolve and add its addresses
    Add {
        /// Fully-qualified domain name
        domain: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse CLI arguments, exiting with code 1 on usage errors
    pub fn parse_args() -> Self {
        match Self::try_parse() {
            Ok(cli) => cli,
            Err(e) => {
                // clap exits 2 by default; the command surface promises 1.
                let _ = e.print();
                std::process::exit(if e.use_stderr() { 1 } else { 0 });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_source_override_parses() {
        let cli = Cli::try_parse_from(["wildgate", "test", "--source", "log"]).unwrap();
        match cli.command {
            Commands::Test { source } => assert_eq!(source, Some(SourceMode::Log)),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_add_requires_domain() {
        assert!(Cli::try_parse_from(["wildgate", "add"]).is_err());
    }
}
