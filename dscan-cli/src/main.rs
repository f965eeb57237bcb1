//! Command-line scan client for a content-scanning daemon.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod scan;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use dscan::Endpoint;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dscan", version, about = "Scan files with a content-scanning daemon")]
struct Cli {
    /// Daemon Unix socket.
    #[arg(long, global = true, env = "DSCAN_SOCKET", value_name = "PATH", conflicts_with = "tcp")]
    socket: Option<PathBuf>,

    /// Daemon TCP address (`HOST:PORT`, `[V6]:PORT` or `:PORT` for loopback).
    #[arg(long, global = true, env = "DSCAN_TCP", value_name = "HOST:PORT")]
    tcp: Option<Endpoint>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan files and directories.
    Scan(scan::ScanArgs),

    /// Print the daemon and signature database version.
    Version,

    /// Ask the daemon to reload its signature database.
    Reload,

    /// Check that the daemon is alive.
    Ping,

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Output format for the scan summary.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable text.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.dispatch() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("dscan: {e:#}");
            std::process::exit(2);
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

impl Cli {
    /// Runs the command and returns the process exit code.
    fn dispatch(self) -> Result<i32> {
        if let Command::Completion { shell } = self.command {
            clap_complete::generate(shell, &mut Self::command(), "dscan", &mut std::io::stdout());
            return Ok(0);
        }

        let endpoint = self.endpoint()?;
        match self.command {
            Command::Scan(args) => args.run(endpoint),
            Command::Version => {
                for line in dscan::version(&endpoint).context("version query failed")? {
                    println!("{line}");
                }
                Ok(0)
            }
            Command::Reload => {
                dscan::reload(&endpoint)?;
                println!("Database reloaded.");
                Ok(0)
            }
            Command::Ping => {
                dscan::ping(&endpoint)?;
                println!("PONG");
                Ok(0)
            }
            Command::Completion { .. } => Ok(0),
        }
    }

    /// The configured daemon endpoint.
    fn endpoint(&self) -> Result<Endpoint> {
        match (&self.socket, &self.tcp) {
            (Some(path), _) => Ok(Endpoint::unix(path)),
            (None, Some(tcp)) => Ok(tcp.clone()),
            (None, None) => Err(dscan::Error::NotConfigured.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn socket_flag_selects_unix_endpoint() {
        let argv = ["dscan", "--socket", "/run/scand.sock", "ping"];
        let cli = Cli::try_parse_from(argv).unwrap();
        assert_eq!(cli.endpoint().unwrap(), Endpoint::unix("/run/scand.sock"));
    }

    #[test]
    fn tcp_flag_parses_address() {
        let argv = ["dscan", "version", "--tcp", "scan.example.org:3310"];
        let cli = Cli::try_parse_from(argv).unwrap();
        assert_eq!(cli.endpoint().unwrap(), Endpoint::tcp("scan.example.org", 3310));
    }

    #[test]
    fn socket_and_tcp_conflict() {
        let argv = ["dscan", "--socket", "/s", "--tcp", ":3310", "ping"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn malformed_tcp_address_is_rejected() {
        assert!(Cli::try_parse_from(["dscan", "--tcp", "nowhere", "ping"]).is_err());
    }
}
