use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use dscan::{
    Action, Endpoint, FsWalker, ModePrefs, ScanMode, ScanVerdict, Scanner, StreamEnd, Tally,
};
use tracing::warn;

use crate::OutputFormat;

/// Arguments for `dscan scan`.
#[derive(Args)]
pub(crate) struct ScanArgs {
    /// Files or directories to scan; `-` alone scans standard input.
    #[arg(default_value = ".")]
    paths: Vec<PathBuf>,

    /// Spread the scan: daemon threads for paths, a pipelined session for
    /// uploads and descriptor passing.
    #[arg(short, long)]
    multiscan: bool,

    /// Pass open descriptors to the daemon (local Unix socket only).
    #[arg(long)]
    fdpass: bool,

    /// Upload file contents instead of sending paths.
    #[arg(long)]
    stream: bool,

    /// How an upload is terminated (zero-chunk, implied, half-close).
    #[arg(long, value_name = "HOW", default_value_t = StreamEnd::ZeroChunk)]
    stream_end: StreamEnd,

    /// Maximum directory depth to descend.
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Remove infected files.
    #[arg(long, conflicts_with_all = ["copy", "move_to"])]
    remove: bool,

    /// Copy infected files into DIR.
    #[arg(long, value_name = "DIR", conflicts_with = "move_to")]
    copy: Option<PathBuf>,

    /// Move infected files into DIR.
    #[arg(long = "move", value_name = "DIR")]
    move_to: Option<PathBuf>,

    /// Print only infected files.
    #[arg(short, long)]
    infected: bool,

    /// Do not print the summary.
    #[arg(long)]
    no_summary: bool,

    /// Summary format.
    #[arg(long, default_value = "table")]
    format: OutputFormat,
}

impl ScanArgs {
    /// Scans every argument and returns the exit code.
    pub(crate) fn run(self, endpoint: Endpoint) -> Result<i32> {
        let stdin = matches!(self.paths.as_slice(), [p] if p.as_os_str() == "-");
        let remote = endpoint.is_remote()?;
        let prefs = ModePrefs {
            multiscan: self.multiscan,
            fdpass: self.fdpass,
            stream: self.stream,
            stdin,
        };
        let (mode, session) = ScanMode::select(&endpoint, remote, &prefs);
        let scanner = Scanner::builder(endpoint)
            .mode(mode)
            .session(session)
            .action(self.action())
            .stream_end(self.stream_end)
            .max_depth(self.max_depth)
            .build();

        let infected_only = self.infected;
        let mut print = |v: &ScanVerdict| {
            if !infected_only || v.status.is_infected() {
                println!("{v}");
            }
        };

        let started = Instant::now();
        let mut tally = Tally::default();
        if stdin {
            tally += scanner.scan_stdin(&mut print);
        } else {
            for path in &self.paths {
                if path.as_os_str() == "-" {
                    warn!("scanning standard input requires \"-\" to be the only argument");
                    continue;
                }
                tally += scanner.scan_path(path, &FsWalker, &mut print);
            }
        }

        if !self.no_summary {
            summary(&tally, &scanner, started, self.format)?;
        }
        Ok(tally.status().code())
    }

    fn action(&self) -> Action {
        if self.remove {
            Action::Remove
        } else if let Some(dir) = &self.copy {
            Action::Copy(dir.clone())
        } else if let Some(dir) = &self.move_to {
            Action::Move(dir.clone())
        } else {
            Action::None
        }
    }
}

fn summary(tally: &Tally, scanner: &Scanner, started: Instant, format: OutputFormat) -> Result<()> {
    let elapsed = started.elapsed().as_secs_f64();

    if matches!(format, OutputFormat::Json) {
        let doc = serde_json::json!({
            "infected": tally.infected,
            "errors": tally.errors,
            "not_removed": tally.not_removed,
            "not_moved": tally.not_moved,
            "status": tally.status(),
            "mode": scanner.mode().to_string(),
            "session": scanner.is_session(),
            "seconds": elapsed,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("\n----------- SCAN SUMMARY -----------");
    println!("{:<16}{}", "Infected files:", tally.infected);
    if tally.errors > 0 {
        println!("{:<16}{}", "Total errors:", tally.errors);
    }
    if tally.not_removed > 0 {
        println!("{:<16}{}", "Not removed:", tally.not_removed);
    }
    if tally.not_moved > 0 {
        println!("{:<16}{}", "Not moved:", tally.not_moved);
    }
    println!("{:<16}{elapsed:.3} sec", "Time:");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::Cli;

    fn scan_args(args: &[&str]) -> ScanArgs {
        let mut argv = vec!["dscan", "--socket", "/s", "scan"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            crate::Command::Scan(a) => a,
            _ => unreachable!(),
        }
    }

    #[test]
    fn defaults_scan_current_directory() {
        let a = scan_args(&[]);
        assert_eq!(a.paths, [PathBuf::from(".")]);
        assert_eq!(a.stream_end, StreamEnd::ZeroChunk);
        assert_eq!(a.action(), Action::None);
    }

    #[test]
    fn action_flags_map_to_actions() {
        assert_eq!(scan_args(&["--remove"]).action(), Action::Remove);
        assert_eq!(scan_args(&["--copy", "/q"]).action(), Action::Copy("/q".into()));
        assert_eq!(scan_args(&["--move", "/q"]).action(), Action::Move("/q".into()));
    }

    #[test]
    fn actions_are_exclusive() {
        let argv = ["dscan", "scan", "--remove", "--move", "/q"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn stream_end_parses() {
        assert_eq!(scan_args(&["--stream-end", "half-close"]).stream_end, StreamEnd::HalfClose);
        assert_eq!(scan_args(&["--stream-end", "implied", "a", "b"]).paths.len(), 2);
    }
}
