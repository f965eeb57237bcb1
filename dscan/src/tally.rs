//! Scan results: per-file verdicts and aggregate counts.

use std::ops::AddAssign;
use std::path::PathBuf;

use dscan_proto::Status;
use serde::Serialize;
use tracing::trace;

/// Verdict for one scanned item, reported as it is decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanVerdict {
    /// Client-side path (the daemon's `stream` name is already substituted).
    pub path: PathBuf,
    /// Classification.
    pub status: Status,
}

impl std::fmt::Display for ScanVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.status)
    }
}

/// Aggregate counts for one or more scan calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Infected items.
    pub infected: u64,
    /// Items that could not be scanned, plus transport and protocol failures.
    pub errors: u64,
    /// Infected files the remove (or move) action failed to unlink.
    pub not_removed: u64,
    /// Infected files the copy or move action failed to place.
    pub not_moved: u64,
}

impl Tally {
    /// Combined outcome; infections take precedence over errors.
    pub const fn status(&self) -> ExitStatus {
        if self.infected > 0 {
            ExitStatus::Infected
        } else if self.errors > 0 {
            ExitStatus::Error
        } else {
            ExitStatus::Clean
        }
    }

    /// Returns `true` if nothing was found and nothing failed.
    pub const fn is_clean(&self) -> bool {
        self.infected == 0 && self.errors == 0
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.infected += rhs.infected;
        self.errors += rhs.errors;
        self.not_removed += rhs.not_removed;
        self.not_moved += rhs.not_moved;
    }
}

/// Process-level outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ExitStatus {
    /// Everything scanned clean.
    Clean,
    /// At least one infection.
    Infected,
    /// No infection, but at least one error.
    Error,
}

impl ExitStatus {
    /// Conventional process exit code: 0, 1 or 2.
    pub const fn code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Infected => 1,
            Self::Error => 2,
        }
    }
}

/// Receives verdicts, applies the action to infections and keeps the counts.
pub(crate) struct Sink<'a> {
    /// Quarantine action for infected files.
    action: &'a crate::Action,
    /// Caller's verdict callback.
    on_verdict: &'a mut dyn FnMut(&ScanVerdict),
    /// Running counts.
    pub(crate) tally: Tally,
}

impl<'a> Sink<'a> {
    /// New sink with zeroed counts.
    pub(crate) fn new(
        action: &'a crate::Action,
        on_verdict: &'a mut dyn FnMut(&ScanVerdict),
    ) -> Self {
        Self {
            action,
            on_verdict,
            tally: Tally::default(),
        }
    }

    /// Reports a verdict and, if `act` is set and the item is infected, runs
    /// the action on `path`. Counting is left to the caller.
    pub(crate) fn report(&mut self, path: PathBuf, status: Status, act: bool) {
        let verdict = ScanVerdict { path, status };
        (self.on_verdict)(&verdict);
        if act && verdict.status.is_infected() {
            self.action.apply(&verdict.path, &mut self.tally);
        }
    }

    /// Counts one verdict as a single item and reports it. Clean items are
    /// only counted.
    pub(crate) fn record(&mut self, path: PathBuf, status: Status) {
        match &status {
            Status::Infected(_) => self.tally.infected += 1,
            Status::Error(_) => self.tally.errors += 1,
            _ => {
                trace!(path = %path.display(), "clean");
                return;
            }
        }
        self.report(path, status, true);
    }
}

impl std::fmt::Debug for Sink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("action", &self.action)
            .field("tally", &self.tally)
            .finish_non_exhaustive()
    }
}
