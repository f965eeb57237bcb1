//! Scan drivers.
//!
//! A [`Scanner`] walks one argument at a time. Serially, every item gets its
//! own connection and request. With a session, all items of an argument
//! are pipelined over one `IDSESSION` connection.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use dscan_proto::{LineReader, Reply, STREAM_NAME, Status, StreamEnd};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::request::{self, ScanMode, absolutize};
use crate::session::Session;
use crate::tally::{ScanVerdict, Sink, Tally};
use crate::walk::{SkipReason, Visit, Walker};

/// Builder for a [`Scanner`].
///
/// Defaults: `CONTSCAN`, no session, no action, zero-chunk stream end, no
/// depth limit.
///
/// # Example
///
/// ```no_run
/// use dscan::{Action, Endpoint, FsWalker, ScanMode, Scanner};
///
/// let scanner = Scanner::builder(Endpoint::unix("/run/scand.sock"))
///     .mode(ScanMode::Stream)
///     .session(true)
///     .action(Action::Remove)
///     .build();
/// let tally = scanner.scan_path("/srv/uploads".as_ref(), &FsWalker, &mut |v| println!("{v}"));
/// std::process::exit(tally.status().code());
/// ```
#[derive(Debug)]
#[must_use = "a ScannerBuilder does nothing until .build() is called"]
pub struct ScannerBuilder {
    /// Daemon endpoint.
    endpoint: Endpoint,
    /// Request encoding.
    mode: ScanMode,
    /// Pipeline requests in a session.
    session: bool,
    /// What to do with infected files.
    action: Action,
    /// Upload terminator.
    stream_end: StreamEnd,
    /// Directory depth limit.
    max_depth: Option<usize>,
}

impl ScannerBuilder {
    /// Sets the request encoding.
    pub const fn mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Pipelines requests in an `IDSESSION`. Only upload and
    /// descriptor-passing modes can be pipelined; whole-file modes ignore it.
    pub const fn session(mut self, on: bool) -> Self {
        self.session = on;
        self
    }

    /// Sets the action for infected files.
    pub fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Sets how uploads are terminated.
    pub const fn stream_end(mut self, end: StreamEnd) -> Self {
        self.stream_end = end;
        self
    }

    /// Limits directory recursion. `None` means unlimited.
    pub const fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Builds the scanner.
    pub fn build(self) -> Scanner {
        let session = self.session && self.mode.supports_session();
        if self.session && !session {
            debug!(mode = %self.mode, "mode cannot be pipelined, scanning serially");
        }
        Scanner {
            endpoint: self.endpoint,
            mode: self.mode,
            session,
            action: self.action,
            stream_end: self.stream_end,
            max_depth: self.max_depth,
        }
    }
}

/// Configured scan client.
#[derive(Debug)]
pub struct Scanner {
    /// Daemon endpoint.
    endpoint: Endpoint,
    /// Request encoding.
    mode: ScanMode,
    /// Pipeline requests in a session.
    session: bool,
    /// What to do with infected files.
    action: Action,
    /// Upload terminator.
    stream_end: StreamEnd,
    /// Directory depth limit.
    max_depth: Option<usize>,
}

impl Scanner {
    /// Starts building a scanner for `endpoint`.
    pub fn builder(endpoint: Endpoint) -> ScannerBuilder {
        ScannerBuilder {
            endpoint,
            mode: ScanMode::default(),
            session: false,
            action: Action::default(),
            stream_end: StreamEnd::default(),
            max_depth: None,
        }
    }

    /// Request encoding in use.
    pub const fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Returns `true` if requests are pipelined.
    pub const fn is_session(&self) -> bool {
        self.session
    }

    /// Daemon endpoint.
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Scans one argument: a file or a directory tree.
    ///
    /// Every infection and every error is passed to `on_verdict` as it is
    /// decided. A final `<path>: OK` verdict follows when nothing was found
    /// and nothing failed, or when the argument was a directory and nothing
    /// was found. Failures never stop the scan early except for a fatal
    /// session error, which ends the argument.
    pub fn scan_path(
        &self,
        path: &Path,
        walker: &dyn Walker,
        on_verdict: &mut dyn FnMut(&ScanVerdict),
    ) -> Tally {
        let mut sink = Sink::new(&self.action, on_verdict);
        let root = match absolutize(path) {
            Ok(root) => root,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "can't make path absolute");
                sink.tally.errors += 1;
                return sink.tally;
            }
        };
        info!(path = %root.display(), mode = %self.mode, session = self.session, "scanning");

        let top_dir = if self.session {
            self.walk_session(&root, walker, &mut sink)
        } else {
            self.walk_serial(&root, walker, &mut sink)
        };

        if sink.tally.infected == 0 && (sink.tally.errors == 0 || top_dir) {
            sink.report(root, Status::Clean, false);
        }
        sink.tally
    }

    /// Scans standard input. No action is ever applied.
    ///
    /// A pipe or terminal cannot be passed as a descriptor, so anything but
    /// a regular file is uploaded instead.
    pub fn scan_stdin(&self, on_verdict: &mut dyn FnMut(&ScanVerdict)) -> Tally {
        let mode = if self.mode == ScanMode::FdPass && !stdin_is_file() {
            debug!("stdin is not a regular file, streaming");
            ScanMode::Stream
        } else if self.mode.is_whole_file() {
            ScanMode::Stream
        } else {
            self.mode
        };
        let none = Action::None;
        let mut sink = Sink::new(&none, on_verdict);
        self.scan_one(mode, None, &mut sink);
        sink.tally
    }

    /// Serial walk. Returns `true` if the root was a directory.
    fn walk_serial(&self, root: &Path, walker: &dyn Walker, sink: &mut Sink<'_>) -> bool {
        let mut top_dir = false;
        walker.walk(root, self.max_depth, &mut |visit| match visit {
            Visit::TopLevelDir(dir) => {
                top_dir = true;
                if self.mode.is_whole_file() {
                    // The daemon walks the tree itself.
                    self.scan_one(self.mode, Some(&dir), sink);
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
            Visit::File(file) => {
                self.scan_one(self.mode, Some(&file), sink);
                ControlFlow::Continue(())
            }
            Visit::Skipped { path, reason } => skipped(path, reason, sink),
        });
        top_dir
    }

    /// Pipelined walk over one session. Returns `true` if the root was a
    /// directory.
    fn walk_session(&self, root: &Path, walker: &dyn Walker, sink: &mut Sink<'_>) -> bool {
        let mut session = match Session::open(&self.endpoint, self.mode, self.stream_end) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "can't open session");
                sink.tally.errors += 1;
                return false;
            }
        };

        let mut top_dir = false;
        walker.walk(root, self.max_depth, &mut |visit| match visit {
            Visit::TopLevelDir(_) => {
                top_dir = true;
                ControlFlow::Continue(())
            }
            Visit::File(file) => session.submit(&file, sink),
            Visit::Skipped { path, reason } => skipped(path, reason, sink),
        });
        session.finish(sink);
        top_dir
    }

    /// One request on a fresh connection, read until the daemon closes it.
    ///
    /// Counts as one item: infected by the number of matches, or one error
    /// if there were none and anything failed.
    fn scan_one(&self, mode: ScanMode, target: Option<&Path>, sink: &mut Sink<'_>) {
        let local = target.map_or_else(|| PathBuf::from(STREAM_NAME), Path::to_path_buf);

        let mut conn = match self.endpoint.connect() {
            Ok(conn) => conn,
            Err(e) => {
                warn!(path = %local.display(), error = %e, "can't connect");
                sink.tally.errors += 1;
                return;
            }
        };
        match request::send(&mut conn, mode, target, self.stream_end, false) {
            Ok(()) => {}
            Err(Error::Open { source, .. }) => {
                sink.record(local, Status::Error(format!("Can't open file: {source}")));
                return;
            }
            Err(e) => {
                warn!(path = %local.display(), error = %e, "can't send request");
                sink.tally.errors += 1;
                return;
            }
        }

        let mut reader = LineReader::new(conn);
        let mut infected = 0;
        let mut failed = false;
        loop {
            let reply = match reader.read_record() {
                Ok(Some(line)) => Reply::parse(line),
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "communication error");
                    failed = true;
                    break;
                }
            };
            match reply {
                Ok(reply) => {
                    match &reply.status {
                        Status::Infected(_) => infected += 1,
                        Status::Error(_) => failed = true,
                        _ => continue,
                    }
                    let path = if mode.is_whole_file() && !reply.is_stream() {
                        reply.path
                    } else {
                        local.clone()
                    };
                    sink.report(path, reply.status, target.is_some());
                }
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "unparseable reply");
                    failed = true;
                    let status = Status::Error("Failed to parse reply".to_owned());
                    sink.report(local.clone(), status, false);
                }
            }
        }

        sink.tally.infected += infected;
        if infected == 0 && failed {
            sink.tally.errors += 1;
        }
    }
}

/// Logs or reports an entry the walker did not hand over.
fn skipped(path: PathBuf, reason: SkipReason, sink: &mut Sink<'_>) -> ControlFlow<()> {
    match reason {
        SkipReason::Special => {
            sink.record(path, Status::Error("Not supported file type.".to_owned()));
        }
        _ => warn!(path = %path.display(), %reason, "skipped"),
    }
    ControlFlow::Continue(())
}

/// Standard input is redirected from a regular file.
fn stdin_is_file() -> bool {
    #[cfg(unix)]
    {
        use std::fs::File;
        use std::os::unix::io::AsFd;

        std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map(File::from)
            .and_then(|f| f.metadata())
            .is_ok_and(|m| m.is_file())
    }
    #[cfg(not(unix))]
    {
        false
    }
}
