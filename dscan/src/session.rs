//! Pipelined `IDSESSION` scanning.
//!
//! Requests are sent back to back on one connection; the daemon numbers
//! them in arrival order and prefixes every reply with that number. Replies
//! may come back in any order, so each sent request waits in an id-keyed
//! pending map until its reply arrives.

use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use dscan_proto::{Command, LineReader, Reply, Status, StreamEnd, split_session_id, write_command};
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::request::{self, ScanMode};
use crate::tally::Sink;
use crate::transport::Connection;

/// An open session and the requests still awaiting replies.
#[derive(Debug)]
pub(crate) struct Session {
    /// Reply reader; its inner connection also carries the requests.
    reader: LineReader<Connection>,
    /// Sent requests by id, removed as their replies arrive.
    pending: BTreeMap<u64, PathBuf>,
    /// Id of the last request sent; the daemon counts the same way.
    last_id: u64,
    /// Request encoding.
    mode: ScanMode,
    /// Upload terminator.
    end: StreamEnd,
    /// Set after a fatal error; nothing more is sent.
    aborted: bool,
}

impl Session {
    /// Connects and sends `IDSESSION`.
    pub(crate) fn open(endpoint: &Endpoint, mode: ScanMode, end: StreamEnd) -> Result<Self> {
        let mut conn = endpoint.connect()?;
        write_command(&mut conn, &Command::Idsession)?;
        debug!(%endpoint, %mode, "session opened");
        Ok(Self {
            reader: LineReader::new(conn),
            pending: BTreeMap::new(),
            last_id: 0,
            mode,
            end,
            aborted: false,
        })
    }

    /// Sends a request for `path`, then handles whatever replies are
    /// already available without waiting for more.
    ///
    /// Returns [`ControlFlow::Break`] once the session has aborted.
    pub(crate) fn submit(&mut self, path: &Path, sink: &mut Sink<'_>) -> ControlFlow<()> {
        if self.aborted {
            return ControlFlow::Break(());
        }

        let id = self.last_id + 1;
        self.pending.insert(id, path.to_owned());
        match request::send(self.reader.get_mut(), self.mode, Some(path), self.end, true) {
            Ok(()) => self.last_id = id,
            Err(Error::Open { source, .. }) => {
                // Nothing reached the daemon, so the id is still free.
                self.pending.remove(&id);
                warn!(path = %path.display(), error = %source, "can't open file");
                sink.record(path.to_owned(), Status::Error(format!("Can't open file: {source}")));
                return ControlFlow::Continue(());
            }
            Err(e) => {
                self.last_id = id;
                self.abort(&e, sink);
                return ControlFlow::Break(());
            }
        }

        if let Err(e) = self.drain_ready(sink) {
            self.abort(&e, sink);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Resolves every reply that can be read without blocking.
    fn drain_ready(&mut self, sink: &mut Sink<'_>) -> Result<()> {
        while self.reader.has_record() || self.reader.get_ref().readable_now()? {
            let Some(record) = self.reader.read_record()? else {
                return Err(closed().into());
            };
            let line = record.to_vec();
            self.resolve(&line, sink)?;
        }
        Ok(())
    }

    /// Matches one reply to its pending request and reports it.
    fn resolve(&mut self, line: &[u8], sink: &mut Sink<'_>) -> Result<()> {
        let (id, body) = split_session_id(line)?;
        let path = self.pending.remove(&id).ok_or_else(|| {
            dscan_proto::Error::UnknownSession(String::from_utf8_lossy(line).into_owned())
        })?;

        match Reply::parse(body) {
            Ok(reply) => sink.record(path, reply.status),
            Err(e) => {
                warn!(id, error = %e, "unparseable session reply");
                sink.record(path, Status::Error("Failed to parse reply".to_owned()));
            }
        }
        Ok(())
    }

    /// Stops the session and fails everything still pending.
    fn abort(&mut self, err: &Error, sink: &mut Sink<'_>) {
        warn!(error = %err, pending = self.pending.len(), "session aborted");
        self.aborted = true;
        let pending = mem::take(&mut self.pending);
        if pending.is_empty() {
            sink.tally.errors += 1;
        }
        for path in pending.into_values() {
            sink.record(path, Status::Error(format!("Session aborted: {err}")));
        }
    }

    /// Sends `END`, waits for the outstanding replies and closes the
    /// connection. Requests the daemon never answered count as errors.
    pub(crate) fn finish(mut self, sink: &mut Sink<'_>) {
        if self.aborted {
            return;
        }
        if let Err(e) = write_command(self.reader.get_mut(), &Command::End) {
            self.abort(&e.into(), sink);
            return;
        }

        while !self.pending.is_empty() {
            let line = match self.reader.read_record() {
                Ok(Some(line)) => line.to_vec(),
                Ok(None) => break,
                Err(e) => {
                    self.abort(&e.into(), sink);
                    return;
                }
            };
            if let Err(e) = self.resolve(&line, sink) {
                self.abort(&e, sink);
                return;
            }
        }

        for path in mem::take(&mut self.pending).into_values() {
            sink.record(path, Status::Error("No reply from daemon".to_owned()));
        }
        debug!(requests = self.last_id, "session closed");
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "daemon closed the session")
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    use super::*;
    use crate::action::Action;
    use crate::tally::{ScanVerdict, Tally};

    fn session(mode: ScanMode) -> (Session, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        let conn = Connection::unix(a, Endpoint::unix("/test.sock"));
        let s = Session {
            reader: LineReader::new(conn),
            pending: BTreeMap::new(),
            last_id: 0,
            mode,
            end: StreamEnd::ZeroChunk,
            aborted: false,
        };
        (s, b)
    }

    fn files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                std::fs::write(&p, n).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn out_of_order_replies_match_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = files(tmp.path(), &["a", "b", "c"]);
        let (mut s, mut peer) = session(ScanMode::Stream);
        let action = Action::None;
        let mut seen = Vec::new();
        let mut on = |v: &ScanVerdict| seen.push(v.clone());
        let mut sink = Sink::new(&action, &mut on);

        for p in &paths {
            assert!(s.submit(p, &mut sink).is_continue());
        }
        peer.write_all(b"3: stream: Eicar FOUND\x001: stream: Broken ERROR\x002: stream: OK\0")
            .unwrap();
        s.finish(&mut sink);
        let tally = sink.tally;
        drop(sink);

        assert_eq!(
            tally,
            Tally {
                infected: 1,
                errors: 1,
                ..Tally::default()
            }
        );
        assert_eq!(
            seen,
            [
                ScanVerdict {
                    path: paths[2].clone(),
                    status: Status::Infected("Eicar".into()),
                },
                ScanVerdict {
                    path: paths[0].clone(),
                    status: Status::Error("Broken".into()),
                },
            ]
        );

        let mut sent = Vec::new();
        peer.read_to_end(&mut sent).unwrap();
        assert!(sent.ends_with(b"zEND\0"));
    }

    #[test]
    fn unknown_id_fails_pending_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = files(tmp.path(), &["a", "b"]);
        let (mut s, mut peer) = session(ScanMode::Stream);
        let action = Action::None;
        let mut seen = Vec::new();
        let mut on = |v: &ScanVerdict| seen.push(v.clone());
        let mut sink = Sink::new(&action, &mut on);

        assert!(s.submit(&paths[0], &mut sink).is_continue());
        peer.write_all(b"7: stream: OK\0").unwrap();
        assert!(s.submit(&paths[1], &mut sink).is_break());
        assert!(s.submit(&paths[0], &mut sink).is_break());
        s.finish(&mut sink);
        let tally = sink.tally;
        drop(sink);

        assert_eq!(tally.errors, 2);
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|v| v.status.is_error()));
    }

    #[test]
    fn unanswered_requests_become_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = files(tmp.path(), &["a", "b"]);
        let (mut s, mut peer) = session(ScanMode::Stream);
        let action = Action::None;
        let mut on = |_: &ScanVerdict| {};
        let mut sink = Sink::new(&action, &mut on);

        for p in &paths {
            assert!(s.submit(p, &mut sink).is_continue());
        }
        peer.write_all(b"1: stream: OK\0").unwrap();
        peer.shutdown(std::net::Shutdown::Write).unwrap();
        s.finish(&mut sink);

        assert_eq!(sink.tally.errors, 1);
        assert_eq!(sink.tally.infected, 0);
    }

    #[test]
    fn missing_file_skips_id() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = files(tmp.path(), &["a"]);
        let (mut s, mut peer) = session(ScanMode::FdPass);
        let action = Action::None;
        let mut on = |_: &ScanVerdict| {};
        let mut sink = Sink::new(&action, &mut on);

        assert!(s.submit(&tmp.path().join("missing"), &mut sink).is_continue());
        assert!(s.submit(&paths[0], &mut sink).is_continue());
        assert_eq!(s.pending.keys().copied().collect::<Vec<_>>(), [1]);
        peer.write_all(b"1: stream: OK\0").unwrap();
        s.finish(&mut sink);

        assert_eq!(sink.tally.errors, 1);
    }

    #[test]
    fn infected_replies_run_the_action_on_the_local_path() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = files(tmp.path(), &["bad"]);
        let (mut s, mut peer) = session(ScanMode::Stream);
        let action = Action::Remove;
        let mut on = |_: &ScanVerdict| {};
        let mut sink = Sink::new(&action, &mut on);

        assert!(s.submit(&paths[0], &mut sink).is_continue());
        peer.write_all(b"1: stream: Eicar FOUND\0").unwrap();
        s.finish(&mut sink);

        assert_eq!(sink.tally.infected, 1);
        assert!(!paths[0].exists());
    }
}
