//! Scan requests over an open connection.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use dscan_proto::{Command, StreamEnd, send_stream, write_command};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transport::Connection;

/// How file contents reach the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ScanMode {
    /// Send the path; the daemon opens and walks it itself.
    #[default]
    Contscan,
    /// Like [`ScanMode::Contscan`], scanned on several daemon threads.
    Multiscan,
    /// Upload the contents with `INSTREAM`.
    Stream,
    /// Pass an open descriptor with `FILDES`.
    FdPass,
}

/// Caller preferences that feed [`ScanMode::select`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModePrefs {
    /// Spread the work: daemon-side for whole-file scans, a pipelined
    /// session for uploads and descriptor passing.
    pub multiscan: bool,
    /// Pass descriptors instead of paths.
    pub fdpass: bool,
    /// Upload contents instead of sending paths.
    pub stream: bool,
    /// Scanning standard input.
    pub stdin: bool,
}

impl ScanMode {
    /// Returns `true` for modes where the daemon opens the path itself.
    pub const fn is_whole_file(self) -> bool {
        matches!(self, Self::Contscan | Self::Multiscan)
    }

    /// Returns `true` for modes that can be pipelined in a session.
    pub const fn supports_session(self) -> bool {
        matches!(self, Self::Stream | Self::FdPass)
    }

    /// Picks the mode and whether to pipeline it in a session.
    ///
    /// Descriptor passing needs a local Unix socket; a remote daemon cannot
    /// see client paths, so it always gets uploads.
    pub fn select(endpoint: &Endpoint, remote: bool, prefs: &ModePrefs) -> (Self, bool) {
        if cfg!(unix) && !remote && endpoint.is_unix() && (prefs.fdpass || prefs.stdin) {
            (Self::FdPass, prefs.multiscan)
        } else if remote || prefs.stdin || prefs.stream {
            (Self::Stream, prefs.multiscan)
        } else if prefs.multiscan {
            (Self::Multiscan, false)
        } else {
            (Self::Contscan, false)
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Contscan => "contscan",
            Self::Multiscan => "multiscan",
            Self::Stream => "stream",
            Self::FdPass => "fdpass",
        })
    }
}

/// Makes `path` absolute against the current directory. An empty path
/// stands for the current directory itself.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return std::env::current_dir();
    }
    std::path::absolute(path)
}

/// Sends one request for `target`, or for standard input when `None`.
///
/// The file is opened before anything is written, so [`Error::Open`] means
/// the connection is still clean. Inside a session a half-close would end
/// the whole session and is replaced with a zero-length chunk.
pub(crate) fn send(
    conn: &mut Connection,
    mode: ScanMode,
    target: Option<&Path>,
    end: StreamEnd,
    in_session: bool,
) -> Result<()> {
    let stream_end = if in_session && end == StreamEnd::HalfClose {
        StreamEnd::ZeroChunk
    } else {
        end
    };

    match (mode, target) {
        (ScanMode::Contscan, Some(path)) => write_command(conn, &Command::Contscan(path))?,
        (ScanMode::Multiscan, Some(path)) => write_command(conn, &Command::Multiscan(path))?,
        #[cfg(unix)]
        (ScanMode::FdPass, _) if conn.can_pass_fd() => send_fd(conn, target)?,
        (ScanMode::FdPass, _) => {
            debug!(
                endpoint = %conn.endpoint(),
                "descriptor passing unavailable, streaming instead"
            );
            upload(conn, target, stream_end)?;
        }
        _ => upload(conn, target, stream_end)?,
    }
    Ok(())
}

/// Streams a file or standard input with `INSTREAM`.
fn upload(conn: &mut Connection, target: Option<&Path>, end: StreamEnd) -> Result<()> {
    let sent = match target {
        Some(path) => {
            let mut file = open(path)?;
            send_stream(conn, &mut file, end)?
        }
        None => send_stream(conn, &mut io::stdin().lock(), end)?,
    };
    if end == StreamEnd::HalfClose {
        conn.shutdown_write()?;
    }
    debug!(bytes = sent, "uploaded");
    Ok(())
}

/// Passes the descriptor of a file or of standard input with `FILDES`.
#[cfg(unix)]
fn send_fd(conn: &mut Connection, target: Option<&Path>) -> Result<()> {
    use std::os::unix::io::AsFd;

    match target {
        Some(path) => {
            let file = open(path)?;
            write_command(conn, &Command::Fildes)?;
            conn.send_fd(file.as_fd())?;
        }
        None => {
            let stdin = io::stdin();
            write_command(conn, &Command::Fildes)?;
            conn.send_fd(stdin.as_fd())?;
        }
    }
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| Error::Open {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs() -> ModePrefs {
        ModePrefs::default()
    }

    #[test]
    fn local_paths_default_to_contscan() {
        let unix = Endpoint::unix("/run/scand.sock");
        assert_eq!(ScanMode::select(&unix, false, &prefs()), (ScanMode::Contscan, false));
        let multi = ModePrefs {
            multiscan: true,
            ..prefs()
        };
        assert_eq!(ScanMode::select(&unix, false, &multi), (ScanMode::Multiscan, false));
    }

    #[cfg(unix)]
    #[test]
    fn fdpass_needs_a_local_unix_socket() {
        let p = ModePrefs {
            fdpass: true,
            multiscan: true,
            ..prefs()
        };
        let unix = Endpoint::unix("/run/scand.sock");
        assert_eq!(ScanMode::select(&unix, false, &p), (ScanMode::FdPass, true));
        let tcp = Endpoint::loopback(3310);
        assert_eq!(ScanMode::select(&tcp, false, &p), (ScanMode::Multiscan, false));
    }

    #[test]
    fn remote_and_stdin_upload() {
        let tcp = Endpoint::tcp("scan.example.org", 3310);
        assert_eq!(ScanMode::select(&tcp, true, &prefs()), (ScanMode::Stream, false));
        let stdin = ModePrefs {
            stdin: true,
            ..prefs()
        };
        assert_eq!(
            ScanMode::select(&Endpoint::loopback(3310), false, &stdin),
            (ScanMode::Stream, false)
        );
        let forced = ModePrefs {
            stream: true,
            multiscan: true,
            ..prefs()
        };
        assert_eq!(
            ScanMode::select(&Endpoint::unix("/s"), false, &forced),
            (ScanMode::Stream, true)
        );
    }

    #[cfg(unix)]
    #[test]
    fn local_stdin_prefers_fdpass() {
        let stdin = ModePrefs {
            stdin: true,
            ..prefs()
        };
        assert_eq!(
            ScanMode::select(&Endpoint::unix("/s"), false, &stdin),
            (ScanMode::FdPass, false)
        );
    }

    #[test]
    fn absolutize_joins_current_dir() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolutize(Path::new("")).unwrap(), cwd);
        assert_eq!(absolutize(Path::new("a/b")).unwrap(), cwd.join("a/b"));
        assert_eq!(absolutize(Path::new("/etc/passwd")).unwrap(), PathBuf::from("/etc/passwd"));
    }

    #[cfg(unix)]
    mod wire {
        use std::io::Read;
        use std::os::unix::net::UnixStream;

        use super::*;

        fn pair() -> (Connection, UnixStream) {
            let (a, b) = UnixStream::pair().unwrap();
            (Connection::unix(a, Endpoint::unix("/test.sock")), b)
        }

        fn sent(mut peer: UnixStream) -> Vec<u8> {
            let mut out = Vec::new();
            peer.read_to_end(&mut out).unwrap();
            out
        }

        #[test]
        fn whole_file_sends_path_command() {
            let (mut conn, peer) = pair();
            let path = Path::new("/srv/a b");
            send(&mut conn, ScanMode::Contscan, Some(path), StreamEnd::default(), false).unwrap();
            drop(conn);
            assert_eq!(sent(peer), b"zCONTSCAN /srv/a b\0");
        }

        #[test]
        fn stream_uploads_file_with_terminator() {
            let tmp = tempfile::tempdir().unwrap();
            let file = tmp.path().join("f");
            std::fs::write(&file, "abc").unwrap();
            let (mut conn, peer) = pair();
            send(&mut conn, ScanMode::Stream, Some(&file), StreamEnd::ZeroChunk, false).unwrap();
            drop(conn);
            assert_eq!(sent(peer), b"zINSTREAM\0\0\0\0\x03abc\0\0\0\0");
        }

        #[test]
        fn half_close_shuts_down_outside_sessions() {
            let tmp = tempfile::tempdir().unwrap();
            let file = tmp.path().join("f");
            std::fs::write(&file, "abc").unwrap();
            let (mut conn, peer) = pair();
            send(&mut conn, ScanMode::Stream, Some(&file), StreamEnd::HalfClose, false).unwrap();
            // EOF arrives while the connection is still open.
            assert_eq!(sent(peer), b"zINSTREAM\0\0\0\0\x03abc");
            drop(conn);
        }

        #[test]
        fn half_close_becomes_zero_chunk_in_session() {
            let tmp = tempfile::tempdir().unwrap();
            let file = tmp.path().join("f");
            std::fs::write(&file, "abc").unwrap();
            let (mut conn, peer) = pair();
            send(&mut conn, ScanMode::Stream, Some(&file), StreamEnd::HalfClose, true).unwrap();
            drop(conn);
            assert_eq!(sent(peer), b"zINSTREAM\0\0\0\0\x03abc\0\0\0\0");
        }

        #[test]
        fn unopenable_file_writes_nothing() {
            let tmp = tempfile::tempdir().unwrap();
            let (mut conn, peer) = pair();
            let missing = tmp.path().join("missing");
            let err = send(&mut conn, ScanMode::FdPass, Some(&missing), StreamEnd::default(), true)
                .unwrap_err();
            assert!(matches!(err, Error::Open { .. }));
            drop(conn);
            assert!(sent(peer).is_empty());
        }
    }
}
