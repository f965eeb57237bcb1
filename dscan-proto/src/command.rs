//! Daemon command frames.

use std::io::{self, Write};
use std::path::Path;

/// Sentinel prefix selecting NUL-terminated command framing.
const SENTINEL: u8 = b'z';

/// A command understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command<'a> {
    /// Scan a path, continuing after the first match.
    Contscan(&'a Path),
    /// Scan a path, letting the daemon spread the tree over its threads.
    Multiscan(&'a Path),
    /// Begin a chunked upload of file contents.
    Instream,
    /// Begin a file-descriptor pass.
    Fildes,
    /// Open a pipelined session; replies are prefixed with `<id>: `.
    Idsession,
    /// Close a pipelined session.
    End,
    /// Ask for the daemon and database version.
    Version,
    /// Ask the daemon to reload its signature database.
    Reload,
    /// Liveness check.
    Ping,
}

impl Command<'_> {
    /// Protocol keyword.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Contscan(_) => "CONTSCAN",
            Self::Multiscan(_) => "MULTISCAN",
            Self::Instream => "INSTREAM",
            Self::Fildes => "FILDES",
            Self::Idsession => "IDSESSION",
            Self::End => "END",
            Self::Version => "VERSION",
            Self::Reload => "RELOAD",
            Self::Ping => "PING",
        }
    }

    /// Encodes the command as `z<NAME>[ <path>]\0`.
    ///
    /// Paths are sent verbatim; the daemon resolves them in its own working
    /// directory, so callers pass absolute paths.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(16);
        frame.push(SENTINEL);
        frame.extend_from_slice(self.name().as_bytes());
        if let Self::Contscan(path) | Self::Multiscan(path) = self {
            frame.push(b' ');
            frame.extend_from_slice(path_bytes(path).as_ref());
        }
        frame.push(0);
        frame
    }
}

/// Writes one command frame to `w`.
///
/// `write_all` already retries interrupted writes.
pub fn write_command<W: Write>(w: &mut W, cmd: &Command<'_>) -> io::Result<()> {
    w.write_all(&cmd.encode())?;
    w.flush()
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Owned(path.to_string_lossy().into_owned().into_bytes())
}
