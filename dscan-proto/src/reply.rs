//! Reply grammar: `[<id>: ]<path>: <verdict>`.
//!
//! The verdict is `OK`, `<signature> FOUND` or `<message> ERROR`. Only the
//! tail of the line is trusted: the path is whatever precedes the last colon,
//! so paths that themselves contain colons survive intact.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Shortest reply body that can carry a verdict (`": OK"`).
pub const MIN_REPLY_LEN: usize = 4;

/// Name the daemon uses for uploaded and passed-descriptor content.
pub const STREAM_NAME: &str = "stream";

const FOUND: &[u8] = b" FOUND";
const ERROR: &[u8] = b" ERROR";

/// Classification of one scanned item.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Status {
    /// Nothing found.
    Clean,
    /// A signature matched.
    Infected(String),
    /// The daemon could not scan the item.
    Error(String),
}

impl Status {
    /// Returns `true` for [`Status::Infected`].
    pub const fn is_infected(&self) -> bool {
        matches!(self, Self::Infected(_))
    }

    /// Returns `true` for [`Status::Error`].
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => f.write_str("OK"),
            Self::Infected(sig) => write!(f, "{sig} FOUND"),
            Self::Error(msg) => write!(f, "{msg} ERROR"),
        }
    }
}

/// A decoded reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Path as reported by the daemon (`stream` for uploads).
    pub path: PathBuf,
    /// Verdict for that path.
    pub status: Status,
}

impl Reply {
    /// Parses a reply body (session id already removed, no terminator).
    pub fn parse(line: &[u8]) -> Result<Self> {
        if line.len() < MIN_REPLY_LEN {
            return Err(malformed(line));
        }
        let colon = line
            .iter()
            .rposition(|&b| b == b':')
            .ok_or_else(|| malformed(line))?;
        let rest = &line[colon + 1..];

        let status = if let Some(sig) = rest.strip_suffix(FOUND) {
            Status::Infected(text(sig))
        } else if let Some(msg) = rest.strip_suffix(ERROR) {
            Status::Error(text(msg))
        } else {
            Status::Clean
        };

        Ok(Self {
            path: bytes_to_path(&line[..colon]),
            status,
        })
    }

    /// Returns `true` if the daemon named the generic stream instead of a path.
    pub fn is_stream(&self) -> bool {
        self.path.as_os_str() == STREAM_NAME
    }
}

/// Splits the `<id>: ` prefix off a session reply.
///
/// A missing, zero or non-numeric id cannot be matched to any request and is
/// reported as [`Error::UnknownSession`].
pub fn split_session_id(line: &[u8]) -> Result<(u64, &[u8])> {
    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    let unknown = || Error::UnknownSession(String::from_utf8_lossy(line).into_owned());

    if digits == 0 || line.get(digits) != Some(&b':') {
        return Err(unknown());
    }
    let id: u64 = std::str::from_utf8(&line[..digits])
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&id| id != 0)
        .ok_or_else(unknown)?;

    let body = &line[digits + 1..];
    Ok((id, body.strip_prefix(b" ").unwrap_or(body)))
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}

fn malformed(line: &[u8]) -> Error {
    Error::Malformed(String::from_utf8_lossy(line).into_owned())
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
