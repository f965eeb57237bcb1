//! `INSTREAM` chunk framing.
//!
//! After the `zINSTREAM\0` command the file contents follow as a sequence of
//! chunks, each `[u32 big-endian length][payload]`.

use std::io::{self, Read, Write};

use crate::command::{Command, write_command};

/// Largest payload per chunk: one 8 KiB frame including its length header.
pub const MAX_CHUNK: usize = 8192 - 4;

/// How the end of an upload is signalled to the daemon.
///
/// Which one a daemon expects depends on its protocol revision; current
/// daemons wait for a zero-length chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum StreamEnd {
    /// Terminate with a zero-length chunk.
    #[default]
    ZeroChunk,
    /// Send nothing; the daemon infers the end from its own limits.
    Implied,
    /// Shut down the write half of the connection. Not usable inside a
    /// session, where it degrades to [`StreamEnd::ZeroChunk`].
    HalfClose,
}

impl std::fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ZeroChunk => "zero-chunk",
            Self::Implied => "implied",
            Self::HalfClose => "half-close",
        })
    }
}

impl std::str::FromStr for StreamEnd {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zero-chunk" | "zero" => Ok(Self::ZeroChunk),
            "implied" | "none" => Ok(Self::Implied),
            "half-close" | "shutdown" => Ok(Self::HalfClose),
            _ => Err(format!("unknown stream end: {s}")),
        }
    }
}

/// Writes a single length-prefixed chunk.
pub fn write_chunk<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk exceeds u32::MAX"))?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    w.write_all(&frame)
}

/// Sends `zINSTREAM\0` followed by the whole of `src` as chunks.
///
/// Only [`StreamEnd::ZeroChunk`] writes anything after the data;
/// [`StreamEnd::HalfClose`] is left to the caller, which owns the socket.
/// Returns the number of payload bytes sent.
pub fn send_stream<W: Write, R: Read>(w: &mut W, src: &mut R, end: StreamEnd) -> io::Result<u64> {
    write_command(w, &Command::Instream)?;

    let mut buf = vec![0u8; MAX_CHUNK];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        write_chunk(w, &buf[..n])?;
        total += n as u64;
    }

    if end == StreamEnd::ZeroChunk {
        write_chunk(w, &[])?;
    }
    w.flush()?;
    Ok(total)
}
