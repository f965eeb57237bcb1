//! Incremental NUL-delimited record reader.
//!
//! The daemon answers with NUL-terminated lines that may arrive split across
//! any number of `recv` calls, or several to a single call. [`LineReader`]
//! keeps the unconsumed bytes in a fixed-capacity buffer between calls so no
//! byte is ever dropped or reordered.

use std::io::{self, Read};

use crate::error::{Error, Result};

/// Receive buffer capacity: a maximal path plus room for the verdict text.
pub const REPLY_CAPACITY: usize = 4096 + 1024;

/// Bounded reader that yields one NUL-terminated record at a time.
///
/// Buffer layout: `bol` is the start of the first record not yet returned,
/// `cur` marks how far that record was already searched for a terminator and
/// `end` is one past the last received byte. `bol <= cur <= end <= capacity`
/// holds between calls.
#[derive(Debug)]
pub struct LineReader<R> {
    /// Byte source, usually a connected socket.
    inner: R,
    /// Fixed receive buffer.
    buf: Box<[u8]>,
    /// Begin of the current record.
    bol: usize,
    /// Search cursor: `buf[bol..cur]` is known to hold no NUL.
    cur: usize,
    /// End of received data.
    end: usize,
}

impl<R: Read> LineReader<R> {
    /// Wraps `inner` with the default [`REPLY_CAPACITY`].
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, REPLY_CAPACITY)
    }

    /// Wraps `inner` with a receive buffer of `capacity` bytes.
    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: vec![0; capacity.max(1)].into_boxed_slice(),
            bol: 0,
            cur: 0,
            end: 0,
        }
    }

    /// Returns the next record without its terminator.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly between records.
    /// A close in the middle of a record is [`Error::Truncated`]; a record
    /// that does not fit the buffer is [`Error::Overlong`]. Interrupted
    /// reads are retried.
    pub fn read_record(&mut self) -> Result<Option<&[u8]>> {
        loop {
            if let Some(pos) = self.buf[self.cur..self.end].iter().position(|&b| b == 0) {
                let start = self.bol;
                let nul = self.cur + pos;
                if nul + 1 == self.end {
                    // Everything consumed: rewind so the next receive gets the whole buffer.
                    self.bol = 0;
                    self.cur = 0;
                    self.end = 0;
                } else {
                    self.bol = nul + 1;
                    self.cur = self.bol;
                }
                return Ok(Some(&self.buf[start..nul]));
            }
            self.cur = self.end;

            if self.end - self.bol == self.buf.len() {
                return Err(Error::Overlong {
                    capacity: self.buf.len(),
                });
            }
            self.compact();

            match self.inner.read(&mut self.buf[self.end..]) {
                Ok(0) if self.end == self.bol => return Ok(None),
                Ok(0) => {
                    return Err(Error::Truncated {
                        pending: self.end - self.bol,
                    });
                }
                Ok(n) => self.end += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Returns `true` if a complete record is already buffered, i.e. the
    /// next [`read_record`](Self::read_record) will not touch the stream.
    pub fn has_record(&self) -> bool {
        self.buf[self.cur..self.end].contains(&0)
    }

    /// Number of received bytes not yet returned as records.
    pub const fn buffered(&self) -> usize {
        self.end - self.bol
    }

    /// Moves the partial record to the front of the buffer.
    fn compact(&mut self) {
        if self.bol == 0 {
            return;
        }
        self.buf.copy_within(self.bol..self.end, 0);
        self.cur -= self.bol;
        self.end -= self.bol;
        self.bol = 0;
    }
}

impl<R> LineReader<R> {
    /// Borrows the underlying source.
    pub const fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrows the underlying source, e.g. to write requests to the
    /// same socket.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwraps the source, discarding any buffered bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
