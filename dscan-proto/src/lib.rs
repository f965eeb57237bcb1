//! Wire protocol for the scanning daemon.
//!
//! Every command and every reply is a NUL-terminated line. Commands carry a
//! leading `z` sentinel (`zCONTSCAN /path\0`), replies are plain text
//! (`/path: Eicar-Signature FOUND\0`). File contents uploaded with
//! `INSTREAM` travel as chunks framed with a 4-byte big-endian length
//! prefix.

mod chunk;
mod command;
mod error;
mod line;
mod reply;

pub use chunk::{MAX_CHUNK, StreamEnd, send_stream, write_chunk};
pub use command::{Command, write_command};
pub use error::{Error, Result};
pub use line::{LineReader, REPLY_CAPACITY};
pub use reply::{MIN_REPLY_LEN, Reply, STREAM_NAME, Status, split_session_id};
