//! Error types for dscan operations.

use std::path::PathBuf;

use crate::endpoint::Endpoint;

/// Alias for `Result<T, dscan::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by connections, requests and administrative commands.
///
/// Per-file failures during a scan never surface here: they are folded into
/// the [`Tally`](crate::Tally) and the scan moves on.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No daemon endpoint was configured.
    #[error("daemon is not configured properly: no socket or TCP address")]
    NotConfigured,

    /// The endpoint host name did not resolve.
    #[error("can't look up daemon host {host}")]
    Unresolvable {
        /// Host name as configured.
        host: String,
    },

    /// Connecting to the daemon failed.
    #[error("can't connect to daemon at {endpoint}: {source}")]
    Connect {
        /// Endpoint that refused the connection.
        endpoint: Endpoint,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// A file to be scanned could not be opened.
    #[error("can't open {path}: {source}")]
    Open {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The daemon refused or did not acknowledge a reload.
    #[error("daemon did not reload the database (reply: {0:?})")]
    ReloadRefused(String),

    /// The daemon answered with something other than the expected reply.
    #[error("unexpected reply from daemon: {0:?}")]
    UnexpectedReply(String),

    /// Framing or reply-grammar violation.
    #[error(transparent)]
    Proto(#[from] dscan_proto::Error),

    /// Socket or filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
