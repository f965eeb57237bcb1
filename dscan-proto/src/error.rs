//! Protocol error types.

/// Alias for `Result<T, dscan_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while framing requests or decoding replies.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying stream failed (other than an interrupted call).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A reply grew past the receive buffer without a terminator.
    #[error("overlong reply from daemon (no terminator within {capacity} bytes)")]
    Overlong {
        /// Receive buffer capacity in bytes.
        capacity: usize,
    },

    /// The daemon closed the connection in the middle of a reply.
    #[error("communication error: connection closed with {pending} unterminated bytes")]
    Truncated {
        /// Bytes of the partial record that were still buffered.
        pending: usize,
    },

    /// A reply line did not follow the `<path>: <verdict>` grammar.
    #[error("failed to parse reply: {0:?}")]
    Malformed(String),

    /// A session reply named an id that has no pending request.
    #[error("bogus session id from daemon: {0:?}")]
    UnknownSession(String),
}
