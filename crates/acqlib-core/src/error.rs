//! Error types for acqlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Link-layer, protocol-layer, and
//! driver-level errors are all captured here.
//!
//! Note that per-target failures during command execution (a board that does
//! not answer, a channel in the wrong state) are *not* errors in this sense:
//! they are accumulated into [`Status`](crate::status::Status) bits in the
//! client reply. `Error` covers failures of the machinery itself.

/// The error type for all acqlib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A link-layer error (raw frame send failed, link down).
    #[error("link error: {0}")]
    Link(String),

    /// A protocol-level error (malformed board frame, unexpected signal id).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No link to the board has been established.
    #[error("not connected")]
    NotConnected,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
