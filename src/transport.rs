//! Transport seam.
//!
//! The engine never opens sockets. It consumes a bidirectional byte stream
//! through [`Transport`]: chunked reads, whole-buffer writes, and a
//! shutdown primitive. TLS, TCP, proxies and runtimes all live behind this
//! trait; an adapter maps the optional read `limit` onto its runtime's
//! timer so the handshake and close deadlines work anywhere.

use bytes::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O error.
    #[error("I/O error: {source}")]
    Io {
        /// The source I/O error.
        #[from]
        source: io::Error,
    },

    /// A read did not complete within the requested limit.
    #[error("Timed out waiting for data")]
    TimedOut,

    /// The connection was reset.
    #[error("Connection reset")]
    Reset,
}

/// A connected bidirectional byte stream.
///
/// Implementations are driven from a single task; the engine is the sole
/// reader and serializes its own writes.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Waits for the next chunk of bytes from the peer.
    ///
    /// Returns `Ok(None)` at end of stream. When `limit` is given and no
    /// chunk arrives in time, the implementation must return
    /// [`TransportError::TimedOut`].
    async fn read_chunk(&mut self, limit: Option<Duration>)
        -> Result<Option<Bytes>, TransportError>;

    /// Writes the entire buffer to the peer.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Closes the stream. Infallible; failures during teardown are moot.
    async fn shutdown(&mut self);
}
