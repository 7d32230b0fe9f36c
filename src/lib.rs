//! Wavesock: a client-side WebSocket protocol engine (RFC 6455).
//!
//! # Overview
//!
//! Wavesock speaks the WebSocket wire protocol over any bidirectional byte
//! stream. It performs the HTTP upgrade handshake, parses the inbound byte
//! stream into frames as chunks arrive, serializes outbound frames with
//! mandatory client masking, and exposes decoded messages either through
//! event callbacks or a pull-based asynchronous sequence.
//!
//! The crate owns no sockets: TLS, TCP and runtime integration live behind
//! the [`Transport`] trait, and every connection runs on a single logical
//! task.
//!
//! # Module Structure
//!
//! - [`buffer`]: chunked inbound byte queue with cross-chunk reads
//! - [`frame`]: frame codec (incremental decoder, masked encoder)
//! - [`handshake`]: HTTP upgrade request, nonce protocol, 101 validation
//! - [`close`]: close codes, validation, default descriptions
//! - [`connection`]: lifecycle state machine, dispatch, close handshake
//! - [`event`]: callback registry and message types
//! - [`transport`]: the byte-stream seam
//!
//! # Example
//!
//! ```ignore
//! use wavesock::{Connection, Options};
//!
//! let mut conn = Connection::new(Options::new().url("wss://example.com/feed"));
//! conn.on_message(|msg| println!("received: {msg:?}"));
//! conn.open(transport).await?;
//! conn.run().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod buffer;
pub mod close;
pub mod connection;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod transport;

pub use buffer::{ChunkQueue, QueueError};
pub use close::{
    describe, validate_close_code, CloseReason, CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS,
    CLOSE_PROTOCOL_ERROR,
};
pub use connection::{
    Connection, Delivery, Disconnect, Incoming, Options, Status, DEFAULT_CLOSE_TIMEOUT,
    DEFAULT_OPEN_TIMEOUT,
};
pub use event::{EventHandlers, Message};
pub use frame::{
    apply_mask, encode_frame, encode_frame_with_key, Frame, FrameDecoder, Opcode, WsError,
};
pub use handshake::{accept_key, ClientHandshake, HandshakeError, HttpResponse, WsUrl};
pub use transport::{Transport, TransportError};
