//! Connection lifecycle.
//!
//! A [`Connection`] owns the inbound [`ChunkQueue`], the current
//! [`FrameDecoder`] and the transport handle, and coordinates the upgrade
//! handshake, frame dispatch, the close handshake and failure paths.
//!
//! All state lives on one logical task: the transport pump and every public
//! operation take `&mut self`, so external calls are serialized with the
//! I/O loop structurally. Frames are dispatched in the order their first
//! header byte arrived, and a callback runs to completion before the next
//! frame is decoded.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::buffer::ChunkQueue;
use crate::close::{self, CloseReason, CLOSE_ABNORMAL, CLOSE_PROTOCOL_ERROR};
use crate::event::{EventHandlers, Message};
use crate::frame::{encode_frame, Frame, FrameDecoder, Opcode, WsError};
use crate::handshake::{header_end, ClientHandshake, HandshakeError, HttpResponse};
use crate::transport::{Transport, TransportError};

/// Default handshake budget.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(15);
/// Default close-handshake budget.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the upgrade response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No transport; the initial and terminal state.
    Closed,
    /// Upgrade request sent, response pending.
    Handshaking,
    /// Frames flow in both directions.
    Open,
    /// Our close frame is out, awaiting the peer's.
    Closing,
}

/// How decoded data frames reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Invoke the registered `message` handler from the pump.
    #[default]
    Callbacks,
    /// Queue messages for [`Connection::incoming`].
    Stream,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// WebSocket URL; required by `open` time.
    pub url: Option<String>,
    /// Handshake budget.
    pub timeout: Duration,
    /// Close-handshake budget.
    pub close_timeout: Duration,
    /// Data frame delivery mode.
    pub delivery: Delivery,
    /// Reply to Ping with an equal-payload Pong automatically.
    pub auto_pong: bool,
    /// Optional cap on inbound payload length.
    pub max_payload: Option<u64>,
    /// Subprotocols to request during the handshake.
    pub protocols: Vec<String>,
    /// Extra handshake request headers.
    pub headers: Vec<(String, String)>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: None,
            timeout: DEFAULT_OPEN_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            delivery: Delivery::Callbacks,
            auto_pong: true,
            max_payload: None,
            protocols: Vec::new(),
            headers: Vec::new(),
        }
    }
}

impl Options {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the WebSocket URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the handshake budget.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the close-handshake budget.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Selects the delivery mode.
    #[must_use]
    pub fn delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    /// Enables or disables automatic Pong replies.
    #[must_use]
    pub fn auto_pong(mut self, enabled: bool) -> Self {
        self.auto_pong = enabled;
        self
    }

    /// Caps inbound payload length.
    #[must_use]
    pub fn max_payload(mut self, max: Option<u64>) -> Self {
        self.max_payload = max;
        self
    }

    /// Adds a subprotocol to request.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Adds an extra handshake request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Terminal outcome of a connection, as seen by consumers.
///
/// Clean closes and failures are two variants of one sum so a single result
/// type covers the pull surface and the close future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The close handshake completed.
    Close {
        /// Close code from the handshake.
        code: u16,
        /// Reason text, defaulted from the code when the peer sent none.
        reason: String,
    },
    /// The connection was aborted.
    Error {
        /// Human-readable failure description.
        reason: String,
    },
}

impl Disconnect {
    /// True for a clean close.
    #[must_use]
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// True for an abnormal termination.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close { code, reason } => write!(f, "closed ({code}): {reason}"),
            Self::Error { reason } => write!(f, "connection failed: {reason}"),
        }
    }
}

impl std::error::Error for Disconnect {}

/// A client WebSocket connection over a [`Transport`].
pub struct Connection<T: Transport> {
    options: Options,
    status: Status,
    transport: Option<T>,
    inbound: ChunkQueue,
    decoder: FrameDecoder,
    handlers: EventHandlers,
    /// Data messages awaiting a pull-mode consumer.
    delivered: VecDeque<Message>,
    /// Terminal outcome, set exactly once per session.
    terminal: Option<Disconnect>,
    close_emitted: bool,
    failure_emitted: bool,
}

impl<T: Transport> Connection<T> {
    /// Creates a closed connection with the given options.
    #[must_use]
    pub fn new(options: Options) -> Self {
        let decoder = FrameDecoder::new().max_payload(options.max_payload);
        Self {
            options,
            status: Status::Closed,
            transport: None,
            inbound: ChunkQueue::new(),
            decoder,
            handlers: EventHandlers::new(),
            delivered: VecDeque::new(),
            terminal: None,
            close_emitted: false,
            failure_emitted: false,
        }
    }

    /// Creates a closed connection with an initial set of event handlers.
    #[must_use]
    pub fn with_handlers(options: Options, handlers: EventHandlers) -> Self {
        let mut conn = Self::new(options);
        conn.handlers = handlers;
        conn
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// True while frames can be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == Status::Open
    }

    /// Registers the `open` handler.
    pub fn on_open(&mut self, handler: impl FnMut() + 'static) {
        self.handlers.open = Some(Box::new(handler));
    }

    /// Registers the `frame` handler, invoked for every inbound frame.
    pub fn on_frame(&mut self, handler: impl FnMut(&Frame) + 'static) {
        self.handlers.frame = Some(Box::new(handler));
    }

    /// Registers the `message` handler (callback delivery mode).
    pub fn on_message(&mut self, handler: impl FnMut(Message) + 'static) {
        self.handlers.message = Some(Box::new(handler));
    }

    /// Registers the `ping` handler.
    pub fn on_ping(&mut self, handler: impl FnMut(&Bytes) + 'static) {
        self.handlers.ping = Some(Box::new(handler));
    }

    /// Registers the `pong` handler.
    pub fn on_pong(&mut self, handler: impl FnMut(&Bytes) + 'static) {
        self.handlers.pong = Some(Box::new(handler));
    }

    /// Registers the `close` handler.
    pub fn on_close(&mut self, handler: impl FnMut(&CloseReason) + 'static) {
        self.handlers.close = Some(Box::new(handler));
    }

    /// Registers the `failure` handler.
    pub fn on_failure(&mut self, handler: impl FnMut(&str) + 'static) {
        self.handlers.failure = Some(Box::new(handler));
    }

    /// Performs the upgrade handshake over a connected transport.
    ///
    /// On success the connection is Open and the `open` event fires. A
    /// handshake failure or timeout closes the connection and dispatches
    /// `close(1006)` and `failure` before the error is returned.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::AlreadyConnected`] unless currently Closed;
    /// [`HandshakeError::MissingUrl`] without a configured URL; otherwise
    /// any validation or transport failure from the exchange.
    pub async fn open(&mut self, mut transport: T) -> Result<(), HandshakeError> {
        if self.status != Status::Closed {
            return Err(HandshakeError::AlreadyConnected);
        }
        let Some(url) = self.options.url.clone() else {
            return Err(HandshakeError::MissingUrl);
        };
        let mut handshake = ClientHandshake::new(&url)?;
        for protocol in &self.options.protocols {
            handshake = handshake.protocol(protocol.clone());
        }
        for (name, value) in &self.options.headers {
            handshake = handshake.header(name.clone(), value.clone());
        }

        self.reset_session();
        self.status = Status::Handshaking;
        let deadline = Instant::now() + self.options.timeout;

        match exchange_upgrade(&mut transport, &handshake, deadline).await {
            Ok(residual) => {
                self.inbound.append(residual);
                self.transport = Some(transport);
                self.status = Status::Open;
                debug!(%url, "connection open");
                self.handlers.emit_open();
                Ok(())
            }
            Err(err) => {
                transport.shutdown().await;
                let reason = err.to_string();
                debug!(%url, %reason, "handshake failed");
                self.finish_error(CLOSE_ABNORMAL, &reason);
                Err(err)
            }
        }
    }

    /// Like [`Connection::open`], with the URL supplied at call time
    /// instead of through [`Options`].
    ///
    /// # Errors
    ///
    /// Same as [`Connection::open`].
    pub async fn open_url(&mut self, url: &str, transport: T) -> Result<(), HandshakeError> {
        if self.status != Status::Closed {
            return Err(HandshakeError::AlreadyConnected);
        }
        self.options.url = Some(url.to_string());
        self.open(transport).await
    }

    /// Sends a data message.
    ///
    /// Text input becomes a Text frame, bytes a Binary frame. Returns
    /// `Ok(false)` when the connection is not Open, or when a transport
    /// write failure aborted it mid-send (the `failure` event carries the
    /// cause).
    ///
    /// # Errors
    ///
    /// Frame validation errors only; these leave the connection untouched.
    pub async fn send(&mut self, message: impl Into<Message>) -> Result<bool, WsError> {
        if self.status != Status::Open {
            return Ok(false);
        }
        let (opcode, payload) = match message.into() {
            Message::Text(text) => (Opcode::Text, Bytes::from(text)),
            Message::Binary(data) => (Opcode::Binary, data),
        };
        self.write_frame(opcode, &payload, None).await
    }

    /// Sends a Ping frame. `Ok(false)` when not Open.
    ///
    /// # Errors
    ///
    /// [`WsError::ControlFrameTooLarge`] for payloads over 125 bytes.
    pub async fn ping(&mut self, payload: impl Into<Bytes>) -> Result<bool, WsError> {
        if self.status != Status::Open {
            return Ok(false);
        }
        self.write_frame(Opcode::Ping, &payload.into(), None).await
    }

    /// Sends a Pong frame. `Ok(false)` when not Open.
    ///
    /// # Errors
    ///
    /// [`WsError::ControlFrameTooLarge`] for payloads over 125 bytes.
    pub async fn pong(&mut self, payload: impl Into<Bytes>) -> Result<bool, WsError> {
        if self.status != Status::Open {
            return Ok(false);
        }
        self.write_frame(Opcode::Pong, &payload.into(), None).await
    }

    /// Initiates the close handshake and waits for the peer's reply.
    ///
    /// Resolves with the final close code and reason once the peer echoes,
    /// or fails when the close deadline passes or the transport drops.
    /// Called after the connection already finished, it reports the
    /// recorded outcome.
    ///
    /// # Errors
    ///
    /// An invalid `code` is rejected up front without touching the
    /// connection; an aborted close reports [`Disconnect::Error`].
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<CloseReason, Disconnect> {
        if self.status != Status::Open {
            return self.close_outcome();
        }
        if let Err(err) = close::validate_close_code(code) {
            return Err(Disconnect::Error {
                reason: err.to_string(),
            });
        }

        debug!(code, "initiating close handshake");
        match self.write_frame(Opcode::Close, reason.as_bytes(), Some(code)).await {
            Ok(true) => {}
            // Write failure already aborted; oversized reasons reject here.
            Ok(false) => return self.close_outcome(),
            Err(err) => {
                return Err(Disconnect::Error {
                    reason: err.to_string(),
                })
            }
        }
        self.status = Status::Closing;

        let deadline = Instant::now() + self.options.close_timeout;
        while self.status != Status::Closed {
            self.pump(Some(deadline)).await;
        }
        self.close_outcome()
    }

    /// Force-terminates the connection with close code 1006.
    ///
    /// Idempotent: the first call ends the transport and dispatches one
    /// `close` and one `failure`; later calls (or a call on a connection
    /// that never opened) return `false` with no side effects.
    pub async fn abort(&mut self, reason: &str) -> bool {
        self.abort_with(CLOSE_ABNORMAL, reason).await
    }

    /// Pull surface over decoded data messages (Stream delivery mode).
    ///
    /// Single-consumer by construction: the stream borrows the connection
    /// exclusively.
    pub fn incoming(&mut self) -> Incoming<'_, T> {
        Incoming { conn: self }
    }

    /// Callback-mode pump; returns once the connection reaches Closed.
    pub async fn run(&mut self) {
        while self.status != Status::Closed {
            self.pump(None).await;
        }
    }

    fn reset_session(&mut self) {
        self.inbound.clear();
        self.decoder = FrameDecoder::new().max_payload(self.options.max_payload);
        self.delivered.clear();
        self.terminal = None;
        self.close_emitted = false;
        self.failure_emitted = false;
    }

    fn close_outcome(&self) -> Result<CloseReason, Disconnect> {
        match &self.terminal {
            Some(Disconnect::Close { code, reason }) => Ok(CloseReason::new(*code, reason.clone())),
            Some(err @ Disconnect::Error { .. }) => Err(err.clone()),
            None => Err(Disconnect::Error {
                reason: "connection is not open".to_string(),
            }),
        }
    }

    async fn abort_with(&mut self, code: u16, reason: &str) -> bool {
        if self.status == Status::Closed {
            return false;
        }
        debug!(code, reason, "aborting connection");
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        self.finish_error(code, reason);
        true
    }

    /// Marks the session failed; emits `close` and `failure` at most once.
    fn finish_error(&mut self, code: u16, reason: &str) {
        self.status = Status::Closed;
        self.inbound.clear();
        if self.terminal.is_none() {
            self.terminal = Some(Disconnect::Error {
                reason: reason.to_string(),
            });
        }
        if !self.close_emitted {
            self.close_emitted = true;
            self.handlers.emit_close(&CloseReason::new(code, reason));
        }
        if !self.failure_emitted {
            self.failure_emitted = true;
            self.handlers.emit_failure(reason);
        }
    }

    /// Marks the session cleanly closed; emits `close` at most once.
    fn finish_close(&mut self, close: CloseReason) {
        self.status = Status::Closed;
        self.inbound.clear();
        if self.terminal.is_none() {
            self.terminal = Some(Disconnect::Close {
                code: close.code,
                reason: close.reason.clone(),
            });
        }
        if !self.close_emitted {
            self.close_emitted = true;
            self.handlers.emit_close(&close);
        }
    }

    /// Encodes and writes one frame. `Ok(false)` means a transport failure
    /// aborted the connection.
    async fn write_frame(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        close_code: Option<u16>,
    ) -> Result<bool, WsError> {
        let buf = encode_frame(opcode, payload, close_code)?;
        let Some(transport) = self.transport.as_mut() else {
            return Ok(false);
        };
        if let Err(err) = transport.write_all(&buf).await {
            let reason = format!("transport write failed: {err}");
            self.abort_with(CLOSE_ABNORMAL, &reason).await;
            return Ok(false);
        }
        trace!(opcode = ?opcode, len = payload.len(), "frame sent");
        Ok(true)
    }

    /// Makes one unit of progress: dispatches buffered frames, reading one
    /// more chunk when nothing was decodable.
    async fn pump(&mut self, deadline: Option<Instant>) {
        if self.drain_frames().await > 0 || self.status == Status::Closed {
            return;
        }

        let limit = match deadline {
            Some(d) => match d.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => Some(remaining),
                _ => {
                    self.abort_with(CLOSE_ABNORMAL, "close handshake timed out")
                        .await;
                    return;
                }
            },
            None => None,
        };

        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.read_chunk(limit).await {
            Ok(Some(chunk)) => {
                trace!(len = chunk.len(), "chunk received");
                self.inbound.append(chunk);
                self.drain_frames().await;
            }
            Ok(None) => {
                self.abort_with(CLOSE_ABNORMAL, "transport reached end of stream")
                    .await;
            }
            Err(TransportError::TimedOut) => {
                self.abort_with(CLOSE_ABNORMAL, "timed out waiting for data")
                    .await;
            }
            Err(err) => {
                let reason = err.to_string();
                self.abort_with(CLOSE_ABNORMAL, &reason).await;
            }
        }
    }

    /// Dispatches every complete frame currently buffered; returns how many
    /// frames were dispatched.
    async fn drain_frames(&mut self) -> usize {
        let mut dispatched = 0;
        while self.status != Status::Closed {
            match self.decoder.decode(&mut self.inbound) {
                Ok(Some(frame)) => {
                    dispatched += 1;
                    self.dispatch_frame(frame).await;
                }
                Ok(None) => break,
                Err(err) => {
                    let reason = err.to_string();
                    self.abort_with(CLOSE_PROTOCOL_ERROR, &reason).await;
                    break;
                }
            }
        }
        dispatched
    }

    async fn dispatch_frame(&mut self, frame: Frame) {
        trace!(opcode = ?frame.opcode, len = frame.payload.len(), "frame received");
        self.handlers.emit_frame(&frame);

        // During the close handshake only the peer's Close matters.
        if self.status == Status::Closing && frame.opcode != Opcode::Close {
            return;
        }

        match frame.opcode {
            // Fragmented messages are not reassembled; the frame event above
            // is the only way continuations surface.
            Opcode::Continuation => {}
            Opcode::Text => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                self.deliver(Message::Text(text));
            }
            Opcode::Binary => self.deliver(Message::Binary(frame.payload)),
            Opcode::Ping => {
                self.handlers.emit_ping(&frame.payload);
                if self.options.auto_pong && self.status == Status::Open {
                    let _ = self.write_frame(Opcode::Pong, &frame.payload, None).await;
                }
            }
            Opcode::Pong => self.handlers.emit_pong(&frame.payload),
            Opcode::Close => self.handle_close_frame(&frame.payload).await,
        }
    }

    fn deliver(&mut self, message: Message) {
        match self.options.delivery {
            Delivery::Callbacks => self.handlers.emit_message(message),
            Delivery::Stream => self.delivered.push_back(message),
        }
    }

    async fn handle_close_frame(&mut self, payload: &[u8]) {
        let parsed = CloseReason::parse(payload);
        let has_code = payload.len() >= 2;

        match self.status {
            Status::Open => {
                // Peer-initiated close. A code carried on the wire must be
                // sendable; a violation is answered with 1002.
                if has_code && close::validate_close_code(parsed.code).is_err() {
                    let message = WsError::InvalidCloseCode(parsed.code).to_string();
                    debug!(code = parsed.code, "peer sent invalid close code");
                    let _ = self
                        .write_frame(Opcode::Close, message.as_bytes(), Some(CLOSE_PROTOCOL_ERROR))
                        .await;
                    if self.status == Status::Closed {
                        return;
                    }
                    if let Some(mut transport) = self.transport.take() {
                        transport.shutdown().await;
                    }
                    self.finish_close(CloseReason::new(CLOSE_PROTOCOL_ERROR, message));
                    return;
                }

                // Echo exactly once, then the handshake is complete.
                let echo_code = has_code.then_some(parsed.code);
                let _ = self.write_frame(Opcode::Close, &[], echo_code).await;
                if self.status == Status::Closed {
                    return;
                }
                if let Some(mut transport) = self.transport.take() {
                    transport.shutdown().await;
                }
                debug!(code = parsed.code, "close received while open");
                let reason = parsed.reason_or_default();
                self.finish_close(CloseReason::new(parsed.code, reason));
            }
            Status::Closing => {
                // The peer acknowledged our close; no second echo.
                if let Some(mut transport) = self.transport.take() {
                    transport.shutdown().await;
                }
                debug!(code = parsed.code, "close handshake complete");
                let reason = parsed.reason_or_default();
                self.finish_close(CloseReason::new(parsed.code, reason));
            }
            Status::Closed | Status::Handshaking => {}
        }
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status)
            .field("transport", &self.transport.is_some())
            .field("buffered", &self.inbound.len())
            .field("queued_messages", &self.delivered.len())
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

/// Pull-mode message sequence returned by [`Connection::incoming`].
#[derive(Debug)]
pub struct Incoming<'a, T: Transport> {
    conn: &'a mut Connection<T>,
}

impl<T: Transport> Incoming<'_, T> {
    /// Waits for the next data message.
    ///
    /// # Errors
    ///
    /// Terminates with [`Disconnect::Close`] after a clean close and
    /// [`Disconnect::Error`] after an abort; every later call repeats the
    /// same terminal outcome.
    pub async fn next(&mut self) -> Result<Message, Disconnect> {
        loop {
            if let Some(message) = self.conn.delivered.pop_front() {
                return Ok(message);
            }
            if let Some(terminal) = &self.conn.terminal {
                return Err(terminal.clone());
            }
            if self.conn.status == Status::Closed {
                return Err(Disconnect::Error {
                    reason: "connection is not open".to_string(),
                });
            }
            self.conn.pump(None).await;
        }
    }
}

/// Runs the HTTP upgrade exchange: request out, response head in, residual
/// bytes (early frames) back to the caller.
async fn exchange_upgrade<T: Transport>(
    transport: &mut T,
    handshake: &ClientHandshake,
    deadline: Instant,
) -> Result<Bytes, HandshakeError> {
    transport.write_all(&handshake.request_bytes()).await?;

    let mut head: Vec<u8> = Vec::with_capacity(1024);
    loop {
        if let Some(end) = header_end(&head) {
            let response = HttpResponse::parse(&head[..end])?;
            handshake.validate_response(&response)?;
            return Ok(Bytes::copy_from_slice(&head[end..]));
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(HandshakeError::Transport(TransportError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "upgrade response head too large",
                ),
            }));
        }
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(HandshakeError::Timeout)?;
        match transport.read_chunk(Some(remaining)).await? {
            Some(chunk) => head.extend_from_slice(&chunk),
            None => return Err(HandshakeError::Transport(TransportError::Reset)),
        }
    }
}
