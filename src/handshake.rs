//! HTTP upgrade handshake (RFC 6455 Section 4), client side.
//!
//! The client sends a GET with upgrade headers and a random base64 nonce in
//! `Sec-WebSocket-Key`; the server proves it understood the request by
//! echoing `base64(SHA1(nonce ‖ GUID))` in `Sec-WebSocket-Accept`.
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: WebSocket
//! Connection: upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```

use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;

use crate::transport::TransportError;

/// RFC 6455 GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
///
/// Per RFC 6455 Section 4.2.2: SHA-1 over the key concatenated with the
/// GUID, base64-encoded.
///
/// # Example
///
/// ```
/// let accept = wavesock::handshake::accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Generate a random 16-byte nonce, base64-encoded.
fn generate_key() -> String {
    let mut key = [0u8; 16];
    getrandom::fill(&mut key).expect("OS RNG unavailable");
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Offset just past the `\r\n\r\n` terminating an HTTP header block, if the
/// block is complete. Bytes after it belong to the frame stream.
pub(crate) fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Handshake failures.
#[derive(Debug)]
pub enum HandshakeError {
    /// Response status was not 101 Switching Protocols.
    BadStatus(u16),
    /// A required upgrade header is absent from the response.
    MissingHeaders,
    /// `Connection` response header is not `upgrade`.
    BadConnectionHeader(String),
    /// `Upgrade` response header is not `websocket`.
    BadUpgradeHeader(String),
    /// `Sec-WebSocket-Accept` did not match the expected digest.
    NonceMismatch {
        /// Accept value derived from our nonce.
        expected: String,
        /// Accept value the server sent.
        actual: String,
    },
    /// URL scheme other than `ws` or `wss`.
    UnsupportedScheme(String),
    /// URL is malformed.
    InvalidUrl(String),
    /// No URL was configured by open time.
    MissingUrl,
    /// The handshake did not complete within the open deadline.
    Timeout,
    /// `open` was called on a connection that is not closed.
    AlreadyConnected,
    /// The transport failed mid-handshake.
    Transport(TransportError),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadStatus(status) => {
                write!(f, "expected 101 Switching Protocols, got {status}")
            }
            Self::MissingHeaders => write!(f, "response is missing required upgrade headers"),
            Self::BadConnectionHeader(got) => {
                write!(f, "Connection header must be 'upgrade', got '{got}'")
            }
            Self::BadUpgradeHeader(got) => {
                write!(f, "Upgrade header must be 'websocket', got '{got}'")
            }
            Self::NonceMismatch { expected, actual } => {
                write!(
                    f,
                    "Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}"
                )
            }
            Self::UnsupportedScheme(scheme) => write!(f, "unsupported URL scheme: {scheme}"),
            Self::InvalidUrl(msg) => write!(f, "invalid URL: {msg}"),
            Self::MissingUrl => write!(f, "no URL configured"),
            Self::Timeout => write!(f, "handshake timed out"),
            Self::AlreadyConnected => write!(f, "connection is not closed"),
            Self::Transport(e) => write!(f, "transport failed during handshake: {e}"),
        }
    }
}

impl std::error::Error for HandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for HandshakeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::TimedOut => Self::Timeout,
            other => Self::Transport(other),
        }
    }
}

/// Parsed WebSocket URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// Host name or IP address.
    pub host: String,
    /// Port number (default: 80 for ws, 443 for wss).
    pub port: u16,
    /// Request path including any query string (default: "/").
    pub path: String,
    /// Whether TLS is required (wss://).
    pub tls: bool,
}

impl WsUrl {
    /// Parse a WebSocket URL.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::UnsupportedScheme`] for anything other than `ws`
    /// or `wss`; [`HandshakeError::InvalidUrl`] for malformed input.
    pub fn parse(url: &str) -> Result<Self, HandshakeError> {
        // Fragments never go on the wire.
        let url = url.split_once('#').map_or(url, |(head, _)| head);

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| HandshakeError::InvalidUrl("missing scheme".into()))?;

        let tls = match scheme {
            "ws" => false,
            "wss" => true,
            other => return Err(HandshakeError::UnsupportedScheme(other.to_string())),
        };

        let default_port = if tls { 443 } else { 80 };

        let (host_port, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = if let Some(bracket_end) = host_port.find(']') {
            // IPv6: [::1]:8080
            let host = &host_port[1..bracket_end];
            let port = if host_port.len() > bracket_end + 1
                && host_port.as_bytes()[bracket_end + 1] == b':'
            {
                host_port[bracket_end + 2..]
                    .parse()
                    .map_err(|_| HandshakeError::InvalidUrl("invalid port".into()))?
            } else {
                default_port
            };
            (host.to_string(), port)
        } else if let Some(colon_idx) = host_port.rfind(':') {
            let host = &host_port[..colon_idx];
            let port = host_port[colon_idx + 1..]
                .parse()
                .map_err(|_| HandshakeError::InvalidUrl("invalid port".into()))?;
            (host.to_string(), port)
        } else {
            (host_port.to_string(), default_port)
        };

        if host.is_empty() {
            return Err(HandshakeError::InvalidUrl("empty host".into()));
        }

        Ok(Self {
            host,
            port,
            path: path.to_string(),
            tls,
        })
    }

    /// The `Host` header value, eliding the scheme's default port.
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Client-side handshake: owns the nonce, builds the request, validates the
/// response.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    url: WsUrl,
    /// Random nonce, base64 encoded.
    key: String,
    /// Requested subprotocols.
    protocols: Vec<String>,
    /// Additional request headers.
    headers: HashMap<String, String>,
}

impl ClientHandshake {
    /// Create a new client handshake for the given URL.
    ///
    /// # Errors
    ///
    /// Propagates URL parse failures.
    pub fn new(url: &str) -> Result<Self, HandshakeError> {
        Ok(Self {
            url: WsUrl::parse(url)?,
            key: generate_key(),
            protocols: Vec::new(),
            headers: HashMap::new(),
        })
    }

    /// Add a subprotocol to request.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add a custom request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns the parsed URL.
    #[must_use]
    pub fn url(&self) -> &WsUrl {
        &self.url
    }

    /// Returns the client nonce.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Generate the HTTP upgrade request as bytes.
    #[must_use]
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: WebSocket\r\n\
             Connection: upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.url.path,
            self.url.host_header(),
            self.key
        );

        if !self.protocols.is_empty() {
            request.push_str("Sec-WebSocket-Protocol: ");
            request.push_str(&self.protocols.join(", "));
            request.push_str("\r\n");
        }

        for (name, value) in &self.headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }

        request.push_str("\r\n");
        request.into_bytes()
    }

    /// Validate the server's 101 response.
    ///
    /// Checks run in a fixed order: status, header presence, `Connection`,
    /// `Upgrade`, then the accept digest.
    ///
    /// # Errors
    ///
    /// One of [`HandshakeError::BadStatus`], [`HandshakeError::MissingHeaders`],
    /// [`HandshakeError::BadConnectionHeader`], [`HandshakeError::BadUpgradeHeader`]
    /// or [`HandshakeError::NonceMismatch`].
    pub fn validate_response(&self, response: &HttpResponse) -> Result<(), HandshakeError> {
        if response.status != 101 {
            return Err(HandshakeError::BadStatus(response.status));
        }

        let (Some(connection), Some(upgrade), Some(accept)) = (
            response.header("connection"),
            response.header("upgrade"),
            response.header("sec-websocket-accept"),
        ) else {
            return Err(HandshakeError::MissingHeaders);
        };

        if !connection.eq_ignore_ascii_case("upgrade") {
            return Err(HandshakeError::BadConnectionHeader(connection.to_string()));
        }
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::BadUpgradeHeader(upgrade.to_string()));
        }

        let expected = accept_key(&self.key);
        if accept != expected {
            return Err(HandshakeError::NonceMismatch {
                expected,
                actual: accept.to_string(),
            });
        }

        Ok(())
    }
}

/// Minimal HTTP response representation for the handshake.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase.
    pub reason: String,
    /// Headers, lowercase keys.
    headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Parse an HTTP response head from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::MissingHeaders`] when the head is not a
    /// parseable status line followed by headers.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(data).map_err(|_| HandshakeError::MissingHeaders)?;

        let mut lines = text.lines();
        let status_line = lines.next().ok_or(HandshakeError::MissingHeaders)?;

        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next().ok_or(HandshakeError::MissingHeaders)?;
        let status: u16 = parts
            .next()
            .ok_or(HandshakeError::MissingHeaders)?
            .parse()
            .map_err(|_| HandshakeError::MissingHeaders)?;
        let reason = parts.next().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}
