//! Close handshake protocol (RFC 6455 Section 7).
//!
//! A close frame carries an optional 2-byte big-endian status code followed
//! by an optional UTF-8 reason. This module owns the send-side code
//! validation, the parse of inbound close payloads, and the default
//! descriptions substituted when a peer closes without giving a reason.

use std::fmt;

use crate::frame::WsError;

/// Normal closure (the default code for a caller-initiated close).
pub const CLOSE_NORMAL: u16 = 1000;
/// Abnormal closure; never sent on the wire, reported locally on abort.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Protocol error, sent in response to a peer violation.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Substituted when a close frame carries no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Validates a close code for sending.
///
/// Sendable codes are `[1000, 5000)` excluding the local-only codes 1004,
/// 1005 and 1006, the range `[1016, 2000)` left undefined by RFC 6455, and
/// `[2000, 3000)` reserved for extensions.
///
/// # Errors
///
/// Returns [`WsError::InvalidCloseCode`] for any code outside the sendable
/// set.
pub fn validate_close_code(code: u16) -> Result<(), WsError> {
    match code {
        1000..=1003 | 1007..=1015 | 3000..=4999 => Ok(()),
        _ => Err(WsError::InvalidCloseCode(code)),
    }
}

/// Default description for a close code, used when the peer sends none.
#[must_use]
pub fn describe(code: u16) -> &'static str {
    match code {
        1000 => "the connection completed a normal closure",
        1001 => "the remote endpoint is going away",
        1002 => "the remote endpoint reported a protocol error",
        1003 => "the remote endpoint cannot accept this data type",
        1005 => "the remote endpoint closed without a status code",
        1006 => "the connection was dropped without a close frame",
        1007 => "a message contained data inconsistent with its type",
        1008 => "a message violated the remote endpoint's policy",
        1009 => "a message was too big to process",
        1010 => "the server did not negotiate a required extension",
        1011 => "the remote endpoint hit an unexpected condition",
        1012 => "the remote service is restarting",
        1013 => "the remote endpoint asked to try again later",
        1014 => "an upstream gateway received an invalid response",
        1015 => "the TLS handshake failed",
        3000..=3999 => "closed with a registered application code",
        4000..=4999 => "closed with a private application code",
        _ => "closed with an unrecognized status code",
    }
}

/// A parsed close frame payload: status code plus reason text.
///
/// Also serves as the payload of the `close` event and the resolution value
/// of a clean close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code; 1005 when the peer sent none.
    pub code: u16,
    /// Reason text as sent; may be empty.
    pub reason: String,
}

impl CloseReason {
    /// Creates a close reason from explicit parts.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parses an inbound close payload.
    ///
    /// Payloads shorter than 2 bytes carry no code; 1005 is substituted and
    /// the reason left empty. Reason bytes decode as UTF-8, lossily.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Self {
        if payload.len() < 2 {
            return Self::new(CLOSE_NO_STATUS, "");
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        Self { code, reason }
    }

    /// The reason text, falling back to the code's default description.
    #[must_use]
    pub fn reason_or_default(&self) -> String {
        if self.reason.is_empty() {
            describe(self.code).to_string()
        } else {
            self.reason.clone()
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sendable_codes_accepted() {
        for code in [
            1000, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 1012, 1013, 1014, 1015,
        ] {
            assert!(validate_close_code(code).is_ok(), "code {code}");
        }
        for code in (3000..5000).step_by(271) {
            assert!(validate_close_code(code).is_ok(), "code {code}");
        }
        assert!(validate_close_code(3000).is_ok());
        assert!(validate_close_code(4999).is_ok());
    }

    #[test]
    fn unsendable_codes_rejected() {
        for code in [0, 1, 999, 1004, 1005, 1006, 5000, 5001, u16::MAX] {
            assert_eq!(
                validate_close_code(code),
                Err(WsError::InvalidCloseCode(code)),
                "code {code}"
            );
        }
        for code in 1016..3000 {
            assert!(validate_close_code(code).is_err(), "code {code}");
        }
    }

    #[test]
    fn parse_empty_payload_substitutes_no_status() {
        let parsed = CloseReason::parse(&[]);
        assert_eq!(parsed.code, CLOSE_NO_STATUS);
        assert!(parsed.reason.is_empty());

        // A lone byte cannot carry a code either.
        assert_eq!(CloseReason::parse(&[0x03]).code, CLOSE_NO_STATUS);
    }

    #[test]
    fn parse_code_and_reason() {
        let mut payload = 1001u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"maintenance window");
        let parsed = CloseReason::parse(&payload);
        assert_eq!(parsed.code, 1001);
        assert_eq!(parsed.reason, "maintenance window");
    }

    #[test]
    fn parse_reason_is_lossy_on_bad_utf8() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xFF, 0xFE]);
        let parsed = CloseReason::parse(&payload);
        assert_eq!(parsed.code, 1000);
        assert!(!parsed.reason.is_empty());
    }

    #[test]
    fn empty_reason_falls_back_to_description() {
        let parsed = CloseReason::parse(&1000u16.to_be_bytes());
        assert_eq!(parsed.reason_or_default(), describe(1000));

        let explicit = CloseReason::new(1000, "bye");
        assert_eq!(explicit.reason_or_default(), "bye");
    }

    #[test]
    fn every_known_code_has_a_description() {
        for code in [1000, 1001, 1002, 1005, 1006, 1011, 1015, 3500, 4500, 2500] {
            assert!(!describe(code).is_empty());
        }
    }
}
