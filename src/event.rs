//! Connection event surface.
//!
//! Callback-mode delivery registers one handler per event kind. Handlers
//! run synchronously from the connection's pump, to completion, before the
//! next frame is dispatched.

use bytes::Bytes;
use std::fmt;

use crate::close::CloseReason;
use crate::frame::Frame;

/// A delivered data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text frame payload, decoded as UTF-8.
    Text(String),
    /// Binary frame payload.
    Binary(Bytes),
}

impl Message {
    /// Returns the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Consumes the message into raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

/// Registered event callbacks.
///
/// Every slot is optional; an unregistered event is dropped silently.
#[derive(Default)]
pub struct EventHandlers {
    pub(crate) open: Option<Box<dyn FnMut()>>,
    pub(crate) frame: Option<Box<dyn FnMut(&Frame)>>,
    pub(crate) message: Option<Box<dyn FnMut(Message)>>,
    pub(crate) ping: Option<Box<dyn FnMut(&Bytes)>>,
    pub(crate) pong: Option<Box<dyn FnMut(&Bytes)>>,
    pub(crate) close: Option<Box<dyn FnMut(&CloseReason)>>,
    pub(crate) failure: Option<Box<dyn FnMut(&str)>>,
}

impl EventHandlers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `open` handler.
    #[must_use]
    pub fn open(mut self, handler: impl FnMut() + 'static) -> Self {
        self.open = Some(Box::new(handler));
        self
    }

    /// Sets the `frame` handler.
    #[must_use]
    pub fn frame(mut self, handler: impl FnMut(&Frame) + 'static) -> Self {
        self.frame = Some(Box::new(handler));
        self
    }

    /// Sets the `message` handler.
    #[must_use]
    pub fn message(mut self, handler: impl FnMut(Message) + 'static) -> Self {
        self.message = Some(Box::new(handler));
        self
    }

    /// Sets the `ping` handler.
    #[must_use]
    pub fn ping(mut self, handler: impl FnMut(&Bytes) + 'static) -> Self {
        self.ping = Some(Box::new(handler));
        self
    }

    /// Sets the `pong` handler.
    #[must_use]
    pub fn pong(mut self, handler: impl FnMut(&Bytes) + 'static) -> Self {
        self.pong = Some(Box::new(handler));
        self
    }

    /// Sets the `close` handler.
    #[must_use]
    pub fn close(mut self, handler: impl FnMut(&CloseReason) + 'static) -> Self {
        self.close = Some(Box::new(handler));
        self
    }

    /// Sets the `failure` handler.
    #[must_use]
    pub fn failure(mut self, handler: impl FnMut(&str) + 'static) -> Self {
        self.failure = Some(Box::new(handler));
        self
    }

    pub(crate) fn emit_open(&mut self) {
        if let Some(handler) = self.open.as_mut() {
            handler();
        }
    }

    pub(crate) fn emit_frame(&mut self, frame: &Frame) {
        if let Some(handler) = self.frame.as_mut() {
            handler(frame);
        }
    }

    pub(crate) fn emit_message(&mut self, message: Message) {
        if let Some(handler) = self.message.as_mut() {
            handler(message);
        }
    }

    pub(crate) fn emit_ping(&mut self, payload: &Bytes) {
        if let Some(handler) = self.ping.as_mut() {
            handler(payload);
        }
    }

    pub(crate) fn emit_pong(&mut self, payload: &Bytes) {
        if let Some(handler) = self.pong.as_mut() {
            handler(payload);
        }
    }

    pub(crate) fn emit_close(&mut self, reason: &CloseReason) {
        if let Some(handler) = self.close.as_mut() {
            handler(reason);
        }
    }

    pub(crate) fn emit_failure(&mut self, reason: &str) {
        if let Some(handler) = self.failure.as_mut() {
            handler(reason);
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("open", &self.open.is_some())
            .field("frame", &self.frame.is_some())
            .field("message", &self.message.is_some())
            .field("ping", &self.ping.is_some())
            .field("pong", &self.pong.is_some())
            .field("close", &self.close.is_some())
            .field("failure", &self.failure.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_conversions() {
        assert_eq!(Message::from("hi"), Message::Text("hi".to_string()));
        assert_eq!(
            Message::from(vec![1u8, 2]),
            Message::Binary(Bytes::from_static(&[1, 2]))
        );
        assert_eq!(Message::from("hi").as_text(), Some("hi"));
        assert_eq!(Message::from(vec![1u8]).as_text(), None);
        assert_eq!(Message::from("hi").into_bytes().as_ref(), b"hi");
    }

    #[test]
    fn unregistered_handlers_are_noops() {
        let mut handlers = EventHandlers::new();
        handlers.emit_open();
        handlers.emit_failure("nothing listening");
    }

    #[test]
    fn registered_handler_receives_payload() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut handlers = EventHandlers::new();
        handlers.message = Some(Box::new(move |m| sink.borrow_mut().push(m)));
        handlers.emit_message(Message::from("one"));
        handlers.emit_message(Message::from("two"));
        assert_eq!(seen.borrow().len(), 2);
    }
}
