#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use bytes::Bytes;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::Once;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use wavesock::{accept_key, Transport, TransportError};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging once per process.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Proptest configuration with an explicit case count.
pub fn test_proptest_config(cases: u32) -> proptest::test_runner::Config {
    proptest::test_runner::Config {
        cases,
        ..proptest::test_runner::Config::default()
    }
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: std::sync::Arc<Self>) {}
}

/// Drives a future to completion.
///
/// Scripted transports resolve every await immediately, so a single poll
/// suffices; a Pending result means the test deadlocked.
pub fn run<F: Future>(fut: F) -> F::Output {
    let waker = Waker::from(std::sync::Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    match pin!(fut).poll(&mut cx) {
        Poll::Ready(value) => value,
        Poll::Pending => panic!("test future stalled"),
    }
}

/// One scripted transport read.
pub enum ReadStep {
    /// Yield a chunk of bytes.
    Chunk(Vec<u8>),
    /// Report end of stream.
    Eof,
    /// Sleep out the caller's limit, then report a timeout.
    Timeout,
    /// Fail with a connection reset.
    Reset,
    /// Answer the recorded upgrade request with a valid 101 response.
    Upgrade,
    /// Answer with a 101 response followed by extra bytes in the same
    /// chunk (early frames).
    UpgradeWithResidual(Vec<u8>),
    /// Answer with a 101 response carrying a fixed accept value.
    UpgradeWithAccept(&'static str),
}

#[derive(Default)]
struct LogInner {
    written: Vec<u8>,
    shutdowns: usize,
}

/// Observation handle onto a [`ScriptedTransport`] after it moved into a
/// connection.
#[derive(Clone, Default)]
pub struct TransportLog(Rc<RefCell<LogInner>>);

impl TransportLog {
    /// Everything the connection wrote, in order.
    pub fn written(&self) -> Vec<u8> {
        self.0.borrow().written.clone()
    }

    /// Number of shutdown calls observed.
    pub fn shutdowns(&self) -> usize {
        self.0.borrow().shutdowns
    }

    /// Masked client frames written after the HTTP request, unmasked and
    /// paired with their opcode.
    pub fn client_frames(&self) -> Vec<(u8, Vec<u8>)> {
        let written = self.written();
        let start = written
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(0, |i| i + 4);
        parse_client_frames(&written[start..])
    }
}

/// Transport double: replays scripted reads, records writes.
#[derive(Default)]
pub struct ScriptedTransport {
    steps: VecDeque<ReadStep>,
    log: TransportLog,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = ReadStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            log: TransportLog::default(),
        }
    }

    /// A handle that stays observable after the transport moves away.
    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }

    /// The Sec-WebSocket-Key the connection sent, from the recorded request.
    fn sent_key(&self) -> String {
        let inner = self.log.0.borrow();
        let text = String::from_utf8_lossy(&inner.written);
        text.lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .expect("no Sec-WebSocket-Key in recorded request")
            .to_string()
    }

    fn upgrade_response(accept: &str, residual: &[u8]) -> Bytes {
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n"
        )
        .into_bytes();
        response.extend_from_slice(residual);
        Bytes::from(response)
    }
}

impl Transport for ScriptedTransport {
    async fn read_chunk(
        &mut self,
        limit: Option<Duration>,
    ) -> Result<Option<Bytes>, TransportError> {
        match self.steps.pop_front() {
            Some(ReadStep::Chunk(data)) => Ok(Some(Bytes::from(data))),
            Some(ReadStep::Eof) | None => Ok(None),
            Some(ReadStep::Timeout) => {
                if let Some(limit) = limit {
                    std::thread::sleep(limit);
                }
                Err(TransportError::TimedOut)
            }
            Some(ReadStep::Reset) => Err(TransportError::Reset),
            Some(ReadStep::Upgrade) => {
                let accept = accept_key(&self.sent_key());
                Ok(Some(Self::upgrade_response(&accept, &[])))
            }
            Some(ReadStep::UpgradeWithResidual(residual)) => {
                let accept = accept_key(&self.sent_key());
                Ok(Some(Self::upgrade_response(&accept, &residual)))
            }
            Some(ReadStep::UpgradeWithAccept(accept)) => {
                Ok(Some(Self::upgrade_response(accept, &[])))
            }
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.log.0.borrow_mut().written.extend_from_slice(data);
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.log.0.borrow_mut().shutdowns += 1;
    }
}

/// An unmasked server frame, as a byte vector.
pub fn server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 125, "helper covers short frames only");
    let mut out = vec![0x80 | opcode, payload.len() as u8];
    out.extend_from_slice(payload);
    out
}

/// A server close frame with a code and reason.
pub fn server_close_frame(code: u16, reason: &[u8]) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason);
    server_frame(0x8, &payload)
}

/// Parses masked client frames from raw bytes, unmasking each payload.
pub fn parse_client_frames(data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut i = 0;
    while i + 2 <= data.len() {
        let opcode = data[i] & 0x0F;
        assert_ne!(data[i + 1] & 0x80, 0, "client frame without mask bit");
        let len7 = (data[i + 1] & 0x7F) as usize;
        let (len, mut j) = match len7 {
            126 => (
                u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize,
                i + 4,
            ),
            127 => (
                u64::from_be_bytes(data[i + 2..i + 10].try_into().unwrap()) as usize,
                i + 10,
            ),
            short => (short, i + 2),
        };
        let key = [data[j], data[j + 1], data[j + 2], data[j + 3]];
        j += 4;
        let mut payload = data[j..j + len].to_vec();
        for (k, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[k % 4];
        }
        frames.push((opcode, payload));
        i = j + len;
    }
    frames
}
