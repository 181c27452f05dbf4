//! Request/Response message model
//!
//! The gateway receives one `Request` per inbound call and produces one
//! `Response`. Bodies are single-read byte streams; `Body::tee` buffers a
//! bounded copy so a fallback attempt can replay the original body.

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Upper bound for buffering a request body in memory when a fallback
/// attempt may need to replay it. Bodies larger than this stay streaming
/// and fallback is disabled for the request.
pub const FALLBACK_BUFFER_LIMIT: usize = 1024 * 1024;

/// Capacity of the in-process WebSocket message channels.
const WEBSOCKET_CHANNEL_CAPACITY: usize = 32;

/// A single-read request or response body.
pub enum Body {
    Empty,
    Full(Bytes),
    Stream(Box<dyn AsyncRead + Unpin + Send>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn full(data: impl Into<Bytes>) -> Self {
        Body::Full(data.into())
    }

    pub fn stream(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Body::Stream(Box::new(reader))
    }

    /// Whether the body is known to carry no bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full(data) => data.is_empty(),
            Body::Stream(_) => false,
        }
    }

    /// Convert into a reader regardless of variant.
    pub fn into_reader(self) -> Box<dyn AsyncRead + Unpin + Send> {
        match self {
            Body::Empty => Box::new(tokio::io::empty()),
            Body::Full(data) => Box::new(Cursor::new(data)),
            Body::Stream(reader) => reader,
        }
    }

    /// Read the whole body into memory, failing if it exceeds `limit`.
    pub async fn into_bytes(self, limit: usize) -> Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(data) => {
                if data.len() > limit {
                    return Err(Error::BadRequest("request body too large".into()));
                }
                Ok(data)
            }
            Body::Stream(mut reader) => {
                let mut buf = BytesMut::new();
                let mut chunk = [0u8; 8 * 1024];
                loop {
                    let n = reader.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    if buf.len() + n > limit {
                        return Err(Error::BadRequest("request body too large".into()));
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Split the body into a primary body and an independent clone for a
    /// possible fallback attempt.
    ///
    /// Streaming bodies are buffered up to `limit` bytes; a body that does
    /// not fit keeps streaming and the clone is `None`, which disables
    /// fallback for the request.
    pub async fn tee(self, limit: usize) -> Result<(Body, Option<Body>)> {
        match self {
            Body::Empty => Ok((Body::Empty, Some(Body::Empty))),
            Body::Full(data) => Ok((Body::Full(data.clone()), Some(Body::Full(data)))),
            Body::Stream(mut reader) => {
                let mut buf = BytesMut::new();
                let mut chunk = [0u8; 8 * 1024];
                loop {
                    let n = reader.read(&mut chunk).await?;
                    if n == 0 {
                        let data = buf.freeze();
                        return Ok((Body::Full(data.clone()), Some(Body::Full(data))));
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.len() > limit {
                        // Too large to replay: stitch the prefix back in
                        // front of the remaining stream and keep going
                        // without a clone.
                        let rest = Cursor::new(buf.freeze()).chain(reader);
                        return Ok((Body::Stream(Box::new(rest)), None));
                    }
                }
            }
        }
    }

    /// Copy the body to a writer chunk-by-chunk.
    pub async fn copy_to<W>(self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self {
            Body::Empty => Ok(0),
            Body::Full(data) => {
                writer.write_all(&data).await?;
                Ok(data.len() as u64)
            }
            Body::Stream(mut reader) => {
                let n = tokio::io::copy(&mut reader, writer).await?;
                Ok(n)
            }
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Full(data) => write!(f, "Body::Full({} bytes)", data.len()),
            Body::Stream(_) => write!(f, "Body::Stream"),
        }
    }
}

/// An inbound request handed to the gateway by the host entry point.
#[derive(Debug)]
pub struct Request {
    /// HTTP method, upper-cased
    pub method: String,
    /// Request target: path plus optional query, as received
    pub uri: String,
    /// Header name/value pairs, names lower-cased
    pub headers: Vec<(String, String)>,
    /// Single-read body stream
    pub body: Body,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            uri: uri.into(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path component of the request target.
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    /// Query string of the request target, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, q)| q)
    }

    /// Whether the inbound request asks for a WebSocket upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }
}

/// The gateway's answer to one inbound request.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    /// Header name/value pairs, names lower-cased
    pub headers: Vec<(String, String)>,
    pub body: Body,
    /// Client half of the in-process WebSocket pair for 101 upgrades
    pub websocket: Option<WebSocketHalf>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
            websocket: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Plain-text response with the given status.
    pub fn text(status: u16, message: impl Into<String>) -> Self {
        Response::new(status)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(Body::full(message.into()))
    }

    /// Error response: status from the error class, `Error: …` body.
    pub fn from_error(err: &Error) -> Self {
        Response::text(err.status(), format!("Error: {}", err))
    }

    /// A 200 carrying a raw DNS message payload.
    pub fn dns_message(payload: impl Into<Bytes>) -> Self {
        Response::new(200)
            .with_header("content-type", "application/dns-message")
            .with_body(Body::Full(payload.into()))
    }

    /// A 101 Switching Protocols response carrying the client half of the
    /// WebSocket pair.
    pub fn switching_protocols(client: WebSocketHalf) -> Self {
        let mut resp = Response::new(101)
            .with_header("connection", "Upgrade")
            .with_header("upgrade", "websocket");
        resp.websocket = Some(client);
        resp
    }

    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One WebSocket message crossing the in-process pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Bytes),
    Close(u16),
}

/// One side of an in-process WebSocket message pair.
///
/// The relay owns one half and the 101 response carries the other; the host
/// entry point bridges its half to the real inbound WebSocket connection.
#[derive(Debug)]
pub struct WebSocketHalf {
    tx: mpsc::Sender<WsMessage>,
    rx: mpsc::Receiver<WsMessage>,
}

impl WebSocketHalf {
    /// Create a cross-connected pair of halves.
    pub fn pair() -> (WebSocketHalf, WebSocketHalf) {
        let (tx_a, rx_a) = mpsc::channel(WEBSOCKET_CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(WEBSOCKET_CHANNEL_CAPACITY);
        (
            WebSocketHalf { tx: tx_a, rx: rx_b },
            WebSocketHalf { tx: tx_b, rx: rx_a },
        )
    }

    /// Send a message to the peer half. Returns false once the peer is gone.
    pub async fn send(&self, msg: WsMessage) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// Receive the next message from the peer half.
    pub async fn recv(&mut self) -> Option<WsMessage> {
        self.rx.recv().await
    }

    /// Split into the raw sender/receiver pair, for callers that need to
    /// drive both directions from separate tasks.
    pub fn into_parts(self) -> (mpsc::Sender<WsMessage>, mpsc::Receiver<WsMessage>) {
        (self.tx, self.rx)
    }
}
