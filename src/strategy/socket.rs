//! Socket strategy: raw TCP / TLS upstream exchange
//!
//! Opens a socket straight to the destination and runs the hand-rolled
//! HTTP/1.1 or WebSocket codec over it. This is the default strategy and
//! the only one whose failures are candidates for restricted-network
//! fallback.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::app::headers::sanitize;
use crate::common::{Address, Error, Request, Response, Result, Stream, WebSocketHalf};
use crate::protocol::{http1, websocket};
use crate::transport::Dialer;

use super::{dst_authority, dst_target, OutboundStrategy};

pub struct SocketStrategy {
    dialer: Arc<dyn Dialer>,
}

impl SocketStrategy {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl OutboundStrategy for SocketStrategy {
    async fn connect(&self, req: Request, dst: &Url) -> Result<Response> {
        if req.is_websocket_upgrade() || matches!(dst.scheme(), "ws" | "wss") {
            if !matches!(dst.scheme(), "ws" | "wss") {
                return Err(Error::BadRequest(
                    "WebSocket upgrade requires a ws:// or wss:// destination".into(),
                ));
            }
            let stream = open_stream(self.dialer.as_ref(), dst).await?;
            websocket_exchange(stream, req, dst).await
        } else {
            let stream = open_stream(self.dialer.as_ref(), dst).await?;
            http_exchange(stream, req, dst).await
        }
    }

    fn name(&self) -> &'static str {
        "socket"
    }
}

/// Dial the destination authority, TLS iff the scheme calls for it.
pub(crate) async fn open_stream(dialer: &dyn Dialer, dst: &Url) -> Result<Stream> {
    let (host, port, tls) = dst_authority(dst)?;
    let addr = Address::domain(host.clone(), port);
    debug!(%addr, tls, "opening upstream socket");
    dialer
        .connect(&addr, if tls { Some(host.as_str()) } else { None })
        .await
}

/// One HTTP/1.1 exchange over an established stream.
///
/// Shared with the SOCKS5 strategy, which hands in a stream that already
/// tunnelled through the proxy.
pub(crate) async fn http_exchange(mut stream: Stream, req: Request, dst: &Url) -> Result<Response> {
    let (host, _, _) = dst_authority(dst)?;

    let mut headers = sanitize(&req.headers);
    headers.push(("Host".to_string(), host));
    headers.push(("accept-encoding".to_string(), "identity".to_string()));

    let target = dst_target(dst);
    http1::write_request(&mut stream, &req.method, &target, &headers, req.body).await?;
    http1::read_response(stream).await
}

/// WebSocket upgrade over an established stream, returning a 101 response
/// that carries the client half of the relay pair.
pub(crate) async fn websocket_exchange(
    mut stream: Stream,
    req: Request,
    dst: &Url,
) -> Result<Response> {
    if !matches!(dst.scheme(), "ws" | "wss") {
        return Err(Error::BadRequest(
            "WebSocket upgrade requires a ws:// or wss:// destination".into(),
        ));
    }

    let (host, _, _) = dst_authority(dst)?;
    let target = dst_target(dst);

    // The handshake supplies its own upgrade headers; forwarding the
    // inbound copies would duplicate them.
    let extra: Vec<(String, String)> = sanitize(&req.headers)
        .into_iter()
        .filter(|(name, _)| {
            !matches!(name.as_str(), "connection" | "upgrade")
                && !name.starts_with("sec-websocket-")
        })
        .collect();

    let leftover = websocket::client_handshake(&mut stream, &host, &target, &extra).await?;

    let (client_half, relay_half) = WebSocketHalf::pair();
    websocket::spawn_relay(stream, leftover, relay_half);
    Ok(Response::switching_protocols(client_half))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Body, WsMessage};
    use crate::strategy::testing::{MockConn, MockDialer};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn http_exchange_sets_host_and_identity_encoding() {
        let (tx, rx) = oneshot::channel();
        let dialer = MockDialer::new(vec![MockConn::Serve {
            response: b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok".to_vec(),
            captured: tx,
        }]);
        let strategy = SocketStrategy::new(Arc::new(dialer));

        let req = Request::new("GET", "/ignored")
            .with_header("accept-encoding", "gzip")
            .with_header("cf-ray", "abc")
            .with_header("x-keep", "yes");
        let dst = Url::parse("http://httpbin.org/get?q=1").unwrap();
        let response = strategy.connect(req, &dst).await.unwrap();

        assert_eq!(response.status, 200);
        let body = response.body.into_bytes(usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"ok");

        let sent = String::from_utf8(rx.await.unwrap()).unwrap();
        assert!(sent.starts_with("GET /get?q=1 HTTP/1.1\r\n"));
        assert!(sent.contains("Host: httpbin.org\r\n"));
        assert!(sent.contains("accept-encoding: identity\r\n"));
        assert!(sent.contains("x-keep: yes\r\n"));
        assert!(!sent.contains("cf-ray"));
        assert!(!sent.contains("gzip"));
    }

    #[tokio::test]
    async fn https_destination_dials_with_tls() {
        let (tx, _rx) = oneshot::channel();
        let dialer = Arc::new(MockDialer::new(vec![MockConn::Serve {
            response: b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n".to_vec(),
            captured: tx,
        }]));
        let strategy = SocketStrategy::new(dialer.clone());

        let dst = Url::parse("https://httpbin.org/status/204").unwrap();
        let response = strategy
            .connect(Request::new("GET", "/"), &dst)
            .await
            .unwrap();
        assert_eq!(response.status, 204);

        let dialed = dialer.dialed.lock().unwrap();
        assert_eq!(dialed[0].0, Address::domain("httpbin.org", 443));
        assert_eq!(dialed[0].1.as_deref(), Some("httpbin.org"));
    }

    #[tokio::test]
    async fn websocket_upgrade_requires_ws_scheme() {
        let dialer = Arc::new(MockDialer::new(vec![]));
        let strategy = SocketStrategy::new(dialer);
        let req = Request::new("GET", "/").with_header("upgrade", "websocket");
        let dst = Url::parse("https://example.com/").unwrap();
        let err = strategy.connect(req, &dst).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn websocket_upgrade_produces_relay_pair() {
        let (tx, rx) = oneshot::channel();
        // 101 handshake, then a text frame "pong" from the upstream
        let mut canned =
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n".to_vec();
        canned.extend_from_slice(
            &websocket::encode_frame(websocket::OPCODE_TEXT, b"pong", false).unwrap(),
        );
        let dialer = Arc::new(MockDialer::new(vec![MockConn::Serve {
            response: canned,
            captured: tx,
        }]));
        let strategy = SocketStrategy::new(dialer);

        let req = Request::new("GET", "/")
            .with_header("upgrade", "websocket")
            .with_header("connection", "Upgrade")
            .with_header("sec-websocket-key", "client-key");
        let dst = Url::parse("wss://echo.example/chat").unwrap();
        let mut response = strategy.connect(req, &dst).await.unwrap();

        assert_eq!(response.status, 101);
        let mut half = response.websocket.take().expect("websocket half");
        assert_eq!(half.recv().await, Some(WsMessage::Text("pong".into())));

        // A client text message reaches the upstream as a masked frame.
        assert!(half.send(WsMessage::Text("hi".into())).await);
        drop(half);
        let sent = rx.await.unwrap();
        let text = String::from_utf8_lossy(&sent);
        assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(text.contains("Host: echo.example\r\n"));
        // one masked 2-byte text frame after the handshake
        let head_end = text.find("\r\n\r\n").unwrap() + 4;
        let frames = &sent[head_end..];
        assert_eq!(frames[0], 0x81);
        assert_eq!(frames[1], 0x80 | 2);
    }

    #[tokio::test]
    async fn request_body_is_copied_to_upstream() {
        let (tx, rx) = oneshot::channel();
        let dialer = Arc::new(MockDialer::new(vec![MockConn::Serve {
            response: b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n".to_vec(),
            captured: tx,
        }]));
        let strategy = SocketStrategy::new(dialer);

        let req = Request::new("POST", "/")
            .with_header("content-length", "11")
            .with_body(Body::full(&b"hello world"[..]));
        let dst = Url::parse("http://example.com/post").unwrap();
        strategy.connect(req, &dst).await.unwrap();

        let sent = String::from_utf8(rx.await.unwrap()).unwrap();
        assert!(sent.ends_with("\r\n\r\nhello world"));
    }
}
