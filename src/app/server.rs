//! Inbound HTTP/1.1 server
//!
//! The accept loop that feeds the gateway. One tokio task per connection,
//! one request per connection (`Connection: close`). WebSocket upgrades
//! are bridged between the inbound socket and the client half of the
//! gateway's relay pair.

use std::io::Cursor;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::common::{
    Body, Error, IntoStream, Request, Response, Result, Stream, WebSocketHalf, WsMessage,
};
use crate::protocol::{http1, websocket};

use super::gateway::Gateway;

/// Accept loop: every connection is handled in its own task.
pub async fn serve(gateway: Arc<Gateway>, listener: TcpListener) -> Result<()> {
    info!("listening on {}", listener.local_addr()?);
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        let gateway = gateway.clone();
        tokio::spawn(async move {
            debug!("connection from {}", peer);
            if let Err(e) = handle_connection(gateway, socket).await {
                debug!("connection from {} closed: {}", peer, e);
            }
        });
    }
}

/// Serve one connection: parse the request, run it through the gateway,
/// write the response (or bridge the upgraded WebSocket).
pub async fn handle_connection<S>(gateway: Arc<Gateway>, socket: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut stream: Stream = socket.into_stream();
    let (head, leftover) = http1::read_header_block(&mut stream).await?;
    let mut req = parse_request_head(&head)?;

    let (read_half, mut write_half) = tokio::io::split(stream);

    if req.is_websocket_upgrade() {
        let key = req.header("sec-websocket-key").map(str::to_string);
        let mut response = gateway.handle(req).await;
        let upgraded = response.websocket.take();
        return match (upgraded, key) {
            (Some(half), Some(key)) if response.status == 101 => {
                let reader = Cursor::new(leftover.freeze()).chain(read_half);
                bridge_websocket(reader, write_half, &key, half).await
            }
            (_, None) => {
                let response = Response::text(400, "Error: missing Sec-WebSocket-Key");
                write_response(&mut write_half, response).await
            }
            _ => write_response(&mut write_half, response).await,
        };
    }

    let content_length: u64 = req
        .header("content-length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    if content_length > 0 {
        let body_reader = Cursor::new(leftover.freeze())
            .chain(read_half)
            .take(content_length);
        req.body = Body::stream(body_reader);
    }

    let response = gateway.handle(req).await;
    write_response(&mut write_half, response).await
}

fn parse_request_head(head: &[u8]) -> Result<Request> {
    let text = std::str::from_utf8(head)
        .map_err(|_| Error::BadRequest("Invalid request head".into()))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::BadRequest(format!(
            "Invalid request line: {}",
            request_line
        )));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(Error::BadRequest(format!(
            "Unsupported protocol version: {}",
            version
        )));
    }

    let mut req = Request::new(method, uri);
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            req.headers
                .push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    Ok(req)
}

/// Write a response head and stream the body out, then close.
async fn write_response<W>(writer: &mut W, response: Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    );
    let mut has_length = false;
    for (name, value) in &response.headers {
        // The body below is written decoded and the connection closed
        // after it, so hop-by-hop framing headers do not apply.
        if matches!(name.as_str(), "connection" | "transfer-encoding") {
            continue;
        }
        if name == "content-length" {
            has_length = true;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !has_length {
        if let Body::Full(data) = &response.body {
            head.push_str(&format!("content-length: {}\r\n", data.len()));
        }
    }
    head.push_str("connection: close\r\n\r\n");

    writer.write_all(head.as_bytes()).await?;
    let _ = response.body.copy_to(writer).await;
    writer.flush().await?;
    let _ = writer.shutdown().await;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        _ => "",
    }
}

/// Complete the inbound upgrade and pump frames between the client socket
/// and the relay pair. Frames towards the client are unmasked, as required
/// of servers; client frames arrive masked and are unmasked by the codec.
async fn bridge_websocket<R, W>(
    mut reader: R,
    mut writer: W,
    key: &str,
    half: WebSocketHalf,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let head = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         upgrade: websocket\r\n\
         connection: Upgrade\r\n\
         sec-websocket-accept: {}\r\n\r\n",
        websocket::accept_key(key)
    );
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await?;

    let (to_relay, mut from_relay) = half.into_parts();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = from_relay.recv().await {
            let frame = match &message {
                WsMessage::Text(text) => {
                    websocket::encode_frame(websocket::OPCODE_TEXT, text.as_bytes(), false)
                }
                WsMessage::Binary(data) => {
                    websocket::encode_frame(websocket::OPCODE_BINARY, data, false)
                }
                WsMessage::Close(code) => {
                    websocket::encode_frame(websocket::OPCODE_CLOSE, &code.to_be_bytes(), false)
                }
            };
            let Ok(frame) = frame else { continue };
            if writer.write_all(&frame).await.is_err() || writer.flush().await.is_err() {
                break;
            }
            if matches!(message, WsMessage::Close(_)) {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut fragments = websocket::FragmentBuffer::new();
    loop {
        let frame = match websocket::read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(_) => break,
        };
        match frame.opcode {
            websocket::OPCODE_CLOSE => {
                let code = if frame.payload.len() >= 2 {
                    u16::from_be_bytes([frame.payload[0], frame.payload[1]])
                } else {
                    1000
                };
                let _ = to_relay.send(WsMessage::Close(code)).await;
                break;
            }
            websocket::OPCODE_TEXT
            | websocket::OPCODE_BINARY
            | websocket::OPCODE_CONTINUATION => {
                let Ok(complete) = fragments.feed(frame) else {
                    break;
                };
                if let Some((opcode, payload)) = complete {
                    let message = if opcode == websocket::OPCODE_TEXT {
                        WsMessage::Text(String::from_utf8_lossy(&payload).into_owned())
                    } else {
                        WsMessage::Binary(payload)
                    };
                    if to_relay.send(message).await.is_err() {
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    drop(to_relay);
    let _ = writer_task.await;
    Ok(())
}
