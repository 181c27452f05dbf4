//! HTTP/1.1 client codec
//!
//! Serializes requests onto a byte stream and parses responses off it.
//! The response body is never buffered whole: a producer task decodes the
//! transfer encoding and forwards payload bytes as they arrive.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::common::{Body, ChannelReader, Error, Response, Result, Stream};

/// Cap on the response header section.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Channel depth between the body producer task and the body reader.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferMode {
    Chunked,
    Fixed(u64),
    UntilEof,
}

/// Serialize a request head plus body onto the stream.
///
/// `target` is the path plus optional query; headers are folded as
/// `name: value` lines in order.
pub async fn write_request<W>(
    writer: &mut W,
    method: &str,
    target: &str,
    headers: &[(String, String)],
    body: Body,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(method.as_bytes());
    head.extend_from_slice(b" ");
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers {
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");

    writer.write_all(&head).await?;
    body.copy_to(writer).await?;
    writer.flush().await?;
    Ok(())
}

/// Read bytes until the buffer contains the `CRLF CRLF` header terminator.
///
/// Returns the header block (without the terminator) and any body bytes
/// that arrived with it.
pub async fn read_header_block<R>(reader: &mut R) -> Result<(Bytes, BytesMut)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(4 * 1024);
    loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            let mut head = buf.split_to(pos + 4);
            head.truncate(pos);
            return Ok((head.freeze(), buf));
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(Error::Protocol("Response header section too large".into()));
        }
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::Protocol(
                "Connection closed before response headers".into(),
            ));
        }
    }
}

/// Parse a response off the stream and return it with a streaming body.
///
/// Takes ownership of the stream; a spawned producer drains it into the
/// response body channel according to the transfer mode.
pub async fn read_response(mut stream: Stream) -> Result<Response> {
    let (head, leftover) = read_header_block(&mut stream).await?;

    let text = std::str::from_utf8(&head)
        .map_err(|_| Error::Protocol("Invalid status line".into()))?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let status = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let mode = transfer_mode(&headers)?;
    debug!(status, ?mode, "parsed response head");

    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let result = match mode {
            TransferMode::Chunked => drain_chunked(&mut stream, leftover, &tx).await,
            TransferMode::Fixed(total) => drain_fixed(&mut stream, leftover, total, &tx).await,
            TransferMode::UntilEof => drain_until_eof(&mut stream, leftover, &tx).await,
        };
        if let Err(e) = result {
            let _ = tx.send(Err(e)).await;
        }
    });

    let mut response = Response::new(status).with_body(Body::stream(ChannelReader::new(rx)));
    response.headers = headers;
    Ok(response)
}

/// Parse `HTTP/1.x <code> <reason>`.
fn parse_status_line(line: &str) -> Result<u16> {
    let rest = line
        .strip_prefix("HTTP/1.")
        .and_then(|r| r.strip_prefix('1').or_else(|| r.strip_prefix('0')))
        .and_then(|r| r.strip_prefix(' '))
        .ok_or_else(|| Error::Protocol("Invalid status line".into()))?;
    let code = rest.split(' ').next().unwrap_or("");
    if code.len() != 3 {
        return Err(Error::Protocol("Invalid status line".into()));
    }
    code.parse()
        .map_err(|_| Error::Protocol("Invalid status line".into()))
}

fn transfer_mode(headers: &[(String, String)]) -> Result<TransferMode> {
    for (name, value) in headers {
        if name == "transfer-encoding" && value.to_ascii_lowercase().contains("chunked") {
            return Ok(TransferMode::Chunked);
        }
    }
    for (name, value) in headers {
        if name == "content-length" {
            let total = value
                .trim()
                .parse()
                .map_err(|_| Error::Protocol(format!("Invalid content-length: {}", value)))?;
            return Ok(TransferMode::Fixed(total));
        }
    }
    Ok(TransferMode::UntilEof)
}

async fn drain_chunked<R>(
    reader: &mut R,
    mut buf: BytesMut,
    tx: &mpsc::Sender<std::io::Result<Bytes>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        // Size line
        let line_end = loop {
            if let Some(pos) = find(&buf, b"\r\n") {
                break pos;
            }
            read_more(reader, &mut buf).await?;
        };
        let size = parse_chunk_size(&buf[..line_end])?;
        buf.advance(line_end + 2);

        if size == 0 {
            return Ok(());
        }

        // Payload
        let mut remaining = size;
        while remaining > 0 {
            if buf.is_empty() {
                read_more(reader, &mut buf).await?;
            }
            let take = buf.len().min(remaining);
            if tx.send(Ok(buf.split_to(take).freeze())).await.is_err() {
                return Ok(());
            }
            remaining -= take;
        }

        // Trailing CRLF
        while buf.len() < 2 {
            read_more(reader, &mut buf).await?;
        }
        buf.advance(2);
    }
}

fn parse_chunk_size(line: &[u8]) -> std::io::Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| invalid_data("invalid chunk size line"))?;
    let size_text = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_text, 16).map_err(|_| invalid_data("invalid chunk size"))
}

async fn drain_fixed<R>(
    reader: &mut R,
    mut buf: BytesMut,
    total: u64,
    tx: &mpsc::Sender<std::io::Result<Bytes>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut remaining = total;
    while remaining > 0 {
        if buf.is_empty() {
            read_more(reader, &mut buf).await?;
        }
        let take = (buf.len() as u64).min(remaining) as usize;
        if tx.send(Ok(buf.split_to(take).freeze())).await.is_err() {
            return Ok(());
        }
        remaining -= take as u64;
    }
    Ok(())
}

async fn drain_until_eof<R>(
    reader: &mut R,
    mut buf: BytesMut,
    tx: &mpsc::Sender<std::io::Result<Bytes>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if !buf.is_empty() && tx.send(Ok(buf.split().freeze())).await.is_err() {
        return Ok(());
    }
    loop {
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if tx.send(Ok(buf.split().freeze())).await.is_err() {
            return Ok(());
        }
    }
}

async fn read_more<R>(reader: &mut R, buf: &mut BytesMut) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let n = reader.read_buf(buf).await?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "unexpected EOF in response body",
        ));
    }
    Ok(())
}

fn invalid_data(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// First index of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IntoStream;
    use tokio::io::duplex;

    async fn respond_with(raw: &'static [u8]) -> Response {
        let (client, mut server) = duplex(64 * 1024);
        tokio::spawn(async move {
            server.write_all(raw).await.unwrap();
        });
        read_response(client.into_stream()).await.unwrap()
    }

    #[tokio::test]
    async fn fixed_length_body_is_streamed_exactly() {
        let response = respond_with(
            b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\n\r\n0123456789abcdefg",
        )
        .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-length"), Some("17"));
        let body = response.body.into_bytes(usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"0123456789abcdefg");
    }

    #[tokio::test]
    async fn chunked_body_reassembles_payloads() {
        let response = respond_with(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await;
        let body = response.body.into_bytes(usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn chunk_extensions_are_ignored() {
        let response = respond_with(
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n0\r\n\r\n",
        )
        .await;
        let body = response.body.into_bytes(usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn eof_mid_chunk_is_fatal() {
        let (client, mut server) = duplex(4096);
        tokio::spawn(async move {
            server
                .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\nA\r\nhel")
                .await
                .unwrap();
            // connection drops before the chunk completes
        });
        let response = read_response(client.into_stream()).await.unwrap();
        assert!(response.body.into_bytes(usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn body_without_framing_runs_to_eof() {
        let response = respond_with(b"HTTP/1.1 200 OK\r\n\r\nstreamed until close").await;
        let body = response.body.into_bytes(usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"streamed until close");
    }

    #[tokio::test]
    async fn garbage_status_line_is_rejected() {
        let (client, mut server) = duplex(4096);
        tokio::spawn(async move {
            server.write_all(b"ICY 200 OK\r\n\r\n").await.unwrap();
        });
        let err = read_response(client.into_stream()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid status line"));
    }

    #[tokio::test]
    async fn request_serialization_shape() {
        let (mut client, mut server) = duplex(4096);
        let headers = vec![
            ("host".to_string(), "example.com".to_string()),
            ("accept-encoding".to_string(), "identity".to_string()),
        ];
        write_request(
            &mut client,
            "POST",
            "/get?x=1",
            &headers,
            Body::full(&b"payload"[..]),
        )
        .await
        .unwrap();
        drop(client);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("POST /get?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("host: example.com\r\n"));
        assert!(text.contains("accept-encoding: identity\r\n"));
        assert!(text.ends_with("\r\n\r\npayload"));
    }

    #[test]
    fn status_line_variants() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.0 404 Not Found").unwrap(), 404);
        assert!(parse_status_line("HTTP/2 200").is_err());
        assert!(parse_status_line("HTTP/1.1 20").is_err());
    }
}
