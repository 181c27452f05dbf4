//! WebSocket client codec
//!
//! RFC 6455 handshake and client-side frame (de)multiplexing over a raw
//! byte stream. Outbound frames are always masked with a fresh 4-byte mask
//! drawn from the thread CSPRNG; inbound frames are reassembled across
//! continuation fragments before being surfaced as messages.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::common::{Body, Error, Result, Stream, WebSocketHalf, WsMessage};
use crate::protocol::http1;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// Close code used when the upstream closes the session.
const CLOSE_NORMAL: u16 = 1000;

/// Fixed GUID appended to the key when deriving `Sec-WebSocket-Accept`.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// One parsed frame off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Bytes,
}

/// A fresh base64-encoded 16-byte `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

/// Derive the `Sec-WebSocket-Accept` value for a handshake key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Perform the client side of the upgrade handshake.
///
/// Returns any bytes that arrived after the `CRLF CRLF` terminator; those
/// are the first frame bytes and must be fed to the frame reader.
pub async fn client_handshake(
    stream: &mut Stream,
    host: &str,
    target: &str,
    extra_headers: &[(String, String)],
) -> Result<BytesMut> {
    let key = generate_key();
    let mut headers: Vec<(String, String)> = vec![
        ("Host".into(), host.to_string()),
        ("Connection".into(), "Upgrade".into()),
        ("Upgrade".into(), "websocket".into()),
        ("Sec-WebSocket-Version".into(), "13".into()),
        ("Sec-WebSocket-Key".into(), key),
    ];
    headers.extend_from_slice(extra_headers);

    http1::write_request(stream, "GET", target, &headers, Body::Empty).await?;

    let (head, leftover) = http1::read_header_block(stream).await?;
    let text = String::from_utf8_lossy(&head);
    let status_line = text.split("\r\n").next().unwrap_or("");
    if !(status_line.contains("101") && status_line.contains("Switching Protocols")) {
        return Err(Error::Protocol(format!(
            "WebSocket handshake failed: {}",
            status_line
        )));
    }
    Ok(leftover)
}

/// Pack one outbound frame. FIN is always set.
///
/// When `masked`, a fresh 4-byte mask is drawn and the payload XORed.
/// Payloads that need the 64-bit length form are rejected.
pub fn encode_frame(opcode: u8, payload: &[u8], masked: bool) -> Result<Bytes> {
    let mask_flag = if masked { MASK_BIT } else { 0 };
    let mut frame = BytesMut::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&[FIN_BIT | (opcode & 0x0F)]);

    if payload.len() < 126 {
        frame.extend_from_slice(&[mask_flag | payload.len() as u8]);
    } else if payload.len() < 65536 {
        frame.extend_from_slice(&[mask_flag | 126]);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        return Err(Error::Protocol("Payload too large".into()));
    }

    if masked {
        let mut mask = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut mask);
        frame.extend_from_slice(&mask);
        let start = frame.len();
        frame.extend_from_slice(payload);
        for (i, byte) in frame[start..].iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    } else {
        frame.extend_from_slice(payload);
    }

    Ok(frame.freeze())
}

/// Read and unmask one frame off the wire.
///
/// The 64-bit length form (len7 = 127) is a fatal session error. Servers
/// should not mask, but masked frames are accepted and unmasked.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = header[0] & FIN_BIT != 0;
    let opcode = header[0] & 0x0F;
    let masked = header[1] & MASK_BIT != 0;
    let len7 = header[1] & 0x7F;

    let length = match len7 {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as usize
        }
        127 => return Err(Error::Protocol("Unsupported frame length".into())),
        n => n as usize,
    };

    let mask = if masked {
        let mut mask = [0u8; 4];
        reader.read_exact(&mut mask).await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Frame {
        fin,
        opcode,
        payload: payload.into(),
    })
}

/// Reassembly context for fragmented messages.
#[derive(Default)]
pub struct FragmentBuffer {
    opcode: Option<u8>,
    payload: BytesMut,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one data frame; returns the completed `(opcode, payload)`
    /// message once FIN arrives.
    pub fn feed(&mut self, frame: Frame) -> Result<Option<(u8, Bytes)>> {
        if frame.opcode == OPCODE_CONTINUATION {
            let opcode = self.opcode.ok_or_else(|| {
                Error::Protocol("Continuation frame without a message in progress".into())
            })?;
            self.payload.extend_from_slice(&frame.payload);
            if frame.fin {
                self.opcode = None;
                return Ok(Some((opcode, std::mem::take(&mut self.payload).freeze())));
            }
            return Ok(None);
        }

        if frame.fin {
            // A complete fresh-opcode frame discards any stale context.
            self.opcode = None;
            self.payload.clear();
            return Ok(Some((frame.opcode, frame.payload)));
        }

        self.opcode = Some(frame.opcode);
        self.payload = BytesMut::from(&frame.payload[..]);
        Ok(None)
    }
}

/// Start the bidirectional frame relay for an upgraded session.
///
/// One task reads upstream frames and surfaces them as messages on the
/// relay half; a second drains client messages and packs them as masked
/// frames. Either side ending tears the session down.
pub fn spawn_relay(stream: Stream, leftover: BytesMut, half: WebSocketHalf) {
    let (read_half, write_half) = tokio::io::split(stream);
    let (to_client, from_client) = half.into_parts();
    let reader = Cursor::new(leftover.freeze()).chain(read_half);

    tokio::spawn(pump_upstream(reader, to_client));
    tokio::spawn(pump_client(from_client, write_half));
}

async fn pump_upstream<R>(mut reader: R, to_client: tokio::sync::mpsc::Sender<WsMessage>)
where
    R: AsyncRead + Unpin + Send,
{
    let mut fragments = FragmentBuffer::new();
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("websocket reader closed: {}", e);
                return;
            }
        };

        match frame.opcode {
            OPCODE_CLOSE => {
                let _ = to_client.send(WsMessage::Close(CLOSE_NORMAL)).await;
                return;
            }
            OPCODE_TEXT | OPCODE_BINARY | OPCODE_CONTINUATION => {
                let complete = match fragments.feed(frame) {
                    Ok(complete) => complete,
                    Err(e) => {
                        debug!("websocket framing error: {}", e);
                        return;
                    }
                };
                if let Some((opcode, payload)) = complete {
                    let message = if opcode == OPCODE_TEXT {
                        WsMessage::Text(String::from_utf8_lossy(&payload).into_owned())
                    } else {
                        WsMessage::Binary(payload)
                    };
                    if to_client.send(message).await.is_err() {
                        return;
                    }
                }
            }
            other => {
                debug!("ignoring frame with opcode {}", other);
            }
        }
    }
}

async fn pump_client<W>(
    mut from_client: tokio::sync::mpsc::Receiver<WsMessage>,
    mut writer: W,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let Some(message) = from_client.recv().await else {
            break;
        };
        let frame = match &message {
            WsMessage::Text(text) => encode_frame(OPCODE_TEXT, text.as_bytes(), true),
            WsMessage::Binary(data) => encode_frame(OPCODE_BINARY, data, true),
            WsMessage::Close(code) => encode_frame(OPCODE_CLOSE, &code.to_be_bytes(), true),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping unsendable frame: {}", e);
                continue;
            }
        };
        if writer.write_all(&frame).await.is_err() || writer.flush().await.is_err() {
            break;
        }
        if matches!(message, WsMessage::Close(_)) {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IntoStream;
    use tokio::io::duplex;

    #[tokio::test]
    async fn masked_frame_round_trips() {
        let frame = encode_frame(OPCODE_TEXT, b"hi", true).unwrap();
        // header + mask + payload
        assert_eq!(frame.len(), 2 + 4 + 2);
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1] & MASK_BIT, MASK_BIT);
        assert_eq!(frame[1] & 0x7F, 2);
        // the masked payload XORed with the mask restores the input
        let mask = &frame[2..6];
        let unmasked: Vec<u8> = frame[6..]
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect();
        assert_eq!(unmasked, b"hi");

        let mut cursor = Cursor::new(frame.to_vec());
        let parsed = read_frame(&mut cursor).await.unwrap();
        assert!(parsed.fin);
        assert_eq!(parsed.opcode, OPCODE_TEXT);
        assert_eq!(parsed.payload.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn extended_length_uses_16_bit_form() {
        let payload = vec![0xAB; 300];
        let frame = encode_frame(OPCODE_BINARY, &payload, false).unwrap();
        assert_eq!(frame[1] & 0x7F, 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 300);

        let mut cursor = Cursor::new(frame.to_vec());
        let parsed = read_frame(&mut cursor).await.unwrap();
        assert_eq!(parsed.payload.len(), 300);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; 65536];
        let err = encode_frame(OPCODE_BINARY, &payload, true).unwrap_err();
        assert!(err.to_string().contains("Payload too large"));
    }

    #[tokio::test]
    async fn sixty_four_bit_length_is_fatal() {
        let mut cursor = Cursor::new(vec![0x82, 0x7F, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[test]
    fn fragments_reassemble_in_order() {
        let mut fragments = FragmentBuffer::new();
        let feed = |fragments: &mut FragmentBuffer, fin, opcode, data: &[u8]| {
            fragments
                .feed(Frame {
                    fin,
                    opcode,
                    payload: Bytes::copy_from_slice(data),
                })
                .unwrap()
        };

        assert_eq!(feed(&mut fragments, false, OPCODE_TEXT, b"hel"), None);
        assert_eq!(feed(&mut fragments, false, OPCODE_CONTINUATION, b"lo "), None);
        let complete = feed(&mut fragments, true, OPCODE_CONTINUATION, b"world");
        assert_eq!(
            complete,
            Some((OPCODE_TEXT, Bytes::from_static(b"hello world")))
        );
    }

    #[test]
    fn fresh_final_frame_discards_stale_context() {
        let mut fragments = FragmentBuffer::new();
        fragments
            .feed(Frame {
                fin: false,
                opcode: OPCODE_TEXT,
                payload: Bytes::from_static(b"stale"),
            })
            .unwrap();
        let complete = fragments
            .feed(Frame {
                fin: true,
                opcode: OPCODE_BINARY,
                payload: Bytes::from_static(b"fresh"),
            })
            .unwrap();
        assert_eq!(complete, Some((OPCODE_BINARY, Bytes::from_static(b"fresh"))));
        // context is gone: a stray continuation now errors
        assert!(fragments
            .feed(Frame {
                fin: true,
                opcode: OPCODE_CONTINUATION,
                payload: Bytes::new(),
            })
            .is_err());
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        // RFC 6455 §1.3 worked example
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn handshake_accepts_switching_protocols() {
        let (client, server) = duplex(4096);
        let mut client = client.into_stream();

        tokio::spawn(async move {
            let mut server = server.into_stream();
            let (head, _) = http1::read_header_block(&mut server).await.unwrap();
            let text = String::from_utf8_lossy(&head).into_owned();
            assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
            assert!(text.contains("Upgrade: websocket\r\n"));
            assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
            assert!(text.contains("Sec-WebSocket-Key: "));
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n")
                .await
                .unwrap();
        });

        let leftover = client_handshake(&mut client, "echo.example", "/chat", &[])
            .await
            .unwrap();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn handshake_rejects_non_upgrade_response() {
        let (client, server) = duplex(4096);
        let mut client = client.into_stream();

        tokio::spawn(async move {
            let mut server = server.into_stream();
            let _ = http1::read_header_block(&mut server).await;
            server
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
        });

        let err = client_handshake(&mut client, "echo.example", "/", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("handshake failed"));
    }

    #[tokio::test]
    async fn relay_masks_client_messages_and_forwards_upstream_text() {
        let (upstream_side, gateway_side) = duplex(4096);
        let (client_half, relay_half) = WebSocketHalf::pair();
        spawn_relay(gateway_side.into_stream(), BytesMut::new(), relay_half);

        let (mut up_read, mut up_write) = tokio::io::split(upstream_side);

        // client → upstream: a text message arrives masked with length 2
        assert!(client_half.send(WsMessage::Text("hi".into())).await);
        let mut raw = [0u8; 8];
        up_read.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw[0], 0x81);
        assert_eq!(raw[1] & MASK_BIT, MASK_BIT);
        assert_eq!(raw[1] & 0x7F, 2);
        let mask = &raw[2..6];
        assert_eq!([raw[6] ^ mask[0], raw[7] ^ mask[1]], *b"hi");

        // upstream → client: an unmasked text frame becomes a message
        let frame = encode_frame(OPCODE_TEXT, b"pong", false).unwrap();
        up_write.write_all(&frame).await.unwrap();
        let mut client_half = client_half;
        assert_eq!(
            client_half.recv().await,
            Some(WsMessage::Text("pong".into()))
        );

        // upstream close surfaces as Close(1000)
        let close = encode_frame(OPCODE_CLOSE, &[0x03, 0xE8], false).unwrap();
        up_write.write_all(&close).await.unwrap();
        assert_eq!(client_half.recv().await, Some(WsMessage::Close(1000)));
    }
}
