//! Stream abstraction
//!
//! Unified stream type for all layers to operate on.
//! Codec layers ONLY operate on Stream, never on raw TCP/TLS sockets.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// The core byte-stream type used throughout the gateway.
/// Raw TCP and TLS-wrapped TCP both erase to this.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Trait for types that can be converted into a Stream
pub trait IntoStream {
    fn into_stream(self) -> Stream;
}

impl<T> IntoStream for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_stream(self) -> Stream {
        Box::new(self)
    }
}

/// Reader over a channel of decoded body chunks.
///
/// The HTTP response parser runs as a producer task that pushes payload
/// bytes (or a decode error) into the channel; this reader is handed to the
/// caller as the streaming response body.
pub struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    done: bool,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            done: false,
        }
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Drain the buffered chunk first
        if !self.current.is_empty() {
            let to_copy = self.current.len().min(buf.remaining());
            buf.put_slice(&self.current[..to_copy]);
            let _ = self.current.split_to(to_copy);
            return Poll::Ready(Ok(()));
        }

        if self.done {
            return Poll::Ready(Ok(()));
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let to_copy = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..to_copy]);
                if to_copy < chunk.len() {
                    self.current = chunk.slice(to_copy..);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Err(e))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn channel_reader_streams_chunks_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let mut reader = ChannelReader::new(rx);

        tokio::spawn(async move {
            tx.send(Ok(Bytes::from_static(b"hello"))).await.unwrap();
            tx.send(Ok(Bytes::from_static(b" world"))).await.unwrap();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn channel_reader_surfaces_producer_error() {
        let (tx, rx) = mpsc::channel(4);
        let mut reader = ChannelReader::new(rx);

        tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
        tx.send(Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "unexpected EOF in chunked body",
        )))
        .await
        .unwrap();
        drop(tx);

        let mut buf = [0u8; 7];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"partial");
        let err = reader.read_u8().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
