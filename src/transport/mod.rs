//! Transport Layer
//!
//! Responsibilities:
//! - Establish lowest-level upstream connections (TCP, TLS over TCP)
//! - NO protocol parsing, NO content inspection
//!
//! Everything above this layer operates on `Stream` only, which keeps the
//! network edge swappable: tests hand the codec layers `tokio::io::duplex`
//! pipes through a mock dialer.

mod tcp;
mod tls;

pub use tcp::connect_tcp;
pub use tls::TlsClient;

use async_trait::async_trait;

use crate::common::{Address, Result, Stream};

/// Dialer trait for establishing raw upstream connections.
///
/// `tls_server_name` enables TLS and carries the SNI name; `None` yields a
/// plain TCP stream. Half-close is not supported on the returned streams:
/// shutting down the write side tears down the connection.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn connect(&self, addr: &Address, tls_server_name: Option<&str>) -> Result<Stream>;
}

/// The production dialer: TCP with optional rustls client TLS.
pub struct NetDialer {
    tls: TlsClient,
}

impl NetDialer {
    pub fn new() -> Self {
        Self {
            tls: TlsClient::new(),
        }
    }
}

impl Default for NetDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for NetDialer {
    async fn connect(&self, addr: &Address, tls_server_name: Option<&str>) -> Result<Stream> {
        let stream = connect_tcp(addr).await?;
        match tls_server_name {
            Some(name) => self.tls.wrap(stream, name).await,
            None => Ok(stream),
        }
    }
}
