//! SOCKS5 strategy
//!
//! Tunnels the upstream exchange through a SOCKS5 server. After the
//! CONNECT succeeds the stream is handed to the same HTTP/WebSocket codec
//! the socket strategy uses; `https`/`wss` destinations get TLS layered
//! over the tunnel first.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::common::{Address, Error, Request, Response, Result, Stream};
use crate::protocol::socks5::{self, Socks5Endpoint};
use crate::transport::{Dialer, TlsClient};

use super::socket::{http_exchange, websocket_exchange};
use super::{dst_authority, OutboundStrategy};

pub struct Socks5Strategy {
    dialer: Arc<dyn Dialer>,
    tls: TlsClient,
    endpoint: Option<String>,
}

impl Socks5Strategy {
    pub fn new(dialer: Arc<dyn Dialer>, endpoint: Option<String>) -> Self {
        Self {
            dialer,
            tls: TlsClient::new(),
            endpoint,
        }
    }

    async fn tunnel(&self, dst: &Url) -> Result<(Stream, bool)> {
        let raw = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::BadRequest("SOCKS5_ADDRESS is not configured".into()))?;
        let endpoint = Socks5Endpoint::parse(raw)?;

        let (host, port, tls) = dst_authority(dst)?;
        debug!(server = %endpoint.address(), destination = %host, "negotiating socks5 tunnel");

        let mut stream = self.dialer.connect(&endpoint.address(), None).await?;
        socks5::establish(&mut stream, &endpoint, &Address::domain(host, port)).await?;
        Ok((stream, tls))
    }
}

#[async_trait]
impl OutboundStrategy for Socks5Strategy {
    async fn connect(&self, req: Request, dst: &Url) -> Result<Response> {
        let websocket = req.is_websocket_upgrade() || matches!(dst.scheme(), "ws" | "wss");
        if websocket && !matches!(dst.scheme(), "ws" | "wss") {
            return Err(Error::BadRequest(
                "WebSocket upgrade requires a ws:// or wss:// destination".into(),
            ));
        }

        let (mut stream, tls) = self.tunnel(dst).await?;
        if tls {
            let (host, _, _) = dst_authority(dst)?;
            stream = self.tls.wrap(stream, &host).await?;
        }

        if websocket {
            websocket_exchange(stream, req, dst).await
        } else {
            http_exchange(stream, req, dst).await
        }
    }

    fn name(&self) -> &'static str {
        "socks5"
    }
}
