//! DoT strategy
//!
//! Serves RFC 8484 queries over TLS to a DoT server (RFC 7858): each DNS
//! message is prefixed with a 2-byte big-endian length. Failures fall back
//! to DoH over the fetch client with the identical query bytes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;
use url::Url;

use crate::common::{Address, Error, Request, Response, Result};
use crate::transport::Dialer;

use super::doh::doh_fetch;
use super::{validate_dns_request, OutboundStrategy, MAX_DNS_QUERY_BYTES};

pub struct DotStrategy {
    dialer: Arc<dyn Dialer>,
    client: reqwest::Client,
    hostname: String,
    port: u16,
    doh_hostname: String,
    doh_path: String,
}

impl DotStrategy {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        client: reqwest::Client,
        hostname: String,
        port: u16,
        doh_hostname: String,
        doh_path: String,
    ) -> Self {
        Self {
            dialer,
            client,
            hostname,
            port,
            doh_hostname,
            doh_path,
        }
    }

    async fn raw_exchange(&self, query: &Bytes) -> Result<Bytes> {
        if query.len() > u16::MAX as usize {
            return Err(Error::BadRequest("DNS query too large for DoT".into()));
        }

        let addr = Address::domain(self.hostname.clone(), self.port);
        let mut stream = self.dialer.connect(&addr, Some(&self.hostname)).await?;

        stream
            .write_all(&(query.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(query).await?;
        stream.flush().await?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;

        if raw.len() < 2 {
            return Err(Error::Protocol("Short DoT response".into()));
        }
        let length = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        if raw.len() < 2 + length {
            return Err(Error::Protocol("Truncated DoT response".into()));
        }
        Ok(Bytes::copy_from_slice(&raw[2..2 + length]))
    }
}

#[async_trait]
impl OutboundStrategy for DotStrategy {
    /// Every request dispatched to the DoT strategy is treated as a DNS
    /// query; there is no separate forwarding path.
    async fn connect(&self, req: Request, _dst: &Url) -> Result<Response> {
        self.handle_dns_query(req).await
    }

    async fn handle_dns_query(&self, req: Request) -> Result<Response> {
        validate_dns_request(&req)?;
        let query = req.body.into_bytes(MAX_DNS_QUERY_BYTES).await?;

        match self.raw_exchange(&query).await {
            Ok(payload) => Ok(Response::dns_message(payload)),
            Err(e) => {
                warn!("DoT exchange failed: {}; falling back to DoH fetch", e);
                doh_fetch(&self.client, &self.doh_hostname, &self.doh_path, query)
                    .await
                    .map_err(|e| Error::Gateway(format!("DNS query failed: {}", e)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "dot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Body;
    use crate::strategy::testing::{MockConn, MockDialer};
    use tokio::sync::oneshot;

    fn strategy(dialer: MockDialer) -> DotStrategy {
        DotStrategy::new(
            Arc::new(dialer),
            reqwest::Client::new(),
            "dns.google".to_string(),
            853,
            "dns.google".to_string(),
            "/dns-query".to_string(),
        )
    }

    fn dns_request(payload: &'static [u8]) -> Request {
        Request::new("POST", "/TOK/dns/dot")
            .with_header("content-type", "application/dns-message")
            .with_body(Body::full(payload))
    }

    #[tokio::test]
    async fn query_is_length_prefixed_and_reply_unframed() {
        let (tx, rx) = oneshot::channel();
        // 6-byte answer, then trailing bytes that must be ignored
        let mut canned = vec![0x00, 0x06];
        canned.extend_from_slice(b"ANSWER");
        canned.extend_from_slice(b"junk");
        let dialer = MockDialer::new(vec![MockConn::Serve {
            response: canned,
            captured: tx,
        }]);
        let strategy = strategy(dialer);

        let response = strategy
            .handle_dns_query(dns_request(b"\x12\x34query"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.header("content-type"),
            Some("application/dns-message")
        );
        let body = response.body.into_bytes(usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"ANSWER");

        let sent = rx.await.unwrap();
        assert_eq!(&sent[..2], &[0x00, 0x07]);
        assert_eq!(&sent[2..], b"\x12\x34query");
    }

    #[tokio::test]
    async fn dials_the_dot_port_with_tls() {
        let (tx, _rx) = oneshot::channel();
        let dialer = Arc::new(MockDialer::new(vec![MockConn::Serve {
            response: vec![0x00, 0x01, 0x00],
            captured: tx,
        }]));
        let strategy = DotStrategy::new(
            dialer.clone(),
            reqwest::Client::new(),
            "dns.quad9.net".to_string(),
            853,
            "dns.google".to_string(),
            "/dns-query".to_string(),
        );

        strategy
            .handle_dns_query(dns_request(b"q"))
            .await
            .unwrap();

        let dialed = dialer.dialed.lock().unwrap();
        assert_eq!(dialed[0].0, Address::domain("dns.quad9.net", 853));
        assert_eq!(dialed[0].1.as_deref(), Some("dns.quad9.net"));
    }

    #[tokio::test]
    async fn wrong_method_is_a_client_error() {
        let strategy = strategy(MockDialer::new(vec![]));
        let req = Request::new("PUT", "/TOK/dns/dot")
            .with_header("content-type", "application/dns-message");
        let err = strategy.handle_dns_query(req).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
