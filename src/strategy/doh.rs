//! DoH strategy
//!
//! Serves RFC 8484 queries by speaking HTTP/1.1 over a raw TLS socket to
//! the configured DoH server. Any failure on the raw path falls back to
//! the high-level fetch client; a double failure is a gateway error.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::warn;
use url::Url;

use crate::common::{Address, Body, Error, Request, Response, Result};
use crate::protocol::http1;
use crate::transport::Dialer;

use super::fetch::from_client_response;
use super::{validate_dns_request, OutboundStrategy, MAX_DNS_QUERY_BYTES};

pub struct DohStrategy {
    dialer: Arc<dyn Dialer>,
    client: reqwest::Client,
    hostname: String,
    port: u16,
    path: String,
}

impl DohStrategy {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        client: reqwest::Client,
        hostname: String,
        port: u16,
        path: String,
    ) -> Self {
        Self {
            dialer,
            client,
            hostname,
            port,
            path,
        }
    }

    /// POST the query over a raw TLS socket and slice the body bytes out
    /// of the buffered response.
    async fn raw_exchange(&self, query: &Bytes) -> Result<Bytes> {
        let addr = Address::domain(self.hostname.clone(), self.port);
        let mut stream = self.dialer.connect(&addr, Some(&self.hostname)).await?;

        let headers = vec![
            ("Host".to_string(), self.hostname.clone()),
            ("content-type".to_string(), "application/dns-message".to_string()),
            ("accept".to_string(), "application/dns-message".to_string()),
            ("content-length".to_string(), query.len().to_string()),
            ("connection".to_string(), "close".to_string()),
        ];
        http1::write_request(
            &mut stream,
            "POST",
            &self.path,
            &headers,
            Body::Full(query.clone()),
        )
        .await?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;

        let separator = http1::find(&raw, b"\r\n\r\n")
            .ok_or_else(|| Error::Protocol("Malformed DoH response".into()))?;
        Ok(Bytes::copy_from_slice(&raw[separator + 4..]))
    }
}

#[async_trait]
impl OutboundStrategy for DohStrategy {
    /// Every request dispatched to the DoH strategy is treated as a DNS
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
                warn!("DoH raw exchange failed: {}; falling back to fetch", e);
                doh_fetch(&self.client, &self.hostname, &self.path, query)
                    .await
                    .map_err(|e| Error::Gateway(format!("DNS query failed: {}", e)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "doh"
    }
}

/// DoH over the high-level fetch client. Also the fallback path for the
/// raw DoH and DoT exchanges.
pub(crate) async fn doh_fetch(
    client: &reqwest::Client,
    hostname: &str,
    path: &str,
    query: Bytes,
) -> Result<Response> {
    let url = format!("https://{}{}", hostname, path);
    let response = client
        .post(&url)
        .header("content-type", "application/dns-message")
        .header("accept", "application/dns-message")
        .body(query)
        .send()
        .await
        .map_err(|e| Error::Upstream(format!("DoH fetch failed: {}", e)))?;
    Ok(from_client_response(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{MockConn, MockDialer};
    use tokio::sync::oneshot;

    fn dns_request(payload: &'static [u8]) -> Request {
        Request::new("POST", "/TOK/dns/doh")
            .with_header("content-type", "application/dns-message")
            .with_body(Body::full(payload))
    }

    fn strategy(dialer: MockDialer) -> DohStrategy {
        DohStrategy::new(
            Arc::new(dialer),
            reqwest::Client::new(),
            "dns.google".to_string(),
            443,
            "/dns-query".to_string(),
        )
    }

    #[tokio::test]
    async fn raw_exchange_returns_bytes_after_header_separator() {
        let (tx, rx) = oneshot::channel();
        let dialer = MockDialer::new(vec![MockConn::Serve {
            response: b"HTTP/1.1 200 OK\r\ncontent-type: application/dns-message\r\ncontent-length: 8\r\n\r\nDNSREPLY".to_vec(),
            captured: tx,
        }]);
        let strategy = strategy(dialer);

        let response = strategy
            .handle_dns_query(dns_request(b"\x00\x01query"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.header("content-type"),
            Some("application/dns-message")
        );
        let body = response.body.into_bytes(usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"DNSREPLY");

        let sent = rx.await.unwrap();
        let text = String::from_utf8_lossy(&sent);
        assert!(text.starts_with("POST /dns-query HTTP/1.1\r\n"));
        assert!(text.contains("Host: dns.google\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n\x00\x01query"));
    }

    #[tokio::test]
    async fn non_post_is_a_client_error() {
        let strategy = strategy(MockDialer::new(vec![]));
        let req = Request::new("GET", "/TOK/dns/doh")
            .with_header("content-type", "application/dns-message");
        let err = strategy.handle_dns_query(req).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn wrong_content_type_is_a_client_error() {
        let strategy = strategy(MockDialer::new(vec![]));
        let req = Request::new("POST", "/TOK/dns/doh")
            .with_header("content-type", "application/json")
            .with_body(Body::full(&b"{}"[..]));
        let err = strategy.handle_dns_query(req).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
