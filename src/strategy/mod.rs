//! Transport strategies
//!
//! A strategy is one concrete implementation of the gateway's outbound
//! capability. Strategies form a closed set selected by `PROXY_STRATEGY`
//! (and `FALLBACK_PROXY_STRATEGY` for restricted-network recovery):
//! socket, fetch, socks5, thirdparty, cloudprovider, doh, dot.

mod doh;
mod dot;
mod fetch;
mod handoff;
mod socket;
mod socks5;

#[cfg(test)]
pub(crate) mod testing;

pub use doh::DohStrategy;
pub use dot::DotStrategy;
pub use fetch::FetchStrategy;
pub use handoff::HandoffStrategy;
pub use socket::SocketStrategy;
pub use socks5::Socks5Strategy;

use async_trait::async_trait;
use url::Url;

use crate::common::{Error, Request, Response, Result};

/// Largest DNS query body accepted over DoH/DoT.
pub(crate) const MAX_DNS_QUERY_BYTES: usize = 64 * 1024;

/// Unified outbound capability.
///
/// `connect` performs one upstream exchange for a forwarded request;
/// `handle_dns_query` serves an RFC 8484 query. Only the DNS strategies
/// override the latter.
#[async_trait]
pub trait OutboundStrategy: Send + Sync {
    /// Forward the request to the destination URL and return the upstream
    /// response.
    async fn connect(&self, req: Request, dst: &Url) -> Result<Response>;

    /// Serve a DNS wire-format query carried in the request body.
    async fn handle_dns_query(&self, _req: Request) -> Result<Response> {
        Err(Error::Unsupported(format!(
            "{} strategy cannot serve DNS queries",
            self.name()
        )))
    }

    /// Strategy name as it appears in configuration.
    fn name(&self) -> &'static str;
}

/// Destination authority: host, effective port, and whether TLS applies.
pub(crate) fn dst_authority(dst: &Url) -> Result<(String, u16, bool)> {
    let host = dst
        .host_str()
        .ok_or_else(|| Error::BadRequest(format!("Destination URL has no host: {}", dst)))?
        .to_string();
    let (default_port, tls) = match dst.scheme() {
        "https" | "wss" => (443, true),
        "http" | "ws" => (80, false),
        other => {
            return Err(Error::BadRequest(format!(
                "Unsupported destination scheme: {}",
                other
            )))
        }
    };
    let port = dst.port().unwrap_or(default_port);
    Ok((host, port, tls))
}

/// Path plus query, as written on the request line.
pub(crate) fn dst_target(dst: &Url) -> String {
    match dst.query() {
        Some(query) => format!("{}?{}", dst.path(), query),
        None => dst.path().to_string(),
    }
}

/// Require a POST carrying `application/dns-message`.
pub(crate) fn validate_dns_request(req: &Request) -> Result<()> {
    if req.method != "POST" {
        return Err(Error::BadRequest("DNS queries must use POST".into()));
    }
    let content_type = req.header("content-type").unwrap_or("");
    if !content_type
        .to_ascii_lowercase()
        .starts_with("application/dns-message")
    {
        return Err(Error::BadRequest(
            "DNS queries require content-type application/dns-message".into(),
        ));
    }
    Ok(())
}
