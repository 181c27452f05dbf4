//! URL path grammar
//!
//! The inbound path encodes the shared token and the destination:
//!
//! ```text
//! /{token}/dns/{doh|dot}[/{server}]     → DNS proxy
//! /{token}/{scheme}[:]/{host}[/…]?…     → transport proxy
//! ```
//!
//! A mismatched or missing token forwards to the configured default
//! destination instead of rejecting the request.

use url::Url;

use crate::common::{Error, Request, Result};
use crate::config::Settings;

/// DNS transport named by the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsTransport {
    Doh,
    Dot,
}

/// Where the request goes after path resolution.
#[derive(Debug)]
pub enum Route {
    /// RFC 8484 DNS query; `server` optionally overrides the configured
    /// resolver hostname for this query.
    Dns {
        transport: DnsTransport,
        server: Option<String>,
    },
    /// Forward the request to the decoded destination URL.
    Forward { dst: Url },
}

/// Resolve a request path against the configured token.
pub fn resolve(req: &Request, settings: &Settings) -> Result<Route> {
    let segments: Vec<&str> = req.path().split('/').filter(|s| !s.is_empty()).collect();

    let token_ok = !settings.auth_token.is_empty()
        && segments.first() == Some(&settings.auth_token.as_str());
    if !token_ok {
        return default_route(settings);
    }

    if segments.get(1) == Some(&"dns") {
        if let Some(transport) = match segments.get(2) {
            Some(&"doh") => Some(DnsTransport::Doh),
            Some(&"dot") => Some(DnsTransport::Dot),
            _ => None,
        } {
            return Ok(Route::Dns {
                transport,
                server: segments.get(3).map(|s| s.to_string()),
            });
        }
    }

    let (Some(scheme), Some(host)) = (segments.get(1), segments.get(2)) else {
        return default_route(settings);
    };
    let scheme = scheme.trim_end_matches(':');

    let mut dst = format!("{}://{}/{}", scheme, host, segments[3..].join("/"));
    if let Some(query) = req.query() {
        dst.push('?');
        dst.push_str(query);
    }

    let dst = Url::parse(&dst)
        .map_err(|_| Error::BadRequest(format!("Invalid destination URL: {}", dst)))?;
    Ok(Route::Forward { dst })
}

fn default_route(settings: &Settings) -> Result<Route> {
    let dst = Url::parse(&settings.default_dst_url).map_err(|_| {
        Error::Config(format!(
            "Invalid DEFAULT_DST_URL: {}",
            settings.default_dst_url
        ))
    })?;
    Ok(Route::Forward { dst })
}
