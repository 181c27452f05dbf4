//! Relay-handoff strategies: thirdparty and cloudprovider
//!
//! Both wrap a downstream relay that receives the destination as a
//! `?target=` query on a configured base URL. The original method,
//! headers, and body are forwarded with redirects left to the caller
//! (`redirect: manual`); the two strategies differ only in which
//! configuration key names the relay.

use async_trait::async_trait;
use url::Url;

use crate::app::headers::sanitize;
use crate::common::{Error, Request, Response, Result};

use super::fetch::forward;
use super::OutboundStrategy;

pub struct HandoffStrategy {
    client: reqwest::Client,
    base_url: String,
    name: &'static str,
}

impl HandoffStrategy {
    /// `client` must be built with redirects disabled.
    pub fn new(client: reqwest::Client, base_url: String, name: &'static str) -> Self {
        Self {
            client,
            base_url,
            name,
        }
    }
}

#[async_trait]
impl OutboundStrategy for HandoffStrategy {
    async fn connect(&self, req: Request, dst: &Url) -> Result<Response> {
        if req.is_websocket_upgrade() || matches!(dst.scheme(), "ws" | "wss") {
            return Err(Error::BadRequest(format!(
                "WebSocket is not supported by the {} strategy",
                self.name
            )));
        }

        let mut url = Url::parse(&self.base_url).map_err(|_| {
            Error::Config(format!("Invalid relay base URL: {}", self.base_url))
        })?;
        url.query_pairs_mut().append_pair("target", dst.as_str());

        let headers = sanitize(&req.headers);
        forward(&self.client, req, url, &headers, self.name).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
