//! Fetch strategy
//!
//! Delegates the upstream exchange to the runtime's high-level HTTP
//! client. HTTP only; WebSocket upgrades are rejected. This is the default
//! fallback for restricted-network failures of the socket strategy.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use url::Url;

use crate::app::headers::sanitize;
use crate::common::{Body, Error, Request, Response, Result};

use super::OutboundStrategy;

pub struct FetchStrategy {
    client: reqwest::Client,
}

impl FetchStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OutboundStrategy for FetchStrategy {
    async fn connect(&self, req: Request, dst: &Url) -> Result<Response> {
        if req.is_websocket_upgrade() || matches!(dst.scheme(), "ws" | "wss") {
            return Err(Error::BadRequest(
                "WebSocket is not supported by the fetch strategy".into(),
            ));
        }

        let headers = sanitize(&req.headers);
        forward(&self.client, req, dst.clone(), &headers, "fetch").await
    }

    fn name(&self) -> &'static str {
        "fetch"
    }
}

/// Issue the request through the high-level client and map the response
/// back verbatim. Shared by the fetch and relay-handoff strategies.
pub(crate) async fn forward(
    client: &reqwest::Client,
    req: Request,
    url: Url,
    headers: &[(String, String)],
    label: &str,
) -> Result<Response> {
    let method = reqwest::Method::from_bytes(req.method.as_bytes())
        .map_err(|_| Error::BadRequest(format!("Invalid method: {}", req.method)))?;

    let mut builder = client.request(method, url);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = to_client_body(req.body) {
        builder = builder.body(body);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| Error::Upstream(format!("{} request failed: {}", label, e)))?;
    Ok(from_client_response(response))
}

fn to_client_body(body: Body) -> Option<reqwest::Body> {
    match body {
        Body::Empty => None,
        Body::Full(data) => Some(reqwest::Body::from(data)),
        Body::Stream(reader) => Some(reqwest::Body::wrap_stream(ReaderStream::new(reader))),
    }
}

/// Map a high-level client response into the gateway response model,
/// streaming the body through untouched.
pub(crate) fn from_client_response(response: reqwest::Response) -> Response {
    let status = response.status().as_u16();
    let mut headers = Vec::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.push((name.as_str().to_string(), value.to_string()));
        }
    }

    let stream = Box::pin(
        response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    );
    let mut out = Response::new(status).with_body(Body::stream(StreamReader::new(stream)));
    out.headers = headers;
    out
}
