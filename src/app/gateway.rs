//! Gateway - dispatch & fallback controller
//!
//! The gateway is the heart of the forwarding engine. It resolves the
//! inbound path to a route, instantiates the configured strategy, and
//! recovers from restricted-network failures of the socket strategy by
//! re-issuing the request through the fallback strategy with a preserved
//! body clone.
//!
//! ```text
//! Request → route::resolve() → strategy.connect() ──ok──→ Response
//!                                   │
//!                      restricted-network error
//!                                   │
//!                      fallback.connect(clone) ─────────→ Response
//! ```

use std::mem;
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::common::{Body, Error, Request, Response, Result, FALLBACK_BUFFER_LIMIT};
use crate::config::{Settings, StrategyKind};
use crate::strategy::{
    DohStrategy, DotStrategy, FetchStrategy, HandoffStrategy, OutboundStrategy, SocketStrategy,
    Socks5Strategy,
};
use crate::transport::{Dialer, NetDialer};

use super::route::{self, DnsTransport, Route};

pub struct Gateway {
    settings: Settings,
    dialer: Arc<dyn Dialer>,
    fetch_client: reqwest::Client,
    handoff_client: reqwest::Client,
}

impl Gateway {
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_dialer(settings, Arc::new(NetDialer::new()))
    }

    /// Build a gateway over a caller-supplied dialer. The network edge is
    /// the only seam the strategies need, so this is how tests run the
    /// whole dispatch path against in-memory pipes.
    pub fn with_dialer(settings: Settings, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let fetch_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        let handoff_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            settings,
            dialer,
            fetch_client,
            handoff_client,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Handle one inbound request. Never fails: residual errors surface
    /// as status responses with an `Error: …` body.
    pub async fn handle(&self, req: Request) -> Response {
        let method = req.method.clone();
        let uri = req.uri.clone();
        match self.dispatch(req).await {
            Ok(response) => {
                debug!(%method, %uri, status = response.status, "request complete");
                response
            }
            Err(e) => {
                warn!(%method, %uri, "request failed: {}", e);
                Response::from_error(&e)
            }
        }
    }

    async fn dispatch(&self, req: Request) -> Result<Response> {
        match route::resolve(&req, &self.settings)? {
            Route::Dns { transport, server } => {
                let strategy = self.dns_strategy(transport, server);
                strategy.handle_dns_query(req).await
            }
            Route::Forward { dst } => self.forward(req, &dst).await,
        }
    }

    async fn forward(&self, mut req: Request, dst: &Url) -> Result<Response> {
        let kind = self.settings.proxy_strategy;
        let strategy = self.build_strategy(kind)?;

        // Only the socket strategy can hit the restricted-egress error
        // class, so it is the only attempt worth preserving the body for.
        if kind != StrategyKind::Socket {
            return strategy.connect(req, dst).await;
        }

        let (body, replay) = mem::replace(&mut req.body, Body::Empty)
            .tee(FALLBACK_BUFFER_LIMIT)
            .await?;
        req.body = body;
        let fallback_req = replay.map(|body| Request {
            method: req.method.clone(),
            uri: req.uri.clone(),
            headers: req.headers.clone(),
            body,
        });

        match strategy.connect(req, dst).await {
            Err(e) if e.is_network_restricted() => {
                let Some(fallback_req) = fallback_req else {
                    return Err(e);
                };
                let fallback_kind = self.settings.fallback_proxy_strategy;
                warn!(
                    "socket strategy hit a restricted network ({}); retrying via {}",
                    e, fallback_kind
                );
                let fallback = self.build_strategy(fallback_kind)?;
                fallback.connect(fallback_req, dst).await
            }
            other => other,
        }
    }

    fn dns_strategy(
        &self,
        transport: DnsTransport,
        server: Option<String>,
    ) -> Box<dyn OutboundStrategy> {
        match transport {
            DnsTransport::Doh => Box::new(DohStrategy::new(
                self.dialer.clone(),
                self.fetch_client.clone(),
                server.unwrap_or_else(|| self.settings.doh_server_hostname.clone()),
                self.settings.doh_server_port,
                self.settings.doh_server_path.clone(),
            )),
            DnsTransport::Dot => Box::new(DotStrategy::new(
                self.dialer.clone(),
                self.fetch_client.clone(),
                server.unwrap_or_else(|| self.settings.dot_server_hostname.clone()),
                self.settings.dot_server_port,
                self.settings.doh_server_hostname.clone(),
                self.settings.doh_server_path.clone(),
            )),
        }
    }

    fn build_strategy(&self, kind: StrategyKind) -> Result<Box<dyn OutboundStrategy>> {
        let strategy: Box<dyn OutboundStrategy> = match kind {
            StrategyKind::Socket => Box::new(SocketStrategy::new(self.dialer.clone())),
            StrategyKind::Fetch => Box::new(FetchStrategy::new(self.fetch_client.clone())),
            StrategyKind::Socks5 => Box::new(Socks5Strategy::new(
                self.dialer.clone(),
                self.settings.socks5_address.clone(),
            )),
            StrategyKind::ThirdParty => {
                let base = self.settings.third_party_proxy_url.clone().ok_or_else(|| {
                    Error::Config("THIRD_PARTY_PROXY_URL is not configured".into())
                })?;
                Box::new(HandoffStrategy::new(
                    self.handoff_client.clone(),
                    base,
                    "thirdparty",
                ))
            }
            StrategyKind::CloudProvider => {
                let base = self.settings.cloud_provider_url.clone().ok_or_else(|| {
                    Error::Config("CLOUD_PROVIDER_URL is not configured".into())
                })?;
                Box::new(HandoffStrategy::new(
                    self.handoff_client.clone(),
                    base,
                    "cloudprovider",
                ))
            }
            StrategyKind::Doh => self.dns_strategy(DnsTransport::Doh, None),
            StrategyKind::Dot => self.dns_strategy(DnsTransport::Dot, None),
        };
        Ok(strategy)
    }
}
