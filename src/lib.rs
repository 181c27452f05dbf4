//! Fluxgate - a multi-strategy HTTP/WebSocket/DNS forwarding gateway
//!
//! # Architecture (Layered)
//!
//! ```text
//! Inbound request (path encodes token + destination)
//! → App (route, sanitize, dispatch & fallback)
//! → Strategy (socket / fetch / socks5 / thirdparty / cloudprovider / doh / dot)
//! → Protocol (HTTP/1.1, WebSocket, SOCKS5 codecs)
//! → Transport (TCP, TLS)
//! ```
//!
//! ## Core Principles
//!
//! - Each layer does ONE thing
//! - Strategies are pluggable behind one trait and selected per request
//! - Codecs operate on `Stream` only, never on concrete sockets
//! - A restricted-network failure of the socket strategy re-issues the
//!   request through the fallback strategy with a preserved body clone
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Address, Request/Response/Body
//! ├── transport/       # Transport layer: TCP, TLS dialing
//! ├── protocol/        # Wire codecs: HTTP/1.1, WebSocket, SOCKS5
//! ├── strategy/        # The seven outbound strategies
//! └── app/             # Route grammar, sanitizer, gateway, server loop
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod app;
pub mod protocol;
pub mod strategy;
pub mod transport;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use app::Gateway;
pub use common::{Address, Body, Request, Response, Stream, WebSocketHalf, WsMessage};
pub use config::{Settings, StrategyKind};
pub use error::{Error, Result};
pub use strategy::OutboundStrategy;
pub use transport::Dialer;
