//! Wire Protocol Layer
//!
//! Hand-rolled client-side codecs that operate directly on a byte stream,
//! because the non-fetch strategies only ever see raw TCP or TLS sockets:
//! - HTTP/1.1 request serialization and streaming response parsing
//! - WebSocket handshake, frame (de)multiplexing, and relay
//! - SOCKS5 greeting, authentication, and CONNECT

pub mod http1;
pub mod socks5;
pub mod websocket;

pub use socks5::Socks5Endpoint;
