//! Application Layer
//!
//! Ties the pieces together:
//! - `route`: URL path grammar (token, DNS prefix, destination URL)
//! - `headers`: egress header sanitizer
//! - `gateway`: strategy dispatch and restricted-network fallback
//! - `server`: inbound HTTP/1.1 accept loop and WebSocket bridge

pub mod gateway;
pub mod headers;
pub mod route;
pub mod server;

pub use gateway::Gateway;
pub use route::{DnsTransport, Route};
pub use server::serve;
