//! Common types and abstractions
//!
//! This module defines the core types used throughout the gateway:
//! - Stream: unified async I/O abstraction over raw TCP and TLS sockets
//! - Address: network address representation
//! - Request/Response/Body: the inbound message model
//! - WebSocketHalf: one side of an in-process WebSocket message pair

mod address;
mod message;
mod stream;

pub use address::Address;
pub use message::{Body, Request, Response, WebSocketHalf, WsMessage, FALLBACK_BUFFER_LIMIT};
pub use stream::{ChannelReader, IntoStream, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
