//! TCP connection establishment

use tokio::net::TcpStream;

use crate::common::{Address, Result, Stream};

/// Open a TCP connection to the given address.
///
/// Domain addresses are resolved by the runtime's socket API.
pub async fn connect_tcp(addr: &Address) -> Result<Stream> {
    let stream = match addr {
        Address::Socket(socket_addr) => TcpStream::connect(socket_addr).await?,
        Address::Domain(domain, port) => TcpStream::connect((domain.as_str(), *port)).await?,
    };

    // Disable Nagle's algorithm for lower latency
    stream.set_nodelay(true)?;

    Ok(Box::new(stream))
}
