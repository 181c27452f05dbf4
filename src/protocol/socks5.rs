//! SOCKS5 client
//!
//! Client side of RFC 1928 with RFC 1929 username/password
//! sub-negotiation. After a successful CONNECT the caller owns the byte
//! stream and runs the HTTP or WebSocket codec over it.

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::{Address, Error, Result, Stream};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

/// SOCKS5 endpoint parsed from `[user:pass@]host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Endpoint {
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Socks5Endpoint {
    /// Parse an endpoint string. IPv6 hosts must be bracketed.
    pub fn parse(input: &str) -> Result<Self> {
        let (credentials, host_port) = match input.rsplit_once('@') {
            Some((creds, rest)) => (Some(creds), rest),
            None => (None, input),
        };

        let (username, password) = match credentials {
            Some(creds) => {
                let (user, pass) = creds.split_once(':').ok_or_else(|| {
                    Error::BadRequest(format!("Invalid SOCKS5 address: {}", input))
                })?;
                (Some(user.to_string()), Some(pass.to_string()))
            }
            None => (None, None),
        };

        let (host, port_text) = if let Some(rest) = host_port.strip_prefix('[') {
            // Bracketed IPv6 literal
            let (host, rest) = rest.split_once(']').ok_or_else(|| {
                Error::BadRequest(format!("Invalid SOCKS5 address: {}", input))
            })?;
            let port = rest.strip_prefix(':').ok_or_else(|| {
                Error::BadRequest(format!("Invalid SOCKS5 address: {}", input))
            })?;
            (host, port)
        } else {
            host_port.rsplit_once(':').ok_or_else(|| {
                Error::BadRequest(format!("Invalid SOCKS5 address: {}", input))
            })?
        };

        if host.is_empty() {
            return Err(Error::BadRequest(format!(
                "Invalid SOCKS5 address: {}",
                input
            )));
        }

        let port = port_text
            .parse()
            .map_err(|_| Error::BadRequest(format!("Invalid SOCKS5 port: {}", port_text)))?;

        Ok(Self {
            username,
            password,
            host: host.to_string(),
            port,
        })
    }

    /// The server's dial address.
    pub fn address(&self) -> Address {
        if let Ok(ip) = self.host.parse::<Ipv6Addr>() {
            return Address::Socket((ip, self.port).into());
        }
        Address::domain(self.host.clone(), self.port)
    }

    fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Run the greeting/auth/CONNECT sequence on an open stream to the server.
///
/// The greeting always offers NO_AUTH and USER_PASS, in that order. On
/// success the stream is ready for the destination exchange.
pub async fn establish(
    stream: &mut Stream,
    endpoint: &Socks5Endpoint,
    destination: &Address,
) -> Result<()> {
    // 1. Greeting
    stream
        .write_all(&[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_PASSWORD])
        .await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(Error::Protocol(format!(
            "Invalid SOCKS version from server: {}",
            reply[0]
        )));
    }

    // 2. Method selection
    match reply[1] {
        AUTH_NONE => {}
        AUTH_PASSWORD => authenticate(stream, endpoint).await?,
        AUTH_NO_ACCEPTABLE => return Err(Error::Protocol("no acceptable methods".into())),
        other => {
            return Err(Error::Protocol(format!(
                "Server selected unknown auth method: {}",
                other
            )))
        }
    }

    // 3. CONNECT
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    request.extend_from_slice(&encode_address(destination)?);
    stream.write_all(&request).await?;

    // 4. Reply
    let mut response = [0u8; 4];
    stream.read_exact(&mut response).await?;
    if response[0] != SOCKS5_VERSION || response[1] != REP_SUCCESS {
        return Err(Error::Protocol("fail to open socks connection".into()));
    }

    // Skip the bound address
    match response[3] {
        ATYP_IPV4 => {
            let mut skip = [0u8; 6];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut skip = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_IPV6 => {
            let mut skip = [0u8; 18];
            stream.read_exact(&mut skip).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn authenticate(stream: &mut Stream, endpoint: &Socks5Endpoint) -> Result<()> {
    if !endpoint.has_credentials() {
        return Err(Error::Protocol(
            "Server requires authentication but no credentials configured".into(),
        ));
    }
    let username = endpoint.username.as_deref().unwrap_or("");
    let password = endpoint.password.as_deref().unwrap_or("");

    let mut request = vec![0x01];
    request.push(username.len() as u8);
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply != [0x01, 0x00] {
        return Err(Error::Protocol("socks authentication failed".into()));
    }
    Ok(())
}

/// Encode ATYP + address + big-endian port for a CONNECT request.
pub fn encode_address(destination: &Address) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(32);
    match destination {
        Address::Socket(addr) => match addr.ip() {
            std::net::IpAddr::V4(v4) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&v4.octets());
            }
            std::net::IpAddr::V6(v6) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&v6.octets());
            }
        },
        Address::Domain(domain, _) => {
            // A dotted-quad or bracketless IPv6 literal still gets the
            // compact encoding.
            if let Ok(v4) = domain.parse::<Ipv4Addr>() {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&v4.octets());
            } else if let Ok(v6) = domain.parse::<Ipv6Addr>() {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&v6.octets());
            } else {
                if domain.len() > 255 {
                    return Err(Error::BadRequest(format!(
                        "Domain too long for SOCKS5: {}",
                        domain
                    )));
                }
                out.push(ATYP_DOMAIN);
                out.push(domain.len() as u8);
                out.extend_from_slice(domain.as_bytes());
            }
        }
    }
    out.extend_from_slice(&destination.port().to_be_bytes());
    Ok(out)
}
