//! Configuration module for Fluxgate
//!
//! The gateway is configured from a flat key-value bag, normally the
//! process environment. Every key has a default so an empty environment
//! still yields a working (if locked-down) gateway.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Outbound strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Socket,
    Fetch,
    Socks5,
    ThirdParty,
    CloudProvider,
    Doh,
    Dot,
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "socket" => Ok(StrategyKind::Socket),
            "fetch" => Ok(StrategyKind::Fetch),
            "socks5" => Ok(StrategyKind::Socks5),
            "thirdparty" => Ok(StrategyKind::ThirdParty),
            "cloudprovider" => Ok(StrategyKind::CloudProvider),
            "doh" => Ok(StrategyKind::Doh),
            "dot" => Ok(StrategyKind::Dot),
            other => Err(Error::Config(format!("Unknown proxy strategy: {}", other))),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::Socket => "socket",
            StrategyKind::Fetch => "fetch",
            StrategyKind::Socks5 => "socks5",
            StrategyKind::ThirdParty => "thirdparty",
            StrategyKind::CloudProvider => "cloudprovider",
            StrategyKind::Doh => "doh",
            StrategyKind::Dot => "dot",
        };
        write!(f, "{}", name)
    }
}

/// Process-wide gateway settings, immutable per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Shared secret required as the first path segment
    pub auth_token: String,
    /// Destination when the path lacks a valid target
    pub default_dst_url: String,
    /// Enables debug log output
    pub debug_mode: bool,
    /// Strategy used for forwarded requests
    pub proxy_strategy: StrategyKind,
    /// Strategy re-run on a restricted-network failure of `socket`
    pub fallback_proxy_strategy: StrategyKind,
    /// SOCKS5 endpoint as `[user:pass@]host:port`
    pub socks5_address: Option<String>,
    /// Third-party relay base URL receiving a `?target=` query
    pub third_party_proxy_url: Option<String>,
    /// Cloud-provider relay base URL, same shape as the third-party one
    pub cloud_provider_url: Option<String>,
    pub doh_server_hostname: String,
    pub doh_server_port: u16,
    pub doh_server_path: String,
    pub dot_server_hostname: String,
    pub dot_server_port: u16,
    /// Listen address for the bundled server binary
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            default_dst_url: "https://example.com/".to_string(),
            debug_mode: false,
            proxy_strategy: StrategyKind::Socket,
            fallback_proxy_strategy: StrategyKind::Fetch,
            socks5_address: None,
            third_party_proxy_url: None,
            cloud_provider_url: None,
            doh_server_hostname: "dns.google".to_string(),
            doh_server_port: 443,
            doh_server_path: "/dns-query".to_string(),
            dot_server_hostname: "dns.google".to_string(),
            dot_server_port: 853,
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    /// Build settings from a flat key-value bag.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(v) = get(vars, "AUTH_TOKEN") {
            settings.auth_token = v.to_string();
        }
        if let Some(v) = get(vars, "DEFAULT_DST_URL") {
            settings.default_dst_url = v.to_string();
        }
        if let Some(v) = get(vars, "DEBUG_MODE") {
            settings.debug_mode = parse_bool(v);
        }
        if let Some(v) = get(vars, "PROXY_STRATEGY") {
            settings.proxy_strategy = v.parse()?;
        }
        if let Some(v) = get(vars, "FALLBACK_PROXY_STRATEGY") {
            settings.fallback_proxy_strategy = v.parse()?;
        }
        if let Some(v) = get(vars, "SOCKS5_ADDRESS") {
            settings.socks5_address = Some(v.to_string());
        }
        if let Some(v) = get(vars, "THIRD_PARTY_PROXY_URL") {
            settings.third_party_proxy_url = Some(v.to_string());
        }
        if let Some(v) = get(vars, "CLOUD_PROVIDER_URL") {
            settings.cloud_provider_url = Some(v.to_string());
        }
        if let Some(v) = get(vars, "DOH_SERVER_HOSTNAME") {
            settings.doh_server_hostname = v.to_string();
        }
        if let Some(v) = get(vars, "DOH_SERVER_PORT") {
            settings.doh_server_port = parse_port(v, "DOH_SERVER_PORT")?;
        }
        if let Some(v) = get(vars, "DOH_SERVER_PATH") {
            settings.doh_server_path = v.to_string();
        }
        if let Some(v) = get(vars, "DOT_SERVER_HOSTNAME") {
            settings.dot_server_hostname = v.to_string();
        }
        if let Some(v) = get(vars, "DOT_SERVER_PORT") {
            settings.dot_server_port = parse_port(v, "DOT_SERVER_PORT")?;
        }
        if let Some(v) = get(vars, "LISTEN_ADDR") {
            settings.listen_addr = v.to_string();
        }

        Ok(settings)
    }
}

fn get<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|s| s.as_str()).filter(|s| !s.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_port(value: &str, key: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("Invalid port in {}: {}", key, value)))
}
