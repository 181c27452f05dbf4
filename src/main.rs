//! Fluxgate - a multi-strategy HTTP/WebSocket/DNS forwarding gateway

use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fluxgate::app::{serve, Gateway};
use fluxgate::config::Settings;
use fluxgate::error::Result;

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    // Load configuration from the environment
    let mut settings = Settings::from_env()?;
    if let Some(listen) = args.listen {
        settings.listen_addr = listen;
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&settings).unwrap());
        return Ok(());
    }

    // Initialize logging; DEBUG_MODE raises the default level
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(if settings.debug_mode {
            Level::DEBUG
        } else {
            Level::INFO
        });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Fluxgate v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "strategy: {} (fallback: {})",
        settings.proxy_strategy, settings.fallback_proxy_strategy
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listen_addr = settings.listen_addr.clone();
        let gateway = Arc::new(Gateway::new(settings)?);
        let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
        serve(gateway, listener).await
    })?;

    Ok(())
}

/// Command line arguments
struct Args {
    listen: Option<String>,
    print_config: bool,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut listen = None;
        let mut print_config = false;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-l" | "--listen" => {
                    if i + 1 < args.len() {
                        listen = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--print-config" => print_config = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            listen,
            print_config,
            version,
        }
    }
}

fn print_help() {
    println!(
        r#"Fluxgate - a multi-strategy HTTP/WebSocket/DNS forwarding gateway

USAGE:
    fluxgate [OPTIONS]

OPTIONS:
    -l, --listen <ADDR>     Listen address (overrides LISTEN_ADDR)
    --print-config          Print the effective configuration as JSON
    -v, --version           Print version information
    -h, --help              Print help information

CONFIGURATION (environment variables):
    AUTH_TOKEN                  Shared secret, first path segment
    DEFAULT_DST_URL             Destination when the path lacks a target
    PROXY_STRATEGY              socket | fetch | socks5 | thirdparty |
                                cloudprovider | doh | dot (default: socket)
    FALLBACK_PROXY_STRATEGY     Fallback strategy (default: fetch)
    SOCKS5_ADDRESS              [user:pass@]host:port
    THIRD_PARTY_PROXY_URL       Relay base URL receiving ?target=
    CLOUD_PROVIDER_URL          Relay base URL receiving ?target=
    DOH_SERVER_HOSTNAME/PORT/PATH   DoH server (default dns.google:443 /dns-query)
    DOT_SERVER_HOSTNAME/PORT        DoT server (default dns.google:853)
    DEBUG_MODE                  Enable debug logging
    LISTEN_ADDR                 Listen address (default 127.0.0.1:8080)

EXAMPLES:
    AUTH_TOKEN=secret fluxgate -l 0.0.0.0:8080
    PROXY_STRATEGY=socks5 SOCKS5_ADDRESS=127.0.0.1:1080 fluxgate
"#
    );
}

fn print_version() {
    println!("Fluxgate v{}", env!("CARGO_PKG_VERSION"));
    println!("A multi-strategy HTTP/WebSocket/DNS forwarding gateway");
}
