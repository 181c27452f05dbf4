//! TLS client wrapping for upstream streams

use std::sync::Arc;

use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::common::{Error, Result, Stream};

/// Client-side TLS connector backed by the webpki root store.
pub struct TlsClient {
    connector: TlsConnector,
}

impl TlsClient {
    pub fn new() -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Wrap an established stream in client TLS with the given SNI name.
    pub async fn wrap(&self, stream: Stream, server_name: &str) -> Result<Stream> {
        let domain = ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::Config(format!("Invalid TLS server name: {}", server_name)))?;

        let tls_stream = self.connector.connect(domain, stream).await?;
        Ok(Box::new(tls_stream))
    }
}

impl Default for TlsClient {
    fn default() -> Self {
        Self::new()
    }
}
