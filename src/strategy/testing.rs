//! Test support: a dialer whose connections are scripted duplex pipes.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::common::{Address, Error, IntoStream, Result, Stream};
use crate::transport::Dialer;

pub(crate) enum MockConn {
    /// Fail the dial with this upstream error message.
    Fail(&'static str),
    /// Serve the canned response and capture everything written.
    Serve {
        response: Vec<u8>,
        captured: oneshot::Sender<Vec<u8>>,
    },
}

pub(crate) struct MockDialer {
    scripts: Mutex<VecDeque<MockConn>>,
    pub(crate) dialed: Mutex<Vec<(Address, Option<String>)>>,
}

impl MockDialer {
    pub(crate) fn new(scripts: Vec<MockConn>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            dialed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn connect(&self, addr: &Address, tls_server_name: Option<&str>) -> Result<Stream> {
        self.dialed
            .lock()
            .unwrap()
            .push((addr.clone(), tls_server_name.map(str::to_string)));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected dial");
        match script {
            MockConn::Fail(message) => Err(Error::Upstream(message.to_string())),
            MockConn::Serve { response, captured } => {
                let (local, remote) = duplex(64 * 1024);
                tokio::spawn(async move {
                    let (mut read, mut write) = tokio::io::split(remote);
                    write.write_all(&response).await.ok();
                    write.shutdown().await.ok();
                    drop(write);
                    let mut seen = Vec::new();
                    read.read_to_end(&mut seen).await.ok();
                    let _ = captured.send(seen);
                });
                Ok(local.into_stream())
            }
        }
    }
}
