use async_trait::async_trait;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::codec::{MdcFramer, WireRequest, WireResponse};
use crate::config::TransportConfig;
use crate::error::WallError;
use crate::network::{Transport, mdc_round_trip};

/// MDC over a kept-alive TCP connection.
#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    config: TransportConfig,
    framed: Option<Framed<TcpStream, MdcFramer>>,
}

impl TcpTransport {
    pub fn new(address: String, config: TransportConfig) -> Self {
        Self {
            address,
            config,
            framed: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn dial(&mut self) -> Result<&mut Framed<TcpStream, MdcFramer>, WallError> {
        if self.framed.is_none() {
            let deadline = self.config.connect_timeout();
            let stream = timeout(deadline, TcpStream::connect(&self.address))
                .await
                .map_err(|_| WallError::Timeout(deadline))??;
            stream.set_nodelay(true)?;
            tracing::debug!(address = %self.address, "tcp link established");
            self.framed = Some(Framed::new(stream, MdcFramer));
        }
        self.framed
            .as_mut()
            .ok_or_else(|| WallError::Link("tcp link unavailable".into()))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), WallError> {
        self.framed = None;
        self.dial().await.map(|_| ())
    }

    async fn exchange(&mut self, request: &WireRequest) -> Result<WireResponse, WallError> {
        let WireRequest::Frame(frame) = request else {
            return Err(WallError::InvalidCommand(
                "tcp transport only carries MDC frames".into(),
            ));
        };
        let deadline = self.config.read_timeout();
        let framed = self.dial().await?;
        let result = mdc_round_trip(framed, frame, deadline).await;
        if result.is_err() {
            self.framed = None;
        }
        result.map(WireResponse::Frame)
    }

    async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let _ = framed.close().await;
        }
    }

    fn is_open(&self) -> bool {
        self.framed.is_some()
    }
}
