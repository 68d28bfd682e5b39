//! Transport adapters.
//!
//! One adapter per control channel, all behind [`Transport`]:
//!
//! | Adapter          | Channel       | Link policy                                  |
//! |------------------|---------------|----------------------------------------------|
//! | [`TcpTransport`] | binary-tcp    | kept alive; re-dialled after a link error    |
//! | [`SerialTransport`] | serial     | kept open; one in-flight command per line    |
//! | [`HttpTransport`]| http          | pooled client, one request per exchange      |
//!
//! Every adapter enforces the configured connect and read timeouts.

pub mod http;
pub mod serial;
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::codec::{MdcFramer, WireRequest, WireResponse};
use crate::config::TransportConfig;
use crate::endpoint::{DisplayEndpoint, ProtocolKind};
use crate::error::WallError;

pub use http::HttpTransport;
pub use serial::{SerialLines, SerialTransport};
pub use tcp::TcpTransport;

/// A physical channel to one display.
///
/// `exchange` performs exactly one request/response round trip and fails
/// with a connection or timeout error when the display is unreachable.
#[async_trait]
pub trait Transport: Send {
    /// Open the channel. Called by the session on (re)connect.
    async fn open(&mut self) -> Result<(), WallError>;

    /// One round trip.
    async fn exchange(&mut self, request: &WireRequest) -> Result<WireResponse, WallError>;

    /// Release the channel. Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Builds the transport for an endpoint.
pub trait TransportFactory: Send + Sync {
    fn build(&self, endpoint: &DisplayEndpoint) -> Result<Box<dyn Transport>, WallError>;
}

/// Selects the adapter from the endpoint's protocol kind.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    config: TransportConfig,
    serial_lines: SerialLines,
}

impl DefaultTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            serial_lines: SerialLines::default(),
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn build(&self, endpoint: &DisplayEndpoint) -> Result<Box<dyn Transport>, WallError> {
        let transport: Box<dyn Transport> = match endpoint.protocol {
            ProtocolKind::BinaryTcp => Box::new(TcpTransport::new(
                endpoint.socket_address(),
                self.config.clone(),
            )),
            ProtocolKind::Serial => Box::new(SerialTransport::new(
                self.serial_lines.line(&endpoint.address, endpoint.baud_rate),
                self.config.clone(),
            )),
            ProtocolKind::Http => Box::new(HttpTransport::new(
                &endpoint.address,
                endpoint.credentials.clone(),
                &self.config,
            )?),
        };
        Ok(transport)
    }
}

/// Send one MDC frame and read one frame back within `deadline`.
///
/// Only link-level errors come out of here; frame validation is the
/// codec's job.
pub(crate) async fn mdc_round_trip<T>(
    framed: &mut Framed<T, MdcFramer>,
    frame: &Bytes,
    deadline: Duration,
) -> Result<Bytes, WallError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    // Late replies to an earlier, timed-out request must not be read as ours.
    framed.read_buffer_mut().clear();

    let round_trip = async {
        framed.send(frame.clone()).await?;
        let reply = framed
            .next()
            .await
            .ok_or_else(|| WallError::Link("display closed the connection".into()))??;
        Ok::<_, WallError>(reply)
    };

    timeout(deadline, round_trip)
        .await
        .map_err(|_| WallError::Timeout(deadline))?
}
