use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::SinkExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::Framed;

use crate::codec::{MdcFramer, WireRequest, WireResponse};
use crate::config::TransportConfig;
use crate::error::WallError;
use crate::network::{Transport, mdc_round_trip};

/// One physical RS-232C line, possibly shared by daisy-chained displays.
#[derive(Debug)]
pub struct SerialLine {
    path: String,
    baud_rate: u32,
    framed: Option<Framed<SerialStream, MdcFramer>>,
}

impl SerialLine {
    fn new(path: &str, baud_rate: u32) -> Self {
        Self {
            path: path.to_string(),
            baud_rate,
            framed: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn ensure_open(
        &mut self,
        config: &TransportConfig,
    ) -> Result<&mut Framed<SerialStream, MdcFramer>, WallError> {
        if self.framed.is_none() {
            let stream = tokio_serial::new(&self.path, self.baud_rate)
                .timeout(config.connect_timeout())
                .open_native_async()
                .map_err(|e| WallError::Link(format!("serial {}: {e}", self.path)))?;
            tracing::debug!(path = %self.path, baud = self.baud_rate, "serial line opened");
            self.framed = Some(Framed::new(stream, MdcFramer));
        }
        self.framed
            .as_mut()
            .ok_or_else(|| WallError::Link("serial line unavailable".into()))
    }
}

/// Pool of serial lines keyed by device path.
///
/// Every transport on the same path gets the same line, so at most one
/// command is in flight per physical cable.
#[derive(Debug, Clone, Default)]
pub struct SerialLines {
    lines: Arc<Mutex<HashMap<String, Arc<AsyncMutex<SerialLine>>>>>,
}

impl SerialLines {
    /// Returns the shared line for `path`. The first caller's baud rate wins.
    pub fn line(&self, path: &str, baud_rate: u32) -> Arc<AsyncMutex<SerialLine>> {
        let mut lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let line = lines
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(SerialLine::new(path, baud_rate))));
        if let Ok(existing) = line.try_lock() {
            if existing.baud_rate != baud_rate {
                tracing::warn!(
                    path,
                    requested = baud_rate,
                    active = existing.baud_rate,
                    "baud rate mismatch on shared serial line"
                );
            }
        }
        Arc::clone(line)
    }

    /// Number of distinct device paths handed out so far.
    pub fn len(&self) -> usize {
        match self.lines.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// MDC over a serial line shared through [`SerialLines`].
#[derive(Debug)]
pub struct SerialTransport {
    line: Arc<AsyncMutex<SerialLine>>,
    config: TransportConfig,
    opened: bool,
}

impl SerialTransport {
    pub fn new(line: Arc<AsyncMutex<SerialLine>>, config: TransportConfig) -> Self {
        Self {
            line,
            config,
            opened: false,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<(), WallError> {
        let mut line = self.line.lock().await;
        line.ensure_open(&self.config)?;
        self.opened = true;
        Ok(())
    }

    async fn exchange(&mut self, request: &WireRequest) -> Result<WireResponse, WallError> {
        let WireRequest::Frame(frame) = request else {
            return Err(WallError::InvalidCommand(
                "serial transport only carries MDC frames".into(),
            ));
        };
        let deadline = self.config.read_timeout();

        // The line stays locked for the full round trip.
        let mut line = self.line.lock().await;
        let framed = line.ensure_open(&self.config)?;
        let result = mdc_round_trip(framed, frame, deadline).await;
        if result.is_err() {
            line.framed = None;
        }
        result.map(WireResponse::Frame)
    }

    async fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.opened = false;
        // The pool holds one reference and we hold another; anyone else
        // still needs the port.
        if Arc::strong_count(&self.line) <= 2 {
            let mut line = self.line.lock().await;
            if let Some(mut framed) = line.framed.take() {
                let _ = framed.close().await;
                tracing::debug!(path = %line.path, "serial line closed");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_shares_one_line() {
        let pool = SerialLines::default();
        let a = pool.line("/dev/ttyUSB0", 9600);
        let b = pool.line("/dev/ttyUSB0", 9600);
        let c = pool.line("/dev/ttyUSB1", 9600);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn missing_device_is_connection_error() {
        let pool = SerialLines::default();
        let mut transport = SerialTransport::new(
            pool.line("/dev/vwall-does-not-exist", 9600),
            TransportConfig::default(),
        );
        let err = transport.open().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!transport.is_open());
    }
}
