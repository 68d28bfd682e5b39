//! Shared fixtures: a scripted in-memory transport and an MDC display
//! emulator listening on localhost.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use vwall_core::codec::{HttpResponse, WireRequest, WireResponse};
use vwall_core::{
    ChecksumScope, CommandDispatcher, DisplayEndpoint, EngineConfig, FleetRegistry, MdcFrame,
    MdcFramer, ProtocolKind, RetryPolicy, StatusAggregator, Transport, TransportFactory, WallError,
};

// ── Scripted transport ───────────────────────────────────────────

/// How a scripted display answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Acknowledge everything; status reports power on, volume 20.
    Healthy,
    /// Every exchange fails with a link error.
    LinkDown,
    /// Every exchange times out after the given delay.
    Hang(Duration),
    /// Opening the link fails.
    Unreachable,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicU32,
    pub exchanges: AtomicU32,
}

/// Hands out transports whose behaviour can be changed per display while a
/// test runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    counters: Arc<Mutex<HashMap<String, Arc<Counters>>>>,
}

impl ScriptedFactory {
    pub fn set(&self, id: &str, script: Script) {
        self.scripts.lock().unwrap().insert(id.to_string(), script);
    }

    pub fn counters(&self, id: &str) -> Arc<Counters> {
        self.counters
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    pub fn opens(&self, id: &str) -> u32 {
        self.counters(id).opens.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self, id: &str) -> u32 {
        self.counters(id).exchanges.load(Ordering::SeqCst)
    }

    fn script(&self, id: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(Script::Healthy)
    }
}

impl TransportFactory for ScriptedFactory {
    fn build(&self, endpoint: &DisplayEndpoint) -> Result<Box<dyn Transport>, WallError> {
        let id = endpoint.id.as_str().to_string();
        Ok(Box::new(ScriptedTransport {
            counters: self.counters(&id),
            factory: self.clone(),
            id,
            open: false,
        }))
    }
}

struct ScriptedTransport {
    id: String,
    factory: ScriptedFactory,
    counters: Arc<Counters>,
    open: bool,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self) -> Result<(), WallError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.factory.script(&self.id) == Script::Unreachable {
            return Err(WallError::Link(format!("{} unreachable", self.id)));
        }
        self.open = true;
        Ok(())
    }

    async fn exchange(&mut self, request: &WireRequest) -> Result<WireResponse, WallError> {
        self.counters.exchanges.fetch_add(1, Ordering::SeqCst);
        match self.factory.script(&self.id) {
            Script::Healthy | Script::Unreachable => {}
            Script::LinkDown => return Err(WallError::Link("connection reset".into())),
            Script::Hang(delay) => {
                tokio::time::sleep(delay).await;
                return Err(WallError::Timeout(delay));
            }
        }
        let body = match request {
            WireRequest::Http(req) if req.path == "/status" => {
                Bytes::from_static(br#"{"success":true,"power":"on","volume":20,"input":"hdmi1"}"#)
            }
            _ => Bytes::new(),
        };
        Ok(WireResponse::Http(HttpResponse { status: 200, body }))
    }

    async fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub fn http_display(id: &str) -> DisplayEndpoint {
    DisplayEndpoint::new(id, id.to_uppercase(), ProtocolKind::Http, format!("http://{id}.local"))
}

/// Registry and dispatcher over scripted displays.
pub async fn scripted_fleet(
    ids: &[&str],
    factory: &ScriptedFactory,
    retry: RetryPolicy,
) -> (Arc<FleetRegistry>, Arc<CommandDispatcher>) {
    let config = EngineConfig {
        retry: retry.clone(),
        ..EngineConfig::default()
    };
    let registry = Arc::new(FleetRegistry::with_factory(
        &config,
        Arc::new(factory.clone()),
        StatusAggregator::new(),
    ));
    for id in ids {
        registry.register(http_display(id)).await.unwrap();
    }
    let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&registry), retry));
    (registry, dispatcher)
}

/// Small delays so retry tests stay quick under real time too.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay_ms: 10,
        max_delay_ms: 20,
        dedupe_ttl_secs: 60,
    }
}

// ── MDC display emulator ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Reply with a valid ACK.
    Normal,
    /// Reply with a frame whose checksum is off by one.
    CorruptChecksum,
    /// Read the request and never answer.
    Silent,
    /// Reply with a NAK.
    Nak,
}

/// A Samsung display speaking MDC over TCP on an ephemeral port.
#[derive(Debug, Clone)]
pub struct MdcDisplay {
    pub addr: SocketAddr,
    behavior: Arc<Mutex<Behavior>>,
    connections: Arc<AtomicU32>,
    /// Power, volume, mute, input as reported by status queries.
    state: Arc<Mutex<[u8; 4]>>,
}

impl MdcDisplay {
    pub async fn spawn(mdc_id: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let display = Self {
            addr: listener.local_addr().unwrap(),
            behavior: Arc::new(Mutex::new(Behavior::Normal)),
            connections: Arc::new(AtomicU32::new(0)),
            state: Arc::new(Mutex::new([0x00, 10, 0x00, 0x21])),
        };
        let server = display.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                server.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(server.clone().serve(Framed::new(stream, MdcFramer), mdc_id));
            }
        });
        display
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self, id: &str) -> DisplayEndpoint {
        DisplayEndpoint::new(id, id, ProtocolKind::BinaryTcp, self.addr.to_string())
    }

    async fn serve(self, mut framed: Framed<tokio::net::TcpStream, MdcFramer>, mdc_id: u8) {
        while let Some(Ok(raw)) = framed.next().await {
            let Ok(request) = MdcFrame::parse(&raw, ChecksumScope::IncludeHeader) else {
                continue;
            };
            let behavior = *self.behavior.lock().unwrap();
            let reply = match behavior {
                Behavior::Silent => continue,
                Behavior::Nak => MdcFrame::nak(mdc_id, request.command, 0x01),
                Behavior::Normal | Behavior::CorruptChecksum => {
                    let values = self.apply(&request);
                    MdcFrame::ack(mdc_id, request.command, &values).unwrap()
                }
            };
            let mut bytes = reply.encode(ChecksumScope::IncludeHeader).to_vec();
            if behavior == Behavior::CorruptChecksum {
                let last = bytes.len() - 1;
                bytes[last] = bytes[last].wrapping_add(1);
            }
            if framed.send(Bytes::from(bytes)).await.is_err() {
                break;
            }
        }
    }

    fn apply(&self, request: &MdcFrame) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        match (request.command, request.data.first()) {
            (0x00, _) => state.to_vec(),
            (0x11, Some(v)) => {
                state[0] = *v;
                vec![*v]
            }
            (0x12, Some(v)) => {
                state[1] = *v;
                vec![*v]
            }
            (0x14, Some(v)) => {
                state[3] = *v;
                vec![*v]
            }
            _ => request.data.clone(),
        }
    }
}
