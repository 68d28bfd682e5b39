//! REST mapping for displays controlled over HTTP.
//!
//! ```text
//! power   POST /power    {"state": "on" | "off"}
//! volume  POST /volume   {"level": 0..=100}
//! input   POST /input    {"source": "hdmi1" | ...}
//! status  GET  /status
//! deploy  POST /content  {"asset": "<reference>"}
//! ```
//!
//! Replies are `{"success": bool, "power"?, "volume"?, "mute"?, "input"?,
//! "asset"?, "error"?}`. An empty 2xx body acknowledges a set command.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::WallError;
use crate::message::{AssetRef, CommandKind, InputSource, PowerState, Reply, StatusReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A REST call relative to the display's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: &'static str,
    pub body: Option<serde_json::Value>,
}

/// Raw status line and body as returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

/// JSON reply payload.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpReply {
    pub success: bool,
    pub power: Option<PowerState>,
    pub volume: Option<u8>,
    pub mute: Option<bool>,
    pub input: Option<InputSource>,
    pub asset: Option<AssetRef>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpCodec;

impl HttpCodec {
    pub fn encode(&self, kind: &CommandKind) -> Result<HttpRequest, WallError> {
        kind.validate()?;
        let request = match kind {
            CommandKind::Power(p) => post("/power", json!({ "state": p })),
            CommandKind::Volume(v) => post("/volume", json!({ "level": v })),
            CommandKind::Input(src) => post("/input", json!({ "source": src })),
            CommandKind::Deploy(asset) => post("/content", json!({ "asset": asset })),
            CommandKind::Status => HttpRequest {
                method: HttpMethod::Get,
                path: "/status",
                body: None,
            },
        };
        Ok(request)
    }

    pub fn decode(&self, kind: &CommandKind, response: &HttpResponse) -> Result<Reply, WallError> {
        let status = response.status;
        if status >= 500 {
            // Server-side trouble on the display; worth another attempt.
            return Err(WallError::Link(format!("http {status}")));
        }

        let body = if response.body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(
                serde_json::from_slice::<HttpReply>(&response.body)
                    .map_err(|e| WallError::MalformedResponse(format!("http body: {e}")))?,
            )
        };

        if !(200..300).contains(&status) || body.as_ref().is_some_and(|b| !b.success) {
            let message = body
                .and_then(|b| b.error)
                .unwrap_or_else(|| "request refused".to_string());
            return Err(WallError::HttpRejected { status, message });
        }

        let Some(reply) = body else {
            return match kind {
                CommandKind::Status => Err(WallError::MalformedResponse(
                    "empty status response".into(),
                )),
                other => Ok(Reply::Ack(other.clone())),
            };
        };

        Ok(match kind {
            CommandKind::Status => Reply::Status(StatusReport {
                power: reply.power,
                volume: reply.volume,
                mute: reply.mute,
                input: reply.input,
            }),
            CommandKind::Power(p) => Reply::Ack(CommandKind::Power(reply.power.unwrap_or(*p))),
            CommandKind::Volume(v) => Reply::Ack(CommandKind::Volume(reply.volume.unwrap_or(*v))),
            CommandKind::Input(i) => Reply::Ack(CommandKind::Input(reply.input.unwrap_or(*i))),
            CommandKind::Deploy(a) => {
                Reply::Ack(CommandKind::Deploy(reply.asset.unwrap_or_else(|| a.clone())))
            }
        })
    }
}

fn post(path: &'static str, body: serde_json::Value) -> HttpRequest {
    HttpRequest {
        method: HttpMethod::Post,
        path,
        body: Some(body),
    }
}
