//! Static display descriptors.
//!
//! A [`DisplayEndpoint`] is created from configuration at startup and never
//! mutated afterwards; a reload replaces it wholesale.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WallError;

/// Default TCP port of the Samsung MDC control service.
pub const DEFAULT_MDC_PORT: u16 = 1515;

/// Default baud rate of the MDC RS-232C interface.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

// ── DisplayId ────────────────────────────────────────────────────

/// Stable, unique identifier of one display in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(String);

impl DisplayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for DisplayId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DisplayId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── ProtocolKind ─────────────────────────────────────────────────

/// The control channel a display is reachable through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    /// Samsung MDC frames over a TCP socket.
    BinaryTcp,
    /// Samsung MDC frames over an RS-232C line.
    Serial,
    /// JSON over an HTTP REST endpoint.
    Http,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BinaryTcp => write!(f, "binary-tcp"),
            Self::Serial => write!(f, "serial"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl ProtocolKind {
    /// Whether this channel speaks MDC frames.
    pub fn uses_mdc(&self) -> bool {
        matches!(self, Self::BinaryTcp | Self::Serial)
    }
}

// ── Credentials ──────────────────────────────────────────────────

/// Credentials for channels that require them (HTTP only, today).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Bearer token; takes precedence over basic auth.
    pub token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

// ── DisplayEndpoint ──────────────────────────────────────────────

/// Immutable descriptor of one controllable display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEndpoint {
    pub id: DisplayId,
    pub name: String,
    pub protocol: ProtocolKind,
    /// `host[:port]`, a serial device path, or a base URL.
    pub address: String,
    /// MDC display-id byte. Daisy-chained displays on one line differ here.
    #[serde(default = "default_mdc_id")]
    pub mdc_id: u8,
    /// Serial line speed; ignored by other channels.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

fn default_mdc_id() -> u8 {
    1
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl DisplayEndpoint {
    pub fn new(
        id: impl Into<DisplayId>,
        name: impl Into<String>,
        protocol: ProtocolKind,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            protocol,
            address: address.into(),
            mdc_id: default_mdc_id(),
            baud_rate: default_baud_rate(),
            credentials: None,
        }
    }

    pub fn with_mdc_id(mut self, mdc_id: u8) -> Self {
        self.mdc_id = mdc_id;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// TCP address with the MDC default port filled in when absent.
    pub fn socket_address(&self) -> String {
        if self.address.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, DEFAULT_MDC_PORT)
        }
    }

    /// Reject descriptors no transport could use.
    pub fn validate(&self) -> Result<(), WallError> {
        if self.id.as_str().is_empty() {
            return Err(WallError::Config("display id must not be empty".into()));
        }
        if self.address.trim().is_empty() {
            return Err(WallError::Config(format!("display {}: empty address", self.id)));
        }
        if self.protocol == ProtocolKind::Http
            && !(self.address.starts_with("http://") || self.address.starts_with("https://"))
        {
            return Err(WallError::Config(format!(
                "display {}: http address must be an http(s) URL",
                self.id
            )));
        }
        if self.protocol == ProtocolKind::Serial && self.baud_rate == 0 {
            return Err(WallError::Config(format!("display {}: baud rate is zero", self.id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_address_adds_default_port() {
        let ep = DisplayEndpoint::new("a", "A", ProtocolKind::BinaryTcp, "192.168.1.101");
        assert_eq!(ep.socket_address(), "192.168.1.101:1515");

        let ep = DisplayEndpoint::new("a", "A", ProtocolKind::BinaryTcp, "10.0.0.5:9000");
        assert_eq!(ep.socket_address(), "10.0.0.5:9000");
    }

    #[test]
    fn http_endpoint_requires_url() {
        let ep = DisplayEndpoint::new("h", "H", ProtocolKind::Http, "10.0.0.5");
        assert!(ep.validate().is_err());

        let ep = DisplayEndpoint::new("h", "H", ProtocolKind::Http, "http://10.0.0.5/api");
        assert!(ep.validate().is_ok());
    }

    #[test]
    fn protocol_kind_serde_names() {
        let json = serde_json::to_string(&ProtocolKind::BinaryTcp).unwrap();
        assert_eq!(json, "\"binary-tcp\"");
        let kind: ProtocolKind = serde_json::from_str("\"serial\"").unwrap();
        assert_eq!(kind, ProtocolKind::Serial);
    }

    #[test]
    fn endpoint_defaults_when_deserialised() {
        let ep: DisplayEndpoint = serde_json::from_str(
            r#"{"id":"wall-1","name":"Main","protocol":"serial","address":"/dev/ttyUSB0"}"#,
        )
        .unwrap();
        assert_eq!(ep.mdc_id, 1);
        assert_eq!(ep.baud_rate, DEFAULT_BAUD_RATE);
        assert!(ep.credentials.is_none());
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials {
            username: Some("admin".into()),
            password: Some("hunter2".into()),
            token: None,
        };
        let text = format!("{creds:?}");
        assert!(text.contains("admin"));
        assert!(!text.contains("hunter2"));
    }
}
