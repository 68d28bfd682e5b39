//! Protocol-agnostic commands, replies and per-display results.
//!
//! Wire codes convert with `TryFrom`; unknown values are errors, never panics.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::DisplayId;
use crate::error::{CommandError, WallError};

/// Highest volume level accepted by the displays.
pub const MAX_VOLUME: u8 = 100;

// ── PowerState ───────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Off = 0x00,
    On = 0x01,
}

impl TryFrom<u8> for PowerState {
    type Error = WallError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PowerState::Off),
            0x01 => Ok(PowerState::On),
            _ => Err(WallError::UnknownVariant {
                type_name: "PowerState",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
        }
    }
}

impl FromStr for PowerState {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(PowerState::On),
            "off" => Ok(PowerState::Off),
            other => Err(WallError::InvalidCommand(format!("unknown power state '{other}'"))),
        }
    }
}

// ── InputSource ──────────────────────────────────────────────────

/// Input sources selectable over MDC (`0x14`) and HTTP.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputSource {
    Component = 0x08,
    Av = 0x0C,
    Pc = 0x14,
    Dvi = 0x18,
    Hdmi1 = 0x21,
    Hdmi2 = 0x23,
    DisplayPort = 0x25,
    /// Built-in media player (USB / internal storage).
    Media = 0x60,
    /// Built-in web player, used for URL content.
    UrlLauncher = 0x63,
}

impl InputSource {
    /// The MDC data byte for this source.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Name used on the HTTP channel and the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Av => "av",
            Self::Pc => "pc",
            Self::Dvi => "dvi",
            Self::Hdmi1 => "hdmi1",
            Self::Hdmi2 => "hdmi2",
            Self::DisplayPort => "display-port",
            Self::Media => "media",
            Self::UrlLauncher => "url-launcher",
        }
    }

    const ALL: [InputSource; 9] = [
        Self::Component,
        Self::Av,
        Self::Pc,
        Self::Dvi,
        Self::Hdmi1,
        Self::Hdmi2,
        Self::DisplayPort,
        Self::Media,
        Self::UrlLauncher,
    ];
}

impl TryFrom<u8> for InputSource {
    type Error = WallError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == value)
            .ok_or(WallError::UnknownVariant {
                type_name: "InputSource",
                value: value as u64,
            })
    }
}

impl FromStr for InputSource {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|src| src.name() == wanted)
            .ok_or_else(|| WallError::InvalidCommand(format!("unknown input source '{s}'")))
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── AssetRef ─────────────────────────────────────────────────────

/// Opaque reference to deployable content (URL, playlist id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(asset: impl Into<String>) -> Self {
        Self(asset.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── CommandKind ──────────────────────────────────────────────────

/// The operation a command performs, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum CommandKind {
    Power(PowerState),
    /// Volume level, `0..=100`.
    Volume(u8),
    Input(InputSource),
    /// Read back power, volume, mute and input.
    Status,
    /// Point the display at a content asset.
    Deploy(AssetRef),
}

impl CommandKind {
    /// Reject parameters no display accepts.
    pub fn validate(&self) -> Result<(), WallError> {
        match self {
            Self::Volume(level) if *level > MAX_VOLUME => Err(WallError::InvalidCommand(format!(
                "volume {level} out of range 0..={MAX_VOLUME}"
            ))),
            Self::Deploy(asset) if asset.is_empty() => {
                Err(WallError::InvalidCommand("empty asset reference".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Power(_) => "power",
            Self::Volume(_) => "volume",
            Self::Input(_) => "input",
            Self::Status => "status",
            Self::Deploy(_) => "deploy",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power(p) => write!(f, "power {p}"),
            Self::Volume(v) => write!(f, "volume {v}"),
            Self::Input(i) => write!(f, "input {i}"),
            Self::Status => write!(f, "status"),
            Self::Deploy(a) => write!(f, "deploy {a}"),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// One operation against one display.
///
/// The correlation id is supplied by the caller (or generated) and lets the
/// dispatcher recognise a retried request it already completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub correlation_id: String,
    pub target: DisplayId,
    pub kind: CommandKind,
}

impl Command {
    /// Build a command with a fresh correlation id.
    pub fn new(target: impl Into<DisplayId>, kind: CommandKind) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            target: target.into(),
            kind,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// The same command, addressed to another display.
    pub fn retarget(&self, target: &DisplayId) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            target: target.clone(),
            kind: self.kind.clone(),
        }
    }
}

// ── Reply ────────────────────────────────────────────────────────

/// Values reported by a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub power: Option<PowerState>,
    pub volume: Option<u8>,
    pub mute: Option<bool>,
    pub input: Option<InputSource>,
}

/// Normalised response of a display, independent of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Reply {
    /// The display acknowledged a set command; carries what it applied.
    Ack(CommandKind),
    Status(StatusReport),
}

// ── DisplayValues ────────────────────────────────────────────────

/// Last-known values of a display, updated from successful replies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayValues {
    pub power: Option<PowerState>,
    pub volume: Option<u8>,
    pub mute: Option<bool>,
    pub input: Option<InputSource>,
    pub asset: Option<AssetRef>,
}

impl DisplayValues {
    /// Fold a reply into the known values. Returns `true` if anything changed.
    pub fn apply(&mut self, reply: &Reply) -> bool {
        let before = self.clone();
        match reply {
            Reply::Ack(CommandKind::Power(p)) => self.power = Some(*p),
            Reply::Ack(CommandKind::Volume(v)) => self.volume = Some(*v),
            Reply::Ack(CommandKind::Input(i)) => self.input = Some(*i),
            Reply::Ack(CommandKind::Deploy(a)) => self.asset = Some(a.clone()),
            Reply::Ack(CommandKind::Status) => {}
            Reply::Status(report) => {
                if report.power.is_some() {
                    self.power = report.power;
                }
                if report.volume.is_some() {
                    self.volume = report.volume;
                }
                if report.mute.is_some() {
                    self.mute = report.mute;
                }
                if report.input.is_some() {
                    self.input = report.input;
                }
            }
        }
        *self != before
    }
}

// ── CommandResult ────────────────────────────────────────────────

/// Outcome of one command against one display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub display_id: DisplayId,
    pub correlation_id: String,
    pub outcome: Result<Reply, CommandError>,
    /// Wall-clock time across all attempts, backoff included.
    pub latency: Duration,
    /// Attempts made; `0` when the result was served from the idempotency cache.
    pub attempts: u32,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&CommandError> {
        self.outcome.as_ref().err()
    }
}
