//! Configuration file for `vwall-ctl`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use vwall_core::{
    DisplayEndpoint, EngineConfig, MdcConfig, MonitorConfig, ProtocolKind, RetryPolicy,
    SchedulerConfig, SessionConfig, TransportConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CtlConfig {
    /// Link failure threshold.
    pub session: SessionConfig,
    /// Connect and read timeouts.
    pub transport: TransportConfig,
    /// Dispatcher retries and idempotency window.
    pub retry: RetryPolicy,
    /// Job persistence and staleness bound.
    pub scheduler: SchedulerConfig,
    /// Health polling.
    pub monitor: MonitorConfig,
    /// MDC checksum variant and command bytes.
    pub mdc: MdcConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// The fleet.
    pub displays: Vec<DisplayEndpoint>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CtlConfig {
    /// Load configuration from a TOML file. A missing file means defaults;
    /// a file that does not parse is an error.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid config {}: {e}", path.display()),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Defaults plus one example display, for `gen-config`.
    pub fn sample() -> Self {
        Self {
            displays: vec![DisplayEndpoint::new(
                "lobby-1",
                "Lobby wall, left",
                ProtocolKind::BinaryTcp,
                "192.168.1.101:1515",
            )],
            ..Self::default()
        }
    }

    /// Write the sample configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::sample()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The engine sections as one value.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            session: self.session.clone(),
            transport: self.transport.clone(),
            retry: self.retry.clone(),
            scheduler: self.scheduler.clone(),
            monitor: self.monitor.clone(),
            mdc: self.mdc.clone(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
