//! Runtime policy for the engine.
//!
//! Every section is `serde(default)` so a partial TOML table only overrides
//! what it names. Loading the file itself is the binary's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::MdcConfig;

/// All engine settings, one field per TOML section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerConfig,
    pub monitor: MonitorConfig,
    pub mdc: MdcConfig,
}

// ── Session ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive link failures after which a session drops to `Disconnected`.
    pub failure_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline for opening a socket, serial port or HTTP connection.
    pub connect_timeout_ms: u64,
    /// Deadline for a single request/response exchange.
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            read_timeout_ms: 3_000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ── Retry ────────────────────────────────────────────────────────

/// Dispatcher retry policy for transient link failures.
///
/// Delays follow exponential backoff: `min(base_delay * 2^attempt, max_delay)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// How long a successful result is remembered per correlation id.
    pub dedupe_ttl_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            dedupe_ttl_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
    }

    /// Upper bound on the time spent sleeping between attempts.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries).map(|a| self.delay_for_attempt(a)).sum()
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }
}

// ── Scheduler ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Directory for persisted jobs. Empty keeps jobs in memory only.
    pub state_dir: String,
    /// Jobs scheduled further in the past than this are rejected as stale.
    pub max_past_due_secs: u64,
    /// Jobs scheduled further ahead than this are rejected.
    pub max_future_secs: u64,
}

/// Longest single timer the scheduler arms; longer waits are re-armed
/// in steps of this size.
pub const MAX_TIMER_SECS: u64 = 365 * 24 * 60 * 60;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            state_dir: String::new(),
            max_past_due_secs: 24 * 60 * 60,
            max_future_secs: MAX_TIMER_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn max_past_due(&self) -> chrono::Duration {
        i64::try_from(self.max_past_due_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn max_future(&self) -> chrono::Duration {
        i64::try_from(self.max_future_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Persisted job directory, if one is configured.
    pub fn state_dir(&self) -> Option<std::path::PathBuf> {
        let dir = self.state_dir.trim();
        (!dir.is_empty()).then(|| std::path::PathBuf::from(dir))
    }
}

// ── Monitor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between fleet-wide status polls; `0` disables polling.
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}
