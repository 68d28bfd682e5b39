//! Link state machine of a display session.
//!
//! `LinkState` only moves through the validated transitions below; every
//! transition returns `Result` instead of panicking.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WallError;

// ── LinkState ────────────────────────────────────────────────────

/// Health of the link to one display.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected ◄──► Degraded
///       ▲               │              │              │
///       └───────────────┴──────────────┴──────────────┘
///        open failed     teardown       threshold reached / teardown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    /// No usable link. Initial state.
    #[default]
    Disconnected,

    /// A single open attempt is under way.
    Connecting,

    /// The last command succeeded.
    Connected,

    /// Link failures have occurred but stay below the threshold.
    Degraded,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

impl LinkState {
    /// Whether commands can go straight to the transport.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`, or `Connecting` when an earlier attempt
    /// was abandoned before it finished.
    pub fn begin_connect(&mut self) -> Result<(), WallError> {
        match self {
            Self::Disconnected | Self::Connecting => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(WallError::InvalidTransition(
                "cannot connect: link already established",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn connect_succeeded(&mut self) -> Result<(), WallError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(WallError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn connect_failed(&mut self) -> Result<(), WallError> {
        match self {
            Self::Connecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(WallError::InvalidTransition(
                "cannot fail connect: not in Connecting state",
            )),
        }
    }

    /// A command succeeded. Valid from any state.
    pub fn record_success(&mut self) {
        *self = Self::Connected;
    }

    /// A command failed on the link with `failures` consecutive failures
    /// counted so far.
    ///
    /// Valid from: `Connected`, `Degraded`.
    pub fn record_failure(&mut self, failures: u32, threshold: u32) -> Result<(), WallError> {
        match self {
            Self::Connected | Self::Degraded => {
                *self = if failures >= threshold {
                    Self::Disconnected
                } else {
                    Self::Degraded
                };
                Ok(())
            }
            _ => Err(WallError::InvalidTransition(
                "cannot record failure: link not established",
            )),
        }
    }

    /// Explicit teardown.
    ///
    /// Valid from: `Connected`, `Degraded`.
    pub fn teardown(&mut self) -> Result<(), WallError> {
        match self {
            Self::Connected | Self::Degraded => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(WallError::InvalidTransition(
                "cannot tear down: link not established",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = LinkState::default();
        assert!(state.is_disconnected());

        state.begin_connect().unwrap();
        assert_eq!(state, LinkState::Connecting);

        state.connect_succeeded().unwrap();
        assert!(state.is_usable());

        state.teardown().unwrap();
        assert!(state.is_disconnected());
    }

    #[test]
    fn failures_degrade_then_disconnect() {
        let mut state = LinkState::Connected;
        state.record_failure(1, 3).unwrap();
        assert_eq!(state, LinkState::Degraded);
        state.record_failure(2, 3).unwrap();
        assert_eq!(state, LinkState::Degraded);
        state.record_failure(3, 3).unwrap();
        assert_eq!(state, LinkState::Disconnected);
    }

    #[test]
    fn success_recovers_from_any_state() {
        for mut state in [
            LinkState::Disconnected,
            LinkState::Connecting,
            LinkState::Degraded,
        ] {
            state.record_success();
            assert_eq!(state, LinkState::Connected);
        }
    }

    #[test]
    fn connect_failure_returns_to_disconnected() {
        let mut state = LinkState::Disconnected;
        state.begin_connect().unwrap();
        state.connect_failed().unwrap();
        assert!(state.is_disconnected());
    }

    #[test]
    fn abandoned_connect_can_start_over() {
        let mut state = LinkState::Disconnected;
        state.begin_connect().unwrap();
        state.begin_connect().unwrap();
        assert_eq!(state, LinkState::Connecting);
        state.connect_succeeded().unwrap();
        assert_eq!(state, LinkState::Connected);
    }

    #[test]
    fn invalid_transitions() {
        assert!(LinkState::Connected.begin_connect().is_err());
        assert!(LinkState::Degraded.begin_connect().is_err());
        assert!(LinkState::Disconnected.connect_succeeded().is_err());
        assert!(LinkState::Disconnected.teardown().is_err());
        assert!(LinkState::Connecting.teardown().is_err());
        assert!(LinkState::Disconnected.record_failure(1, 3).is_err());
    }

    #[test]
    fn display_and_serde_names() {
        assert_eq!(LinkState::Degraded.to_string(), "degraded");
        assert_eq!(
            serde_json::to_string(&LinkState::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }
}
