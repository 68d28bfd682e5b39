//! Domain-specific error types for the display fleet engine.
//!
//! All fallible operations return `Result<T, WallError>`.
//! Results that outlive the call (command results, job outcomes) carry the
//! cloneable [`CommandError`] form instead.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::DisplayId;
use crate::schedule::JobId;

/// The canonical error type for the engine.
#[derive(Debug, Error)]
pub enum WallError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame did not start with the MDC header byte.
    #[error("invalid frame header: {0:#04x}")]
    InvalidHeader(u8),

    /// The frame checksum did not match its contents.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The frame is shorter or longer than its length byte announces.
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    /// The reply came from a different display id than the one addressed.
    #[error("display id mismatch: expected {expected}, got {actual}")]
    DisplayIdMismatch { expected: u8, actual: u8 },

    /// The reply acknowledges a different command than the one sent.
    #[error("unexpected reply for command {actual:#04x} (sent {expected:#04x})")]
    UnexpectedReply { expected: u8, actual: u8 },

    /// The display rejected the command.
    #[error("display rejected command {command:#04x} with code {code:#04x}")]
    Rejected { command: u8, code: u8 },

    /// An HTTP display refused the request.
    #[error("display refused request (http {status}): {message}")]
    HttpRejected { status: u16, message: String },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A response could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The socket / serial layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The link is unusable for a reason other than an I/O error.
    #[error("link error: {0}")]
    Link(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Caller Errors ────────────────────────────────────────────
    /// No endpoint is registered under this id.
    #[error("unknown display: {0}")]
    UnknownDisplay(DisplayId),

    /// A command parameter is out of range or unsupported by the protocol.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A state machine was asked for a transition it does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── Job Errors ───────────────────────────────────────────────
    /// A deployment request was rejected at schedule time.
    #[error("job validation failed: {0}")]
    JobValidation(String),

    /// No job exists under this id.
    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    /// The job is in a phase that does not allow the operation.
    #[error("job {job} cannot {action} while {phase}")]
    JobPhase {
        job: JobId,
        action: &'static str,
        phase: String,
    },

    // ── Storage / Configuration ──────────────────────────────────
    /// Encoding or decoding of persisted state failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The job store could not be read or written.
    #[error("job store error: {0}")]
    Store(String),

    /// A configuration value is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

// ── Classification ───────────────────────────────────────────────

/// Coarse error class used for retry decisions and result reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    UnknownDisplay,
    Connection,
    Timeout,
    Protocol,
    InvalidCommand,
    Job,
    Internal,
}

impl ErrorKind {
    /// Transient link failures are retried; everything else is surfaced.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnknownDisplay => "unknown-display",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::InvalidCommand => "invalid-command",
            Self::Job => "job",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl WallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidHeader(_)
            | Self::ChecksumMismatch { .. }
            | Self::InvalidFrameLength { .. }
            | Self::DisplayIdMismatch { .. }
            | Self::UnexpectedReply { .. }
            | Self::Rejected { .. }
            | Self::HttpRejected { .. }
            | Self::UnknownVariant { .. }
            | Self::MalformedResponse(_) => ErrorKind::Protocol,

            Self::Connection(_) | Self::Link(_) | Self::ChannelClosed => ErrorKind::Connection,
            Self::Timeout(_) => ErrorKind::Timeout,

            Self::UnknownDisplay(_) => ErrorKind::UnknownDisplay,
            Self::InvalidCommand(_) => ErrorKind::InvalidCommand,

            Self::JobValidation(_) | Self::UnknownJob(_) | Self::JobPhase { .. } => ErrorKind::Job,

            Self::InvalidTransition(_) | Self::Encoding(_) | Self::Store(_) | Self::Config(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns `true` for connection and timeout errors.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Returns `true` when the link itself is suspect.
    ///
    /// Only these errors count against a session's failure threshold.
    pub fn is_link_failure(&self) -> bool {
        self.is_retryable()
    }
}

// ── CommandError ─────────────────────────────────────────────────

/// Cloneable, serialisable error carried inside results and job outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&WallError> for CommandError {
    fn from(e: &WallError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<WallError> for CommandError {
    fn from(e: WallError) -> Self {
        Self::from(&e)
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<reqwest::Error> for WallError {
    fn from(e: reqwest::Error) -> Self {
        WallError::Link(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WallError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        WallError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = WallError::ChecksumMismatch {
            expected: 0x14,
            actual: 0x15,
        };
        assert!(e.to_string().contains("0x14"));
        assert!(e.to_string().contains("0x15"));

        let e = WallError::UnknownDisplay(DisplayId::from("lobby-1"));
        assert!(e.to_string().contains("lobby-1"));
    }

    #[test]
    fn from_io_is_connection() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: WallError = io_err.into();
        assert!(matches!(e, WallError::Connection(_)));
        assert_eq!(e.kind(), ErrorKind::Connection);
        assert!(e.is_retryable());
    }

    #[test]
    fn protocol_errors_are_not_retryable() {
        let e = WallError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        };
        assert_eq!(e.kind(), ErrorKind::Protocol);
        assert!(!e.is_retryable());
        assert!(!e.is_link_failure());
    }

    #[test]
    fn timeout_counts_as_link_failure() {
        let e = WallError::Timeout(Duration::from_secs(3));
        assert_eq!(e.kind(), ErrorKind::Timeout);
        assert!(e.is_link_failure());
    }

    #[test]
    fn unknown_display_is_not_retried() {
        let e = WallError::UnknownDisplay(DisplayId::from("nope"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn command_error_keeps_kind_and_message() {
        let e = WallError::Link("session removed".into());
        let ce = CommandError::from(&e);
        assert_eq!(ce.kind, ErrorKind::Connection);
        assert!(ce.message.contains("session removed"));
        assert_eq!(ce.to_string(), format!("connection: {}", e));
    }
}
