//! # vwall-core
//!
//! Control engine for a fleet of video-wall displays.
//!
//! This crate contains:
//! - **Codec**: Samsung MDC frames (`MdcCodec`, `MdcFramer`) and the HTTP REST mapping
//! - **Network**: `Transport` adapters for TCP, serial lines and HTTP
//! - **State**: the per-display `LinkState` machine and `DisplaySession`
//! - **Registry**: `FleetRegistry`, one session per known display
//! - **Dispatch**: `CommandDispatcher` with bounded retries and broadcast
//! - **Schedule**: `DeploymentScheduler`, jobs, job stores and content sources
//! - **Status**: `StatusAggregator`, the reactive fleet view
//! - **Monitor**: `HealthMonitor`, periodic status polling
//! - **Error**: `WallError`, a typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod monitor;
pub mod network;
pub mod registry;
pub mod schedule;
pub mod state;
pub mod status;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{ChecksumScope, MdcCodec, MdcConfig, MdcFrame, MdcFramer, ProtocolCodec};
pub use config::{EngineConfig, MonitorConfig, RetryPolicy, SchedulerConfig, SessionConfig, TransportConfig};
pub use dispatch::CommandDispatcher;
pub use endpoint::{Credentials, DisplayEndpoint, DisplayId, ProtocolKind};
pub use error::{CommandError, ErrorKind, WallError};
pub use message::{
    AssetRef, Command, CommandKind, CommandResult, DisplayValues, InputSource, PowerState, Reply,
    StatusReport,
};
pub use monitor::{HealthMonitor, PollSummary};
pub use network::{DefaultTransportFactory, Transport, TransportFactory};
pub use registry::{FleetRegistry, ReloadSummary};
pub use schedule::{
    ContentSource, DeploymentJob, DeploymentRequest, DeploymentScheduler, DirectAsset, JobId,
    JobPhase, JobStore, JsonDirJobStore, MemoryJobStore, RestoreSummary, TargetOutcome,
};
pub use state::{DisplaySession, LinkState};
pub use status::{DisplayStatus, StatusAggregator, StatusEvent, StatusSnapshot, SubscriptionId};
